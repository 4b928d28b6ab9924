#![allow(dead_code)]

use std::num::NonZeroUsize;

use training::{
    Result,
    NamedParams,
    data::{Batch, DataLoader, InMemoryDataset},
    handler::Module,
    report::{Outputs, Value},
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Samples of `y = 2x + 1` split in batches of `batch_size`.
pub fn line(samples: usize, batch_size: usize) -> DataLoader {
    let xs: Vec<f32> = (0..samples).map(|i| i as f32 / samples as f32).collect();
    let ys = xs.iter().map(|x| 2.0 * x + 1.0).collect();
    let dataset = InMemoryDataset::new(xs, ys).unwrap();

    DataLoader::new(dataset, NonZeroUsize::new(batch_size).unwrap())
}

/// `y = w * x + b` trained on the mean squared error.
#[derive(Debug, Default)]
pub struct Linear {
    pub params: [f32; 2],
    pub modes: Vec<bool>,
}

impl Linear {
    fn predict(&self, batch: &Batch) -> Vec<f32> {
        let [w, b] = self.params;
        batch.xs.iter().map(|x| w * x + b).collect()
    }
}

impl Module<Batch> for Linear {
    fn forward(&mut self, batch: &Batch) -> Result<Outputs> {
        let preds = self.predict(batch);
        let n = batch.len().max(1) as f32;
        let loss = preds
            .iter()
            .zip(&batch.ys)
            .map(|(p, y)| (p - y).powi(2))
            .sum::<f32>()
            / n;

        Ok(Outputs::from([("loss".to_string(), Value::from(loss))]))
    }

    fn backward(&mut self, batch: &Batch, _outputs: &Outputs, grad: &mut [f32]) -> Result<()> {
        let preds = self.predict(batch);
        let n = batch.len().max(1) as f32;

        for ((p, y), x) in preds.iter().zip(&batch.ys).zip(&batch.xs) {
            grad[0] += 2.0 * (p - y) * x / n;
            grad[1] += 2.0 * (p - y) / n;
        }

        Ok(())
    }

    fn params(&self) -> &[f32] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    fn set_training(&mut self, training: bool) {
        self.modes.push(training);
    }

    fn named_parameters(&self) -> NamedParams {
        vec![
            ("w".to_string(), Value::from(self.params[0])),
            ("b".to_string(), Value::from(self.params[1])),
        ]
    }
}
