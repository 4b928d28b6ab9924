use std::collections::BTreeMap;

use log::debug;
use training::{
    NamedParams, Result, StepHook, TrainErr,
    report::{Outputs, Value},
    trigger::{IntervalTrigger, Progress, Trigger},
};

use crate::{
    barrier::{Checkpoint, CheckpointSender},
    config::CompareConfig,
};

/// The hook a comparer injects into each engine.
///
/// It keeps the latest value of every output and, whenever the comparison
/// trigger fires, hands them to the comparer as a checkpoint.
pub(crate) struct Collector {
    engine: String,
    trigger: IntervalTrigger,
    outputs: Option<Vec<String>>,
    params: bool,
    pending: BTreeMap<String, Value>,
    seq: usize,
    sender: CheckpointSender,
}

impl Collector {
    /// Creates a new `Collector`.
    ///
    /// # Arguments
    /// * `engine` - The name of the observed engine.
    /// * `config` - Which values to collect and when to hand them over.
    /// * `sender` - The engine's side of the barrier.
    pub fn new(engine: String, config: &CompareConfig, sender: CheckpointSender) -> Self {
        Self {
            engine,
            trigger: IntervalTrigger::new(config.trigger),
            outputs: config.outputs.clone(),
            params: config.params,
            pending: BTreeMap::new(),
            seq: 0,
            sender,
        }
    }

    fn wanted(&self, key: &str) -> bool {
        match &self.outputs {
            Some(outputs) => outputs.iter().any(|o| o == key),
            None => true,
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.sender.is_cancelled() {
            return Err(TrainErr::Aborted);
        }

        Ok(())
    }
}

impl StepHook for Collector {
    fn on_outputs(&mut self, outputs: &Outputs) -> Result<()> {
        self.check_cancelled()?;

        for (key, value) in outputs {
            if self.wanted(key) {
                self.pending.insert(format!("output/{key}"), value.clone());
            }
        }

        Ok(())
    }

    fn on_iteration_end(
        &mut self,
        progress: &Progress,
        params: &dyn Fn() -> NamedParams,
    ) -> Result<()> {
        self.check_cancelled()?;

        if !self.trigger.fire(progress) {
            return Ok(());
        }

        let mut records = std::mem::take(&mut self.pending);
        if self.params {
            for (name, value) in params() {
                records.insert(format!("param/{name}"), value);
            }
        }

        debug!(
            engine = self.engine.as_str(),
            seq = self.seq,
            iteration = progress.iteration,
            records = records.len();
            "reached checkpoint"
        );

        let checkpoint = Checkpoint {
            seq: self.seq,
            iteration: progress.iteration,
            records,
        };

        self.seq += 1;
        self.sender.send(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use tokio::runtime::Runtime;
    use training::config::TriggerSpec;

    use super::*;
    use crate::barrier::ReportBarrier;

    fn outputs(a: f64) -> Outputs {
        Outputs::from([
            ("a".to_string(), Value::from(a)),
            ("b".to_string(), Value::from(-a)),
        ])
    }

    fn params() -> NamedParams {
        vec![("w".to_string(), Value::from(0.5))]
    }

    #[test]
    fn test_checkpoints_follow_the_trigger() {
        let config = CompareConfig {
            trigger: TriggerSpec::iterations(NonZeroUsize::new(2).unwrap()),
            outputs: Some(vec!["a".to_string()]),
            params: true,
            ..CompareConfig::default()
        };

        let barrier = ReportBarrier::new(None);
        let (tx, mut rx) = barrier.channel();
        let mut collector = Collector::new("cpu".to_string(), &config, tx);
        let mut progress = Progress::new(10);

        for i in 1..=5 {
            collector.on_outputs(&outputs(i as f64)).unwrap();
            progress.iteration = i;
            collector.on_iteration_end(&progress, &params).unwrap();
        }
        drop(collector);

        let checkpoints = Runtime::new().unwrap().block_on(async {
            let mut checkpoints = Vec::new();
            while let Some(cp) = rx.recv().await {
                checkpoints.push(cp);
            }
            checkpoints
        });

        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints[0].iteration, 2);
        assert_eq!(checkpoints[1].seq, 1);

        let keys: Vec<&str> = checkpoints[1].records.keys().map(String::as_str).collect();
        assert_eq!(keys, ["output/a", "param/w"]);
        assert_eq!(checkpoints[1].records["output/a"], Value::from(4.0));
    }

    #[test]
    fn test_cancelled_comparison_aborts_the_engine() {
        let barrier = ReportBarrier::new(None);
        let (tx, _rx) = barrier.channel();
        let mut collector = Collector::new("cpu".to_string(), &CompareConfig::default(), tx);

        barrier.cancel();
        assert_eq!(collector.on_outputs(&outputs(1.0)), Err(TrainErr::Aborted));
    }
}
