use std::num::NonZeroUsize;

use super::{Batch, DataSource, InMemoryDataset};

/// Splits an `InMemoryDataset` into consecutive batches, the last one may be shorter.
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: InMemoryDataset,
    batch_size: NonZeroUsize,
}

impl DataLoader {
    /// Creates a new `DataLoader`.
    ///
    /// # Arguments
    /// * `dataset` - The samples to batch.
    /// * `batch_size` - The maximum amount of samples per batch.
    pub fn new(dataset: InMemoryDataset, batch_size: NonZeroUsize) -> Self {
        Self {
            dataset,
            batch_size,
        }
    }

    pub fn batch_size(&self) -> NonZeroUsize {
        self.batch_size
    }
}

impl DataSource for DataLoader {
    type Batch = Batch;

    fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size.get())
    }

    fn batches(&self) -> Box<dyn Iterator<Item = Batch> + '_> {
        let xs = self.dataset.xs().chunks(self.batch_size.get());
        let ys = self.dataset.ys().chunks(self.batch_size.get());

        Box::new(xs.zip(ys).map(|(xs, ys)| Batch {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
        }))
    }
}
