mod dataset;
mod loader;

pub use dataset::{Batch, InMemoryDataset};
pub use loader::DataLoader;

/// A finite, re-iterable sequence of batches.
///
/// Every call to `batches` starts a new pass from the beginning, which is how
/// the trainer restarts a source that runs dry in the middle of an epoch.
pub trait DataSource {
    type Batch;

    /// The amount of batches in a single pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a new pass over the batches.
    fn batches(&self) -> Box<dyn Iterator<Item = Self::Batch> + '_>;
}

impl<T: Clone> DataSource for Vec<T> {
    type Batch = T;

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn batches(&self) -> Box<dyn Iterator<Item = T> + '_> {
        Box::new(self.iter().cloned())
    }
}
