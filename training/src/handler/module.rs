use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Result, hook::NamedParams, report::Outputs};

/// A model shared between a trainer and its evaluator.
pub type Shared<M> = Arc<Mutex<M>>;

/// Wraps `module` so a trainer and an evaluator can both drive it.
pub fn shared<M>(module: M) -> Shared<M> {
    Arc::new(Mutex::new(module))
}

/// The model a handler trains, the numerics behind it are opaque to the trainer.
pub trait Module<B>: Send {
    /// Runs the model over `batch`.
    fn forward(&mut self, batch: &B) -> Result<Outputs>;

    /// Writes the gradient of the last forward pass into `grad`.
    ///
    /// # Arguments
    /// * `batch` - The batch the outputs were computed from.
    /// * `outputs` - The outputs of `forward`.
    /// * `grad` - A buffer as long as `params`.
    fn backward(&mut self, _batch: &B, _outputs: &Outputs, _grad: &mut [f32]) -> Result<()> {
        Ok(())
    }

    /// The flat trainable parameters.
    fn params(&self) -> &[f32] {
        &[]
    }

    fn params_mut(&mut self) -> &mut [f32] {
        &mut []
    }

    /// Switches between training and evaluation behaviour.
    fn set_training(&mut self, _training: bool) {}

    /// The parameters keyed by name, used for comparisons.
    fn named_parameters(&self) -> NamedParams {
        Vec::new()
    }
}
