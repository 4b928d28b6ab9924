mod module;
mod optimizer;
mod strategies;

pub use module::{Module, Shared, shared};
pub use optimizer::{GradientDescent, Optimizer};
pub use strategies::{DeferredHandler, EvalModuleHandler, ModuleHandler};

use crate::{
    Result,
    hook::NamedParams,
    report::{Observation, Outputs},
    step::{Completion, StepHandle, StepOutcome},
    trigger::Progress,
};

/// Implements the work of a training iteration for a `Trainer`.
///
/// Only `train_step` is required, the other lifecycle hooks default to doing nothing.
pub trait StepHandler<B>: Send {
    /// Called once, on the first `run` of the trainer.
    ///
    /// # Arguments
    /// * `train_len` - The amount of iterations per epoch.
    fn train_setup(&mut self, _train_len: usize) -> Result<()> {
        Ok(())
    }

    /// Called before the first iteration of every epoch.
    fn train_epoch_begin(&mut self, _progress: &Progress) -> Result<()> {
        Ok(())
    }

    /// Issues a training iteration.
    ///
    /// # Arguments
    /// * `handle` - Completes this iteration, either now or from a later `poll_completions`.
    /// * `batch` - The input of the iteration.
    /// * `observation` - The observation of this iteration.
    ///
    /// # Returns
    /// Whether the iteration completed inside this call or was deferred.
    fn train_step(
        &mut self,
        handle: StepHandle,
        batch: &B,
        observation: &mut Observation,
    ) -> Result<StepOutcome>;

    /// Hands the completions of deferred iterations back to the trainer, oldest first.
    ///
    /// # Arguments
    /// * `block` - If set, wait until at least one pending iteration completes.
    /// * `out` - Where to push the completions.
    fn poll_completions(&mut self, _block: bool, _out: &mut Vec<Completion>) -> Result<()> {
        Ok(())
    }

    /// Called when an iteration completes, with the observation of that iteration.
    fn train_post_step(
        &mut self,
        _index: usize,
        _batch: &B,
        _outputs: &Outputs,
        _observation: &mut Observation,
    ) -> Result<()> {
        Ok(())
    }

    /// Called after the last iteration of every epoch was issued.
    ///
    /// Handlers that defer completions must push every outstanding one to `out`.
    fn train_epoch_end(&mut self, _progress: &Progress, _out: &mut Vec<Completion>) -> Result<()> {
        Ok(())
    }

    /// Called right before the attached evaluator runs.
    fn train_validation_begin(&mut self, _progress: &Progress) -> Result<()> {
        Ok(())
    }

    /// Called right after the attached evaluator ran.
    ///
    /// # Arguments
    /// * `summary` - The mean of the values the evaluation reported.
    fn train_validation_end(&mut self, _progress: &Progress, _summary: &Observation) -> Result<()> {
        Ok(())
    }

    /// The current parameters of the trained model.
    fn named_parameters(&self) -> NamedParams {
        Vec::new()
    }
}

/// Implements the work of an evaluation iteration for an `Evaluator`.
pub trait EvalHandler<B>: Send {
    /// Called once, when the evaluator first runs.
    ///
    /// # Arguments
    /// * `eval_len` - The amount of iterations per pass.
    fn eval_setup(&mut self, _eval_len: usize) -> Result<()> {
        Ok(())
    }

    /// Called before every pass.
    fn eval_loop_begin(&mut self) -> Result<()> {
        Ok(())
    }

    /// Runs a single evaluation iteration.
    fn eval_step(
        &mut self,
        index: usize,
        batch: &B,
        observation: &mut Observation,
    ) -> Result<Outputs>;

    /// Called after every evaluation iteration.
    fn eval_post_step(
        &mut self,
        _index: usize,
        _batch: &B,
        _outputs: &Outputs,
        _observation: &mut Observation,
    ) -> Result<()> {
        Ok(())
    }

    /// Called after every pass.
    fn eval_loop_end(&mut self) -> Result<()> {
        Ok(())
    }

    /// The current parameters of the evaluated model.
    fn named_parameters(&self) -> NamedParams {
        Vec::new()
    }
}
