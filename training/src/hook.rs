use crate::{
    Result,
    report::{Outputs, Value},
    trigger::Progress,
};

/// Named parameter values of a model, in a stable order.
pub type NamedParams = Vec<(String, Value)>;

/// Observes a run from the inside without touching the code that produces the values.
///
/// The trainer and the evaluator call the hook of the engine they run for, so
/// every engine can be handed its own hook instead of sharing global state.
pub trait StepHook {
    /// Called with the outputs of every completed step.
    fn on_outputs(&mut self, _outputs: &Outputs) -> Result<()> {
        Ok(())
    }

    /// Called once an iteration and its extensions completed.
    ///
    /// # Arguments
    /// * `progress` - The progress after the iteration.
    /// * `params` - Produces the current parameters of the model, on demand.
    fn on_iteration_end(
        &mut self,
        _progress: &Progress,
        _params: &dyn Fn() -> NamedParams,
    ) -> Result<()> {
        Ok(())
    }
}

/// A hook that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHook;

impl StepHook for NoHook {}

/// Forwards outputs only, so an evaluation nested in a training iteration
/// never looks like an iteration boundary of its own.
pub(crate) struct OutputsOnly<'a, 'h>(pub &'a mut (dyn StepHook + 'h));

impl StepHook for OutputsOnly<'_, '_> {
    fn on_outputs(&mut self, outputs: &Outputs) -> Result<()> {
        self.0.on_outputs(outputs)
    }
}
