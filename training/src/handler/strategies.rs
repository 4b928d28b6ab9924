use std::collections::VecDeque;

use log::debug;

use super::{EvalHandler, Module, Optimizer, Shared, StepHandler};
use crate::{
    Result,
    hook::NamedParams,
    report::{Observation, Outputs},
    step::{Completion, StepHandle, StepOutcome},
    trigger::Progress,
};

/// Runs the forward pass, the backward pass and the optimizer update of a single iteration.
fn train_module<B, M, O>(
    module: &Shared<M>,
    optimizer: &mut O,
    grad: &mut Vec<f32>,
    batch: &B,
) -> Result<Outputs>
where
    M: Module<B>,
    O: Optimizer,
{
    let mut module = module.lock();
    let outputs = module.forward(batch)?;

    let size = module.params().len();
    if size == 0 {
        return Ok(outputs);
    }

    grad.clear();
    grad.resize(size, 0.);
    module.backward(batch, &outputs, grad)?;
    optimizer.update_params(grad, module.params_mut())?;

    Ok(outputs)
}

/// Reports every scalar output under `prefix`.
fn report_outputs(prefix: &str, outputs: &Outputs, observation: &mut Observation) {
    for (key, value) in outputs {
        if let Some(v) = value.as_scalar() {
            observation.report(format!("{prefix}{key}"), v);
        }
    }
}

/// Trains a module completing every iteration inside `train_step`.
pub struct ModuleHandler<M, O> {
    module: Shared<M>,
    optimizer: O,
    grad: Vec<f32>,
}

impl<M, O> ModuleHandler<M, O> {
    /// Creates a new `ModuleHandler`.
    ///
    /// # Arguments
    /// * `module` - The model to train.
    /// * `optimizer` - Updates the parameters of the model.
    pub fn new(module: Shared<M>, optimizer: O) -> Self {
        Self {
            module,
            optimizer,
            grad: Vec::new(),
        }
    }

    pub fn module(&self) -> &Shared<M> {
        &self.module
    }
}

impl<B, M, O> StepHandler<B> for ModuleHandler<M, O>
where
    M: Module<B>,
    O: Optimizer,
{
    fn train_epoch_begin(&mut self, _progress: &Progress) -> Result<()> {
        self.module.lock().set_training(true);
        Ok(())
    }

    fn train_step(
        &mut self,
        handle: StepHandle,
        batch: &B,
        _observation: &mut Observation,
    ) -> Result<StepOutcome> {
        let outputs = train_module(&self.module, &mut self.optimizer, &mut self.grad, batch)?;
        Ok(StepOutcome::Completed(handle.complete(outputs)))
    }

    fn train_post_step(
        &mut self,
        _index: usize,
        _batch: &B,
        outputs: &Outputs,
        observation: &mut Observation,
    ) -> Result<()> {
        report_outputs("train/", outputs, observation);
        Ok(())
    }

    fn named_parameters(&self) -> NamedParams {
        self.module.lock().named_parameters()
    }
}

/// Trains a module as if it ran on an asynchronous device, every iteration
/// completes `lag` iterations after it was issued.
///
/// The work itself runs when the iteration is issued, only the hand back is
/// deferred, which is enough to exercise the ordering of deferred completions.
pub struct DeferredHandler<M, O> {
    inner: ModuleHandler<M, O>,
    lag: usize,
    in_flight: VecDeque<Completion>,
}

impl<M, O> DeferredHandler<M, O> {
    /// Creates a new `DeferredHandler`.
    ///
    /// # Arguments
    /// * `module` - The model to train.
    /// * `optimizer` - Updates the parameters of the model.
    /// * `lag` - The amount of iterations that stay in flight.
    pub fn new(module: Shared<M>, optimizer: O, lag: usize) -> Self {
        Self {
            inner: ModuleHandler::new(module, optimizer),
            lag,
            in_flight: VecDeque::new(),
        }
    }

    pub fn module(&self) -> &Shared<M> {
        self.inner.module()
    }
}

impl<B, M, O> StepHandler<B> for DeferredHandler<M, O>
where
    M: Module<B>,
    O: Optimizer,
{
    fn train_epoch_begin(&mut self, progress: &Progress) -> Result<()> {
        StepHandler::<B>::train_epoch_begin(&mut self.inner, progress)
    }

    fn train_step(
        &mut self,
        handle: StepHandle,
        batch: &B,
        _observation: &mut Observation,
    ) -> Result<StepOutcome> {
        let inner = &mut self.inner;
        let outputs = train_module(&inner.module, &mut inner.optimizer, &mut inner.grad, batch)?;
        self.in_flight.push_back(handle.complete(outputs));
        Ok(StepOutcome::Deferred)
    }

    fn poll_completions(&mut self, block: bool, out: &mut Vec<Completion>) -> Result<()> {
        while self.in_flight.len() > self.lag || (block && !self.in_flight.is_empty()) {
            let Some(completion) = self.in_flight.pop_front() else {
                break;
            };

            out.push(completion);

            // A blocking poll only needs to free a single slot.
            if block {
                break;
            }
        }

        Ok(())
    }

    fn train_post_step(
        &mut self,
        index: usize,
        batch: &B,
        outputs: &Outputs,
        observation: &mut Observation,
    ) -> Result<()> {
        self.inner.train_post_step(index, batch, outputs, observation)
    }

    fn train_epoch_end(&mut self, _progress: &Progress, out: &mut Vec<Completion>) -> Result<()> {
        debug!(pending = self.in_flight.len(); "draining deferred iterations");
        out.extend(self.in_flight.drain(..));
        Ok(())
    }

    fn named_parameters(&self) -> NamedParams {
        StepHandler::<B>::named_parameters(&self.inner)
    }
}

/// Evaluates a module, switching it to evaluation mode for the length of every pass.
pub struct EvalModuleHandler<M> {
    module: Shared<M>,
}

impl<M> EvalModuleHandler<M> {
    pub fn new(module: Shared<M>) -> Self {
        Self { module }
    }
}

impl<B, M> EvalHandler<B> for EvalModuleHandler<M>
where
    M: Module<B>,
{
    fn eval_loop_begin(&mut self) -> Result<()> {
        self.module.lock().set_training(false);
        Ok(())
    }

    fn eval_step(
        &mut self,
        _index: usize,
        batch: &B,
        _observation: &mut Observation,
    ) -> Result<Outputs> {
        self.module.lock().forward(batch)
    }

    fn eval_post_step(
        &mut self,
        _index: usize,
        _batch: &B,
        outputs: &Outputs,
        observation: &mut Observation,
    ) -> Result<()> {
        report_outputs("val/", outputs, observation);
        Ok(())
    }

    fn eval_loop_end(&mut self) -> Result<()> {
        self.module.lock().set_training(true);
        Ok(())
    }

    fn named_parameters(&self) -> NamedParams {
        self.module.lock().named_parameters()
    }
}
