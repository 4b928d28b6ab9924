use crate::{
    config::TrainerConfig,
    evaluator::Evaluator,
    handler::{DeferredHandler, EvalModuleHandler, Module, ModuleHandler, Optimizer, Shared},
    trainer::Trainer,
};

/// Creates a `Trainer` that completes every iteration synchronously.
///
/// # Arguments
/// * `module` - The model to train, shared with any evaluator created from it.
/// * `optimizer` - Updates the parameters of the model.
/// * `config` - The schedule of the run.
pub fn create_trainer<B, M, O>(
    module: Shared<M>,
    optimizer: O,
    config: TrainerConfig,
) -> Trainer<B, ModuleHandler<M, O>>
where
    B: 'static,
    M: Module<B>,
    O: Optimizer,
{
    Trainer::new(ModuleHandler::new(module, optimizer), config)
}

/// Creates a `Trainer` whose iterations complete `lag` iterations after being issued.
///
/// # Arguments
/// * `module` - The model to train.
/// * `optimizer` - Updates the parameters of the model.
/// * `lag` - The amount of iterations that stay in flight.
/// * `config` - The schedule of the run.
pub fn create_deferred_trainer<B, M, O>(
    module: Shared<M>,
    optimizer: O,
    lag: usize,
    config: TrainerConfig,
) -> Trainer<B, DeferredHandler<M, O>>
where
    B: 'static,
    M: Module<B>,
    O: Optimizer,
{
    Trainer::new(DeferredHandler::new(module, optimizer, lag), config)
}

/// Creates an `Evaluator` for `module`.
pub fn create_evaluator<B, M>(module: Shared<M>) -> Evaluator<B, EvalModuleHandler<M>>
where
    M: Module<B>,
{
    Evaluator::new(EvalModuleHandler::new(module))
}
