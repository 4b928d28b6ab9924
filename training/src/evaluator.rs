use std::marker::PhantomData;

use log::{debug, info};

use crate::{
    Result, TrainErr,
    data::DataSource,
    handler::EvalHandler,
    hook::{NoHook, StepHook},
    report::{Observation, Summary},
    trigger::Progress,
};

/// Runs a single pass over validation data, without optimizer updates.
pub struct Evaluator<B, H> {
    handler: H,
    initialized: bool,
    _batch: PhantomData<fn(&B)>,
}

impl<B, H> Evaluator<B, H>
where
    H: EvalHandler<B>,
{
    /// Creates a new `Evaluator`.
    ///
    /// # Arguments
    /// * `handler` - Implements the evaluation iterations.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            initialized: false,
            _batch: PhantomData,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Runs a full pass over `source`.
    ///
    /// # Arguments
    /// * `source` - The validation data.
    /// * `eval_len` - The amount of iterations of the pass, defaults to the length of `source`.
    ///
    /// # Returns
    /// The mean of every scalar value reported during the pass.
    pub fn run<S>(&mut self, source: &S, eval_len: Option<usize>) -> Result<Observation>
    where
        S: DataSource<Batch = B>,
    {
        self.run_pass(source, eval_len, &mut NoHook, false)
    }

    /// Runs a full pass letting `hook` observe it.
    ///
    /// # Arguments
    /// * `source` - The validation data.
    /// * `eval_len` - The amount of iterations of the pass, defaults to the length of `source`.
    /// * `hook` - Observes the outputs of every iteration.
    /// * `standalone` - Whether the pass is a run of its own, in which case its
    ///   iterations are also reported as iteration boundaries.
    pub(crate) fn run_pass(
        &mut self,
        source: &dyn DataSource<Batch = B>,
        eval_len: Option<usize>,
        hook: &mut dyn StepHook,
        standalone: bool,
    ) -> Result<Observation> {
        let eval_len = eval_len.unwrap_or_else(|| source.len());

        if !self.initialized {
            self.handler.eval_setup(eval_len)?;
            self.initialized = true;
        }

        info!(iterations = eval_len; "starting evaluation");
        self.handler.eval_loop_begin()?;

        let mut progress = Progress::new(eval_len);
        let mut summary = Summary::new();
        let mut batches = source.batches();

        for idx in 0..eval_len {
            let batch = match batches.next() {
                Some(batch) => batch,
                None => {
                    batches = source.batches();
                    batches.next().ok_or(TrainErr::EmptySource)?
                }
            };

            let mut observation = Observation::new();
            let outputs = self.handler.eval_step(idx, &batch, &mut observation)?;
            self.handler
                .eval_post_step(idx, &batch, &outputs, &mut observation)?;

            hook.on_outputs(&outputs)?;
            summary.add(&observation);
            progress.iteration += 1;

            if standalone {
                let handler = &self.handler;
                hook.on_iteration_end(&progress, &|| handler.named_parameters())?;
            }

            debug!(index = idx; "evaluation iteration done");
        }

        self.handler.eval_loop_end()?;
        Ok(summary.compute())
    }
}

/// The evaluator a trainer runs as one of its extensions, with the batch type
/// as the only visible type.
pub(crate) trait Validator<B>: Send {
    fn validate(
        &mut self,
        source: &dyn DataSource<Batch = B>,
        eval_len: Option<usize>,
        hook: &mut dyn StepHook,
    ) -> Result<Observation>;

    fn setup(&mut self, eval_len: usize) -> Result<()>;
}

impl<B, H> Validator<B> for Evaluator<B, H>
where
    H: EvalHandler<B>,
{
    fn validate(
        &mut self,
        source: &dyn DataSource<Batch = B>,
        eval_len: Option<usize>,
        hook: &mut dyn StepHook,
    ) -> Result<Observation> {
        self.run_pass(source, eval_len, hook, false)
    }

    fn setup(&mut self, eval_len: usize) -> Result<()> {
        if !self.initialized {
            self.handler.eval_setup(eval_len)?;
            self.initialized = true;
        }

        Ok(())
    }
}
