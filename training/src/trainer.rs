use std::{num::NonZeroUsize, time::Instant};

use log::{debug, info, trace};

use crate::{
    Result, TrainErr,
    config::{TrainerConfig, TriggerSpec},
    data::DataSource,
    evaluator::{Evaluator, Validator},
    handler::{EvalHandler, StepHandler},
    hook::{NoHook, OutputsOnly, StepHook},
    manager::{Extension, ExtensionsManager, PRIORITY_WRITER, Slot},
    profiler::Profiler,
    report::Observation,
    step::{Completion, StepContext, StepHandle, StepOutcome, StepQueue, StepSpans},
    trigger::{IntervalTrigger, Progress, StopTrigger, Trigger},
};

/// The lifecycle of a `Trainer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Stopped,
}

/// Drives epochs of training iterations until the stop trigger holds.
///
/// Every iteration is handed to a `StepHandler`. The handler may complete it
/// right away or defer the completion, in which case the trainer keeps issuing
/// iterations and completes the pending ones strictly in the order they were
/// issued.
pub struct Trainer<B, H> {
    handler: H,
    manager: ExtensionsManager,
    evaluator: Option<Box<dyn Validator<B>>>,
    evaluator_trigger: TriggerSpec,
    max_in_flight: Option<NonZeroUsize>,
    queue: StepQueue<B>,
    profiler: Profiler,
    state: RunState,
    last_observation: Observation,
}

impl<B, H> Trainer<B, H>
where
    B: 'static,
    H: StepHandler<B>,
{
    /// Creates a new `Trainer`.
    ///
    /// # Arguments
    /// * `handler` - Implements the training iterations.
    /// * `config` - The stop condition, the evaluation schedule and the in flight bound.
    pub fn new(handler: H, config: TrainerConfig) -> Self {
        Self {
            handler,
            manager: ExtensionsManager::new(StopTrigger::new(config.stop_trigger)),
            evaluator: None,
            evaluator_trigger: config.evaluator_trigger,
            max_in_flight: config.max_in_flight,
            queue: StepQueue::new(),
            profiler: Profiler::new(),
            state: RunState::NotStarted,
            last_observation: Observation::new(),
        }
    }

    /// Attaches an evaluator that runs on the configured evaluator trigger.
    pub fn with_evaluator<E>(mut self, evaluator: Evaluator<B, E>) -> Self
    where
        E: EvalHandler<B> + 'static,
    {
        self.evaluator = Some(Box::new(evaluator));
        self
    }

    /// Registers an extension.
    ///
    /// # Arguments
    /// * `extension` - The extension to register.
    /// * `trigger` - When the extension runs.
    /// * `priority` - Extensions with higher priority run first.
    pub fn extend<E, T>(&mut self, extension: E, trigger: T, priority: i32)
    where
        E: Extension + 'static,
        T: Trigger + 'static,
    {
        self.manager.extend(extension, trigger, priority);
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn progress(&self) -> &Progress {
        self.manager.progress()
    }

    pub fn epoch(&self) -> usize {
        self.progress().epoch()
    }

    pub fn iteration(&self) -> usize {
        self.progress().iteration
    }

    pub fn epoch_detail(&self) -> f64 {
        self.progress().epoch_detail()
    }

    pub fn is_before_training(&self) -> bool {
        self.progress().is_before_training()
    }

    pub fn stop_trigger(&self) -> &StopTrigger {
        self.manager.stop_trigger()
    }

    pub fn has_evaluator(&self) -> bool {
        self.evaluator.is_some()
    }

    pub fn manager(&self) -> &ExtensionsManager {
        &self.manager
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn profiler_mut(&mut self) -> &mut Profiler {
        &mut self.profiler
    }

    /// The observation of the most recently completed iteration.
    pub fn last_observation(&self) -> &Observation {
        &self.last_observation
    }

    /// Runs the training loop until the stop trigger holds.
    ///
    /// Calling `run` again after a previous call returned resumes from the same
    /// counters, a stopped trainer returns right away.
    ///
    /// # Arguments
    /// * `train` - The training data, restarted whenever it runs dry mid epoch.
    /// * `val` - The validation data for the attached evaluator.
    /// * `train_len` - The amount of iterations per epoch, defaults to the length of `train`.
    /// * `eval_len` - The amount of iterations per evaluation.
    ///
    /// # Errors
    /// A `MissingValidationSource` error if an evaluator is attached but `val` is `None`,
    /// an `OutOfOrderCompletion` error if the handler completes iterations out of order, or
    /// whatever error the handler or an extension returns.
    pub fn run<S>(
        &mut self,
        train: &S,
        val: Option<&dyn DataSource<Batch = B>>,
        train_len: Option<usize>,
        eval_len: Option<usize>,
    ) -> Result<()>
    where
        S: DataSource<Batch = B>,
    {
        self.run_observed(train, val, train_len, eval_len, &mut NoHook)
    }

    /// Runs the training loop while `hook` observes it.
    pub(crate) fn run_observed(
        &mut self,
        train: &dyn DataSource<Batch = B>,
        val: Option<&dyn DataSource<Batch = B>>,
        train_len: Option<usize>,
        eval_len: Option<usize>,
        hook: &mut dyn StepHook,
    ) -> Result<()> {
        let train_len = train_len.unwrap_or_else(|| train.len());

        if train_len == 0 {
            return Err(TrainErr::InvalidConfig(
                "an epoch needs at least one iteration".to_string(),
            ));
        }

        if self.evaluator.is_some() && val.is_none() {
            return Err(TrainErr::MissingValidationSource);
        }

        if !self.manager.is_initialized() {
            self.setup(train_len, val, eval_len)?;
        }

        self.state = RunState::Running;
        info!(
            iteration = self.iteration(),
            train_len = train_len;
            "starting training"
        );

        while !self.manager.stop_requested() {
            self.run_epoch(train, val, eval_len, hook)?;
        }

        self.state = RunState::Stopped;
        info!(
            epoch = self.epoch(),
            iteration = self.iteration();
            "training stopped"
        );

        Ok(())
    }

    fn setup(
        &mut self,
        train_len: usize,
        val: Option<&dyn DataSource<Batch = B>>,
        eval_len: Option<usize>,
    ) -> Result<()> {
        self.manager.setup(train_len);

        if let Some(evaluator) = self.evaluator.as_mut() {
            let trigger = IntervalTrigger::new(self.evaluator_trigger);
            self.manager
                .register_evaluator(Box::new(trigger), PRIORITY_WRITER);

            if let Some(val) = val {
                evaluator.setup(eval_len.unwrap_or_else(|| val.len()))?;
            }
        }

        self.handler.train_setup(train_len)
    }

    fn run_epoch(
        &mut self,
        train: &dyn DataSource<Batch = B>,
        val: Option<&dyn DataSource<Batch = B>>,
        eval_len: Option<usize>,
        hook: &mut dyn StepHook,
    ) -> Result<()> {
        let progress = *self.manager.progress();
        debug!(epoch = progress.epoch(); "epoch begins");
        self.handler.train_epoch_begin(&progress)?;

        // The pass must start after `train_epoch_begin`, handlers may reshuffle there.
        let mut batches = train.batches();

        for idx in 0..progress.iters_per_epoch {
            let iteration = self.profiler.open("iteration", idx);

            let get_data = self.profiler.open("get_data", idx);
            let batch = match batches.next() {
                Some(batch) => batch,
                None => {
                    debug!(index = idx; "restarting exhausted data source");
                    batches = train.batches();
                    batches.next().ok_or(TrainErr::EmptySource)?
                }
            };
            self.profiler.close(get_data, false);

            let spans = StepSpans {
                iteration,
                run_iteration: self.profiler.open("run_iteration", idx),
                train_step: self.profiler.open("train_step", idx),
            };

            self.queue.push(StepContext {
                index: idx,
                input: batch,
                start: Instant::now(),
                observation: Observation::new(),
                spans,
            });

            let outcome = {
                let Some(ctx) = self.queue.back_mut() else {
                    return Err(TrainErr::NoPendingStep { got: idx });
                };

                self.handler
                    .train_step(StepHandle::new(idx), &ctx.input, &mut ctx.observation)?
            };

            match outcome {
                StepOutcome::Completed(completion) => {
                    self.complete_step(completion, false, val, eval_len, hook)?;
                }
                StepOutcome::Deferred => {
                    trace!(index = idx; "iteration deferred");
                }
            }

            self.poll(false, val, eval_len, hook)?;

            if let Some(limit) = self.max_in_flight {
                while self.queue.len() >= limit.get() {
                    if self.poll(true, val, eval_len, hook)? == 0 {
                        return Err(TrainErr::InFlightLimit { limit: limit.get() });
                    }
                }
            }

            if progress.is_epoch_last_iter(idx) || self.issued_all() {
                break;
            }
        }

        let progress = *self.manager.progress();
        let mut pending = Vec::new();
        self.handler.train_epoch_end(&progress, &mut pending)?;

        for completion in pending {
            self.complete_step(completion, true, val, eval_len, hook)?;
        }

        if !self.queue.is_empty() {
            let left = self.queue.len();
            self.queue.clear();
            return Err(TrainErr::Handler(format!(
                "{left} iterations were still pending at the end of the epoch"
            )));
        }

        Ok(())
    }

    /// Whether the completed and the still pending iterations reach the stop trigger.
    ///
    /// Pending iterations count as issued, so a deferring handler never gets
    /// more iterations than the stop trigger allows.
    fn issued_all(&self) -> bool {
        let progress = self.manager.progress();
        let total = self
            .manager
            .stop_trigger()
            .total_iterations(progress.iters_per_epoch);

        progress.iteration + self.queue.len() >= total
    }

    /// Asks the handler for deferred completions and completes them.
    ///
    /// # Returns
    /// The amount of completed iterations.
    fn poll(
        &mut self,
        block: bool,
        val: Option<&dyn DataSource<Batch = B>>,
        eval_len: Option<usize>,
        hook: &mut dyn StepHook,
    ) -> Result<usize> {
        let mut completions = Vec::new();
        self.handler.poll_completions(block, &mut completions)?;

        let completed = completions.len();
        for completion in completions {
            self.complete_step(completion, true, val, eval_len, hook)?;
        }

        Ok(completed)
    }

    /// Completes the oldest pending iteration.
    ///
    /// The observation of the iteration being completed is the one its
    /// post step, its extensions and the hook see, even when newer iterations
    /// were issued in the meantime.
    ///
    /// # Arguments
    /// * `completion` - The results of the iteration.
    /// * `deferred` - Whether the iteration outlived its `train_step` call.
    fn complete_step(
        &mut self,
        completion: Completion,
        deferred: bool,
        val: Option<&dyn DataSource<Batch = B>>,
        eval_len: Option<usize>,
        hook: &mut dyn StepHook,
    ) -> Result<()> {
        let (index, outputs) = completion.into_parts();
        let StepContext {
            input,
            start,
            mut observation,
            spans,
            ..
        } = self.queue.pop(index)?;

        if deferred {
            self.profiler.close(spans.train_step, true);
        }

        self.handler
            .train_post_step(index, &input, &outputs, &mut observation)?;
        hook.on_outputs(&outputs)?;
        observation.report("elapsed_time", start.elapsed().as_secs_f64());

        let progress = self.manager.complete_iteration();
        self.run_extensions(&progress, &mut observation, val, eval_len, hook)?;

        let handler = &self.handler;
        hook.on_iteration_end(&progress, &|| handler.named_parameters())?;

        if !deferred {
            self.profiler.close(spans.train_step, false);
        }
        self.profiler.close(spans.run_iteration, deferred);
        self.profiler.close(spans.iteration, deferred);

        self.last_observation = observation;
        Ok(())
    }

    fn run_extensions(
        &mut self,
        progress: &Progress,
        observation: &mut Observation,
        val: Option<&dyn DataSource<Batch = B>>,
        eval_len: Option<usize>,
        hook: &mut dyn StepHook,
    ) -> Result<()> {
        for idx in self.manager.due() {
            let (name, slot) = self.manager.slot_mut(idx);
            trace!(extension = name; "running extension");

            match slot {
                Slot::User(extension) => extension.call(progress, observation)?,
                Slot::Evaluator => {
                    let Some(evaluator) = self.evaluator.as_mut() else {
                        continue;
                    };
                    let val = val.ok_or(TrainErr::MissingValidationSource)?;

                    self.handler.train_validation_begin(progress)?;
                    let summary = evaluator.validate(val, eval_len, &mut OutputsOnly(&mut *hook))?;
                    self.handler.train_validation_end(progress, &summary)?;

                    observation.extend(summary);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Outputs;

    /// Completes every iteration right away.
    #[derive(Default)]
    struct Immediate {
        setups: usize,
        epochs_begun: usize,
        steps: Vec<(usize, u32)>,
    }

    impl StepHandler<u32> for Immediate {
        fn train_setup(&mut self, _: usize) -> Result<()> {
            self.setups += 1;
            Ok(())
        }

        fn train_epoch_begin(&mut self, _: &Progress) -> Result<()> {
            self.epochs_begun += 1;
            Ok(())
        }

        fn train_step(
            &mut self,
            handle: StepHandle,
            batch: &u32,
            obs: &mut Observation,
        ) -> Result<StepOutcome> {
            self.steps.push((handle.index(), *batch));
            obs.report("batch", f64::from(*batch));
            Ok(StepOutcome::Completed(handle.complete(Outputs::new())))
        }
    }

    fn config(epochs: usize) -> TrainerConfig {
        TrainerConfig::with_epochs(NonZeroUsize::new(epochs).unwrap())
    }

    #[test]
    fn test_runs_train_len_iterations_per_epoch() {
        let mut trainer = Trainer::new(Immediate::default(), config(2));
        trainer.run(&vec![1u32, 2, 3], None, None, None).unwrap();

        assert_eq!(trainer.iteration(), 6);
        assert_eq!(trainer.epoch(), 2);
        assert_eq!(trainer.state(), RunState::Stopped);
        assert_eq!(trainer.handler().epochs_begun, 2);
    }

    #[test]
    fn test_exhausted_source_restarts_mid_epoch() {
        let mut trainer = Trainer::new(Immediate::default(), config(1));
        trainer.run(&vec![1u32, 2], None, Some(5), None).unwrap();

        let batches: Vec<u32> = trainer.handler().steps.iter().map(|s| s.1).collect();
        assert_eq!(batches, [1, 2, 1, 2, 1]);
        assert_eq!(trainer.iteration(), 5);
    }

    #[test]
    fn test_indices_restart_every_epoch() {
        let mut trainer = Trainer::new(Immediate::default(), config(2));
        trainer.run(&vec![7u32, 8], None, None, None).unwrap();

        let indices: Vec<usize> = trainer.handler().steps.iter().map(|s| s.0).collect();
        assert_eq!(indices, [0, 1, 0, 1]);
    }

    #[test]
    fn test_repeated_runs_reuse_the_manager() {
        let mut trainer = Trainer::new(Immediate::default(), config(1));
        assert_eq!(trainer.state(), RunState::NotStarted);

        trainer.run(&vec![1u32], None, None, None).unwrap();
        trainer.run(&vec![1u32], None, None, None).unwrap();

        assert_eq!(trainer.handler().setups, 1);
        assert_eq!(trainer.iteration(), 1);
    }

    #[test]
    fn test_observation_of_last_iteration_is_kept() {
        let mut trainer = Trainer::new(Immediate::default(), config(1));
        trainer.run(&vec![4u32, 9], None, None, None).unwrap();

        let obs = trainer.last_observation();
        assert_eq!(obs.get("batch").and_then(|v| v.as_scalar()), Some(9.0));
        assert!(obs.contains("elapsed_time"));
    }

    #[test]
    fn test_zero_length_epoch_is_rejected() {
        let mut trainer = Trainer::new(Immediate::default(), config(1));
        let err = trainer.run(&Vec::<u32>::new(), None, None, None).unwrap_err();

        assert!(matches!(err, TrainErr::InvalidConfig(_)));
        assert_eq!(trainer.state(), RunState::NotStarted);
    }

    #[test]
    fn test_stop_trigger_fires_mid_epoch() {
        let config = TrainerConfig {
            stop_trigger: TriggerSpec::iterations(NonZeroUsize::new(4).unwrap()),
            ..TrainerConfig::default()
        };

        let mut trainer = Trainer::new(Immediate::default(), config);
        trainer.run(&vec![0u32; 10], None, None, None).unwrap();

        assert_eq!(trainer.iteration(), 4);
        assert_eq!(trainer.handler().steps.len(), 4);
    }

    #[test]
    fn test_sync_spans_close_in_nesting_order() {
        let mut trainer = Trainer::new(Immediate::default(), config(1));
        trainer.run(&vec![1u32], None, None, None).unwrap();

        let names: Vec<&str> = trainer.profiler().records().iter().map(|r| r.name).collect();
        assert_eq!(names, ["get_data", "train_step", "run_iteration", "iteration"]);
        assert!(trainer.profiler().records().iter().all(|r| !r.deferred));
    }
}
