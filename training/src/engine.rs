use crate::{
    Result,
    data::DataSource,
    evaluator::Evaluator,
    handler::{EvalHandler, StepHandler},
    hook::StepHook,
    trainer::Trainer,
};

/// How many iterations a run completes and how they group into epochs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub iters_per_epoch: usize,
    pub total_iterations: usize,
}

/// Anything that can be driven through a run while a hook observes it.
///
/// Both `Trainer` and `Evaluator` are engines, so a comparison can put any
/// mix of them side by side.
pub trait Engine: Send {
    type Batch;

    /// The schedule of a run over a source of `train_len` batches.
    fn schedule(&self, train_len: usize) -> Schedule;

    /// Runs to completion.
    ///
    /// # Arguments
    /// * `train` - The data the engine iterates over.
    /// * `eval` - The validation data, for trainers with an evaluator attached.
    /// * `hook` - Observes every step of the run.
    fn run_engine(
        &mut self,
        train: &dyn DataSource<Batch = Self::Batch>,
        eval: Option<&dyn DataSource<Batch = Self::Batch>>,
        hook: &mut dyn StepHook,
    ) -> Result<()>;
}

impl<B, H> Engine for Trainer<B, H>
where
    B: Send + 'static,
    H: StepHandler<B>,
{
    type Batch = B;

    fn schedule(&self, train_len: usize) -> Schedule {
        let iters_per_epoch = if self.manager().is_initialized() {
            self.progress().iters_per_epoch
        } else {
            train_len
        };

        Schedule {
            iters_per_epoch,
            total_iterations: self.stop_trigger().total_iterations(iters_per_epoch),
        }
    }

    fn run_engine(
        &mut self,
        train: &dyn DataSource<Batch = B>,
        eval: Option<&dyn DataSource<Batch = B>>,
        hook: &mut dyn StepHook,
    ) -> Result<()> {
        self.run_observed(train, eval, None, None, hook)
    }
}

impl<B, H> Engine for Evaluator<B, H>
where
    H: EvalHandler<B>,
{
    type Batch = B;

    /// A single pass is a single epoch.
    fn schedule(&self, train_len: usize) -> Schedule {
        Schedule {
            iters_per_epoch: train_len,
            total_iterations: train_len,
        }
    }

    fn run_engine(
        &mut self,
        train: &dyn DataSource<Batch = B>,
        _eval: Option<&dyn DataSource<Batch = B>>,
        hook: &mut dyn StepHook,
    ) -> Result<()> {
        self.run_pass(train, None, hook, true).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::{
        TrainErr,
        config::{TrainerConfig, TriggerSpec},
        hook::NamedParams,
        report::{Observation, Outputs, Value},
        step::{StepHandle, StepOutcome},
        trigger::Progress,
    };

    struct Echo;

    impl StepHandler<f64> for Echo {
        fn train_step(
            &mut self,
            handle: StepHandle,
            batch: &f64,
            _: &mut Observation,
        ) -> Result<StepOutcome> {
            let outputs = Outputs::from([("x".to_string(), Value::from(*batch))]);
            Ok(StepOutcome::Completed(handle.complete(outputs)))
        }

        fn named_parameters(&self) -> NamedParams {
            vec![("w".to_string(), Value::from(1.0))]
        }
    }

    impl EvalHandler<f64> for Echo {
        fn eval_step(&mut self, _: usize, batch: &f64, _: &mut Observation) -> Result<Outputs> {
            Ok(Outputs::from([("x".to_string(), Value::from(*batch))]))
        }
    }

    #[derive(Default)]
    struct Recorder {
        outputs: Vec<f64>,
        ends: Vec<usize>,
        params_seen: usize,
    }

    impl StepHook for Recorder {
        fn on_outputs(&mut self, outputs: &Outputs) -> Result<()> {
            let x = outputs.get("x").and_then(Value::as_scalar).ok_or(TrainErr::Aborted)?;
            self.outputs.push(x);
            Ok(())
        }

        fn on_iteration_end(
            &mut self,
            progress: &Progress,
            params: &dyn Fn() -> NamedParams,
        ) -> Result<()> {
            self.ends.push(progress.iteration);
            self.params_seen += params().len();
            Ok(())
        }
    }

    #[test]
    fn test_trainer_schedule_follows_stop_trigger() {
        let config = TrainerConfig::with_epochs(NonZeroUsize::new(3).unwrap());
        let trainer: Trainer<f64, Echo> = Trainer::new(Echo, config);

        let schedule = trainer.schedule(4);
        assert_eq!(schedule.iters_per_epoch, 4);
        assert_eq!(schedule.total_iterations, 12);
    }

    #[test]
    fn test_trainer_engine_feeds_the_hook() {
        let config = TrainerConfig {
            stop_trigger: TriggerSpec::iterations(NonZeroUsize::new(3).unwrap()),
            ..TrainerConfig::default()
        };
        let mut trainer: Trainer<f64, Echo> = Trainer::new(Echo, config);
        let mut hook = Recorder::default();

        trainer.run_engine(&vec![1.0, 2.0, 3.0, 4.0], None, &mut hook).unwrap();

        assert_eq!(hook.outputs, [1.0, 2.0, 3.0]);
        assert_eq!(hook.ends, [1, 2, 3]);
        assert_eq!(hook.params_seen, 3);
    }

    #[test]
    fn test_evaluator_engine_is_a_single_epoch() {
        let mut evaluator: Evaluator<f64, Echo> = Evaluator::new(Echo);
        assert_eq!(
            Engine::schedule(&evaluator, 2),
            Schedule {
                iters_per_epoch: 2,
                total_iterations: 2
            }
        );

        let mut hook = Recorder::default();
        evaluator.run_engine(&vec![5.0, 6.0], None, &mut hook).unwrap();

        assert_eq!(hook.outputs, [5.0, 6.0]);
        assert_eq!(hook.ends, [1, 2]);
    }
}
