mod common;

use std::{collections::VecDeque, num::NonZeroUsize};

use training::{
    Result, RunState, TrainErr, Trainer, create_deferred_trainer, create_trainer,
    config::{TrainerConfig, TriggerSpec},
    handler::{GradientDescent, StepHandler, shared},
    report::{Observation, Outputs},
    step::{Completion, StepHandle, StepOutcome},
    trigger::Progress,
};

use common::{Linear, init_logger, line};

fn epochs(n: usize) -> TrainerConfig {
    TrainerConfig::with_epochs(NonZeroUsize::new(n).unwrap())
}

#[test]
fn test_deferred_training_matches_synchronous_training() {
    init_logger();

    let sync_module = shared(Linear::default());
    let mut sync = create_trainer(sync_module.clone(), GradientDescent::new(0.3), epochs(3));
    sync.run(&line(12, 3), None, None, None).unwrap();

    let deferred_module = shared(Linear::default());
    let mut deferred = create_deferred_trainer(
        deferred_module.clone(),
        GradientDescent::new(0.3),
        2,
        epochs(3),
    );
    deferred.run(&line(12, 3), None, None, None).unwrap();

    assert_eq!(sync.iteration(), deferred.iteration());
    assert_eq!(sync_module.lock().params, deferred_module.lock().params);
    assert_eq!(
        sync.last_observation().get("train/loss"),
        deferred.last_observation().get("train/loss")
    );
}

#[test]
fn test_deferred_spans_close_at_completion() {
    init_logger();

    let mut trainer = create_deferred_trainer(
        shared(Linear::default()),
        GradientDescent::new(0.1),
        1,
        epochs(1),
    );
    trainer.run(&line(4, 2), None, None, None).unwrap();

    let records = trainer.profiler().records();
    let deferred: Vec<(&str, usize)> = records
        .iter()
        .filter(|r| r.deferred)
        .map(|r| (r.name, r.index))
        .collect();

    assert_eq!(
        deferred,
        [
            ("train_step", 0),
            ("run_iteration", 0),
            ("iteration", 0),
            ("train_step", 1),
            ("run_iteration", 1),
            ("iteration", 1),
        ]
    );
}

/// Defers every iteration and tags its observation, so completions can prove
/// they see the observation of their own iteration.
#[derive(Default)]
struct Tagging {
    pending: VecDeque<Completion>,
    seen: Vec<(usize, f64)>,
}

impl StepHandler<training::data::Batch> for Tagging {
    fn train_step(
        &mut self,
        handle: StepHandle,
        _: &training::data::Batch,
        obs: &mut Observation,
    ) -> Result<StepOutcome> {
        obs.report("tag", handle.index() as f64);
        self.pending.push_back(handle.complete(Outputs::new()));
        Ok(StepOutcome::Deferred)
    }

    fn train_post_step(
        &mut self,
        index: usize,
        _: &training::data::Batch,
        _: &Outputs,
        obs: &mut Observation,
    ) -> Result<()> {
        let tag = obs.get("tag").and_then(|v| v.as_scalar()).unwrap_or(-1.0);
        self.seen.push((index, tag));
        Ok(())
    }

    fn train_epoch_end(&mut self, _: &Progress, out: &mut Vec<Completion>) -> Result<()> {
        out.extend(self.pending.drain(..));
        Ok(())
    }
}

#[test]
fn test_completion_sees_its_own_observation() {
    init_logger();

    let mut trainer = Trainer::new(Tagging::default(), epochs(1));
    trainer.run(&line(8, 2), None, None, None).unwrap();

    assert_eq!(
        trainer.handler().seen,
        [(0, 0.0), (1, 1.0), (2, 2.0), (3, 3.0)]
    );
    assert_eq!(trainer.iteration(), 4);
}

/// Defers every iteration and hands them back in reverse order.
#[derive(Default)]
struct Reversed {
    pending: Vec<Completion>,
}

impl StepHandler<training::data::Batch> for Reversed {
    fn train_step(
        &mut self,
        handle: StepHandle,
        _: &training::data::Batch,
        _: &mut Observation,
    ) -> Result<StepOutcome> {
        self.pending.push(handle.complete(Outputs::new()));
        Ok(StepOutcome::Deferred)
    }

    fn train_epoch_end(&mut self, _: &Progress, out: &mut Vec<Completion>) -> Result<()> {
        out.extend(self.pending.drain(..).rev());
        Ok(())
    }
}

#[test]
fn test_out_of_order_completion_is_fatal() {
    init_logger();

    let mut trainer = Trainer::new(Reversed::default(), epochs(1));
    let err = trainer.run(&line(6, 2), None, None, None).unwrap_err();

    assert_eq!(err, TrainErr::OutOfOrderCompletion { expected: 0, got: 2 });
    assert_eq!(trainer.iteration(), 0);
}

/// Defers every iteration and never completes any.
#[derive(Default)]
struct Forgetful {
    pending: Vec<Completion>,
}

impl StepHandler<training::data::Batch> for Forgetful {
    fn train_step(
        &mut self,
        handle: StepHandle,
        _: &training::data::Batch,
        _: &mut Observation,
    ) -> Result<StepOutcome> {
        self.pending.push(handle.complete(Outputs::new()));
        Ok(StepOutcome::Deferred)
    }
}

#[test]
fn test_iterations_left_pending_after_the_epoch_fail() {
    init_logger();

    let mut trainer = Trainer::new(Forgetful::default(), epochs(1));
    let err = trainer.run(&line(4, 2), None, None, None).unwrap_err();

    assert!(matches!(err, TrainErr::Handler(_)));
}

#[test]
fn test_in_flight_limit_without_completions_fails() {
    init_logger();

    let config = TrainerConfig {
        max_in_flight: NonZeroUsize::new(2),
        ..epochs(1)
    };

    let mut trainer = Trainer::new(Forgetful::default(), config);
    let err = trainer.run(&line(8, 2), None, None, None).unwrap_err();

    assert_eq!(err, TrainErr::InFlightLimit { limit: 2 });
    assert_eq!(trainer.handler().pending.len(), 2);
}

#[test]
fn test_in_flight_limit_forces_completion() {
    init_logger();

    let config = TrainerConfig {
        stop_trigger: TriggerSpec::epochs(NonZeroUsize::new(2).unwrap()),
        max_in_flight: NonZeroUsize::new(1),
        ..TrainerConfig::default()
    };

    let mut trainer =
        create_deferred_trainer(shared(Linear::default()), GradientDescent::new(0.1), 8, config);
    trainer.run(&line(8, 2), None, None, None).unwrap();

    assert_eq!(trainer.iteration(), 8);
    // With a single slot nothing outlives the iteration that issued it past the next issue.
    let iterations: Vec<usize> = trainer
        .profiler()
        .records()
        .iter()
        .filter(|r| r.name == "iteration")
        .map(|r| r.index)
        .collect();
    assert_eq!(iterations, [0, 1, 2, 3, 0, 1, 2, 3]);
}

#[test]
fn test_deferred_training_stops_at_the_stop_trigger() {
    init_logger();

    let config = TrainerConfig {
        stop_trigger: TriggerSpec::iterations(NonZeroUsize::new(4).unwrap()),
        ..TrainerConfig::default()
    };

    let mut sync = create_trainer(shared(Linear::default()), GradientDescent::new(0.1), config);
    sync.run(&line(20, 2), None, None, None).unwrap();

    let deferred_module = shared(Linear::default());
    let mut deferred =
        create_deferred_trainer(deferred_module.clone(), GradientDescent::new(0.1), 2, config);
    deferred.run(&line(20, 2), None, None, None).unwrap();

    assert_eq!(sync.iteration(), 4);
    assert_eq!(deferred.iteration(), 4);
    assert_eq!(deferred.state(), RunState::Stopped);

    let steps = deferred
        .profiler()
        .records()
        .iter()
        .filter(|r| r.name == "train_step")
        .count();
    assert_eq!(steps, 4);
}
