use std::num::NonZeroUsize;

use crate::config::TriggerSpec;

/// The position of a run, counted in completed iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub iteration: usize,
    pub iters_per_epoch: usize,
}

impl Progress {
    pub fn new(iters_per_epoch: usize) -> Self {
        Self {
            iteration: 0,
            iters_per_epoch,
        }
    }

    /// The amount of fully completed epochs.
    pub fn epoch(&self) -> usize {
        self.iteration / self.iters_per_epoch.max(1)
    }

    /// The fractional epoch, `2.5` means half way through the third epoch.
    pub fn epoch_detail(&self) -> f64 {
        self.iteration as f64 / self.iters_per_epoch.max(1) as f64
    }

    /// Whether the `idx`-th iteration of an epoch is its last one.
    pub fn is_epoch_last_iter(&self, idx: usize) -> bool {
        idx + 1 == self.iters_per_epoch
    }

    pub fn is_before_training(&self) -> bool {
        self.iteration == 0
    }
}

/// Decides when a periodic action runs.
pub trait Trigger: Send {
    /// Checks whether the action should run at the given progress.
    ///
    /// # Arguments
    /// * `progress` - The progress after the latest completed iteration.
    fn fire(&mut self, progress: &Progress) -> bool;

    /// Whether this trigger could fire after `iteration` completed iterations,
    /// without changing the trigger's state.
    fn may_fire(&self, iteration: usize, iters_per_epoch: usize) -> bool;
}

/// Fires every `period` epochs or iterations.
#[derive(Debug, Clone)]
pub struct IntervalTrigger {
    spec: TriggerSpec,
    last_fired: Option<usize>,
}

impl IntervalTrigger {
    pub fn new(spec: TriggerSpec) -> Self {
        Self {
            spec,
            last_fired: None,
        }
    }

    /// A trigger that fires after every iteration.
    pub fn every_iteration() -> Self {
        Self::new(TriggerSpec::iterations(NonZeroUsize::MIN))
    }

    pub fn spec(&self) -> TriggerSpec {
        self.spec
    }
}

impl From<TriggerSpec> for IntervalTrigger {
    fn from(spec: TriggerSpec) -> Self {
        Self::new(spec)
    }
}

impl Trigger for IntervalTrigger {
    fn fire(&mut self, progress: &Progress) -> bool {
        if self.last_fired == Some(progress.iteration) {
            return false;
        }

        let fire = self.may_fire(progress.iteration, progress.iters_per_epoch);
        if fire {
            self.last_fired = Some(progress.iteration);
        }

        fire
    }

    fn may_fire(&self, iteration: usize, iters_per_epoch: usize) -> bool {
        let interval = self.spec.in_iterations(iters_per_epoch);
        iteration > 0 && interval > 0 && iteration % interval == 0
    }
}

/// The stop condition of a training run.
///
/// Unlike an `IntervalTrigger` it keeps holding once satisfied.
#[derive(Debug, Clone, Copy)]
pub struct StopTrigger {
    spec: TriggerSpec,
}

impl StopTrigger {
    pub fn new(spec: TriggerSpec) -> Self {
        Self { spec }
    }

    /// The total amount of iterations a run will complete.
    pub fn total_iterations(&self, iters_per_epoch: usize) -> usize {
        self.spec.in_iterations(iters_per_epoch)
    }

    pub fn is_satisfied(&self, progress: &Progress) -> bool {
        progress.iteration >= self.total_iterations(progress.iters_per_epoch)
    }

    pub fn spec(&self) -> TriggerSpec {
        self.spec
    }
}

impl Default for StopTrigger {
    fn default() -> Self {
        Self::new(TriggerSpec::default())
    }
}
