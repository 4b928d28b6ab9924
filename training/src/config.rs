use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// The unit an interval is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerUnit {
    Epoch,
    Iteration,
}

/// A periodic schedule, e.g. `(3, iteration)` or `(1, epoch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub period: NonZeroUsize,
    pub unit: TriggerUnit,
}

impl TriggerSpec {
    pub fn epochs(period: NonZeroUsize) -> Self {
        Self {
            period,
            unit: TriggerUnit::Epoch,
        }
    }

    pub fn iterations(period: NonZeroUsize) -> Self {
        Self {
            period,
            unit: TriggerUnit::Iteration,
        }
    }

    /// Converts the period into a number of iterations.
    ///
    /// # Arguments
    /// * `iters_per_epoch` - The amount of iterations in a single epoch.
    pub fn in_iterations(&self, iters_per_epoch: usize) -> usize {
        match self.unit {
            TriggerUnit::Epoch => self.period.get() * iters_per_epoch,
            TriggerUnit::Iteration => self.period.get(),
        }
    }
}

impl Default for TriggerSpec {
    fn default() -> Self {
        Self::epochs(NonZeroUsize::MIN)
    }
}

/// How a `Trainer` schedules its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// When training stops.
    pub stop_trigger: TriggerSpec,
    /// When the attached evaluator runs.
    pub evaluator_trigger: TriggerSpec,
    /// The maximum amount of iterations pending completion at once.
    pub max_in_flight: Option<NonZeroUsize>,
}

impl TrainerConfig {
    /// Creates a config that trains for `epochs` epochs with every other value defaulted.
    pub fn with_epochs(epochs: NonZeroUsize) -> Self {
        Self {
            stop_trigger: TriggerSpec::epochs(epochs),
            ..Self::default()
        }
    }
}
