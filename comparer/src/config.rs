use std::{num::NonZeroUsize, time::Duration};

use serde::{Deserialize, Serialize};
use training::config::TriggerSpec;

/// How a `Comparer` checks its engines.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    /// When the engines meet to compare.
    pub trigger: TriggerSpec,
    /// The outputs to compare, every reported output if `None`.
    pub outputs: Option<Vec<String>>,
    /// Whether to compare the model parameters too.
    pub params: bool,
    /// How many checkpoints an engine may run ahead of the slowest one, unbounded if `None`.
    pub concurrency: Option<NonZeroUsize>,
    /// The longest the comparer waits for an engine to reach a checkpoint.
    pub timeout: Option<Duration>,
}

impl CompareConfig {
    /// Creates a config comparing only the given outputs.
    pub fn with_outputs<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outputs: Some(outputs.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }
}
