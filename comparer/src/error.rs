use std::{error::Error, fmt, io, time::Duration};

use training::TrainErr;

/// The comparer module's result type.
pub type Result<T> = std::result::Result<T, CompareErr>;

/// Failures of a comparison between engines.
#[derive(Debug)]
pub enum CompareErr {
    /// Two engines were registered under the same name.
    DuplicateEngine(String),
    /// A comparison needs at least two engines.
    NotEnoughEngines { got: usize },
    /// Two engines would reach different checkpoints.
    IncompatibleTriggers {
        engine_a: String,
        checkpoints_a: Vec<usize>,
        engine_b: String,
        checkpoints_b: Vec<usize>,
    },
    /// The compare function rejected a pair of values.
    Mismatch {
        engine_a: String,
        engine_b: String,
        key: String,
        checkpoint: usize,
        iteration: usize,
        detail: String,
    },
    /// An explicitly requested value is missing from an engine's checkpoint.
    MissingOutput {
        engine: String,
        key: String,
        checkpoint: usize,
    },
    /// Two engines delivered the same checkpoint from different iterations.
    CheckpointMismatch {
        engine_a: String,
        iteration_a: usize,
        engine_b: String,
        iteration_b: usize,
    },
    /// An engine stopped before delivering every checkpoint.
    EngineFinishedEarly { engine: String, checkpoint: usize },
    /// An engine delivered more checkpoints than its schedule allows.
    ExtraCheckpoint { engine: String, iteration: usize },
    /// An engine took longer than the configured timeout to reach a checkpoint.
    Timeout { engine: String, waited: Duration },
    /// An engine failed on its own.
    Engine { engine: String, source: TrainErr },
    /// An engine panicked.
    EnginePanicked { engine: String, message: String },
    /// The runtime driving the engines couldn't be created.
    Runtime(io::Error),
}

impl fmt::Display for CompareErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareErr::DuplicateEngine(name) => {
                write!(f, "an engine named {name} was already added")
            }
            CompareErr::NotEnoughEngines { got } => {
                write!(f, "at least two engines are needed, got {got}")
            }
            CompareErr::IncompatibleTriggers {
                engine_a,
                checkpoints_a,
                engine_b,
                checkpoints_b,
            } => write!(
                f,
                "engines {engine_a} and {engine_b} have incompatible triggers, \
                 checkpoints at iterations {checkpoints_a:?} and {checkpoints_b:?}"
            ),
            CompareErr::Mismatch {
                engine_a,
                engine_b,
                key,
                checkpoint,
                iteration,
                detail,
            } => write!(
                f,
                "{key} mismatch between {engine_a} and {engine_b} at checkpoint {checkpoint} \
                 (iteration {iteration}): {detail}"
            ),
            CompareErr::MissingOutput {
                engine,
                key,
                checkpoint,
            } => write!(f, "{engine} did not report {key} at checkpoint {checkpoint}"),
            CompareErr::CheckpointMismatch {
                engine_a,
                iteration_a,
                engine_b,
                iteration_b,
            } => write!(
                f,
                "checkpoint reached at iteration {iteration_a} by {engine_a} \
                 but at iteration {iteration_b} by {engine_b}"
            ),
            CompareErr::EngineFinishedEarly { engine, checkpoint } => {
                write!(f, "{engine} finished before reaching checkpoint {checkpoint}")
            }
            CompareErr::ExtraCheckpoint { engine, iteration } => write!(
                f,
                "{engine} reached a checkpoint at iteration {iteration} \
                 past the end of its schedule"
            ),
            CompareErr::Timeout { engine, waited } => {
                write!(f, "{engine} did not reach the next checkpoint within {waited:?}")
            }
            CompareErr::Engine { engine, source } => write!(f, "engine {engine} failed: {source}"),
            CompareErr::EnginePanicked { engine, message } => {
                write!(f, "engine {engine} panicked: {message}")
            }
            CompareErr::Runtime(e) => write!(f, "runtime error: {e}"),
        }
    }
}

impl Error for CompareErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CompareErr::Engine { source, .. } => Some(source),
            CompareErr::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CompareErr {
    fn from(value: io::Error) -> Self {
        Self::Runtime(value)
    }
}
