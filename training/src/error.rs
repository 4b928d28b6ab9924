use std::{error::Error, fmt};

/// The training module's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Failures of the training loop and its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainErr {
    /// A step was completed out of the order it was issued in.
    OutOfOrderCompletion { expected: usize, got: usize },
    /// A completion arrived while no step was pending.
    NoPendingStep { got: usize },
    /// The evaluator is attached but `run` got no validation source.
    MissingValidationSource,
    /// A data source yielded no batches at all.
    EmptySource,
    /// The configuration can't be run.
    InvalidConfig(String),
    /// Too many steps are pending and the handler can't complete any.
    InFlightLimit { limit: usize },
    /// A step handler or module reported a failure.
    Handler(String),
    /// A parameter buffer and a gradient have different lengths.
    SizeMismatch { got: usize, expected: usize },
    /// The run was cancelled by whoever observes it.
    Aborted,
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::OutOfOrderCompletion { expected, got } => write!(
                f,
                "completed a not expected iteration, {expected} was expected \
                 but completion of {got} happened"
            ),
            TrainErr::NoPendingStep { got } => {
                write!(f, "completion of iteration {got} happened with no pending iteration")
            }
            TrainErr::MissingValidationSource => {
                f.write_str("an evaluator is attached but no validation source was given")
            }
            TrainErr::EmptySource => f.write_str("the data source yielded no batches"),
            TrainErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            TrainErr::InFlightLimit { limit } => write!(
                f,
                "{limit} iterations are in flight and the handler completed none of them"
            ),
            TrainErr::Handler(msg) => write!(f, "handler error: {msg}"),
            TrainErr::SizeMismatch { got, expected } => {
                write!(f, "size mismatch: got {got}, expected {expected}")
            }
            TrainErr::Aborted => f.write_str("the run was aborted"),
        }
    }
}

impl Error for TrainErr {}
