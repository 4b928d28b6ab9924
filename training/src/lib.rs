mod builder;
pub mod config;
pub mod data;
mod engine;
mod error;
mod evaluator;
pub mod extensions;
pub mod handler;
mod hook;
pub mod manager;
pub mod profiler;
pub mod report;
pub mod step;
mod trainer;
pub mod trigger;

pub use builder::{create_deferred_trainer, create_evaluator, create_trainer};
pub use engine::{Engine, Schedule};
pub use error::{Result, TrainErr};
pub use evaluator::Evaluator;
pub use hook::{NamedParams, NoHook, StepHook};
pub use trainer::{RunState, Trainer};
