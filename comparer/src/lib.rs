mod barrier;
mod collector;
mod compare_fn;
mod comparer;
mod config;
mod error;

pub use barrier::{Checkpoint, CheckpointReceiver, CheckpointSender, ReportBarrier};
pub use compare_fn::{CompareFn, DEFAULT_ATOL, DEFAULT_RTOL, assert_allclose, get_default_comparer};
pub use comparer::{CompareSummary, Comparer};
pub use config::CompareConfig;
pub use error::{CompareErr, Result};
