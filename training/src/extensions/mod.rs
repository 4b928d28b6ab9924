mod log_report;

pub use log_report::{LogEntry, LogReport};
