use std::time::{Duration, Instant};

use log::trace;

/// An open profiling span.
#[derive(Debug, Clone, Copy)]
pub struct Span {
    name: &'static str,
    index: usize,
    start: Instant,
}

impl Span {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A closed profiling span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    pub name: &'static str,
    pub index: usize,
    pub elapsed: Duration,
    pub deferred: bool,
}

/// Collects the timings of the scheduler's scopes.
///
/// Spans of deferred iterations close when the iteration completes, so the
/// records are in closing order, not in opening order.
#[derive(Debug, Default)]
pub struct Profiler {
    records: Vec<SpanRecord>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new span.
    ///
    /// # Arguments
    /// * `name` - The scope being timed.
    /// * `index` - The index of the iteration inside its epoch.
    pub fn open(&self, name: &'static str, index: usize) -> Span {
        Span {
            name,
            index,
            start: Instant::now(),
        }
    }

    /// Closes `span` and stores its record.
    ///
    /// # Arguments
    /// * `span` - The span to close.
    /// * `deferred` - Whether the span outlived the call that opened it.
    pub fn close(&mut self, span: Span, deferred: bool) {
        let elapsed = span.start.elapsed();
        trace!(
            span = span.name,
            index = span.index,
            deferred = deferred;
            "closed span in {elapsed:?}"
        );

        self.records.push(SpanRecord {
            name: span.name,
            index: span.index,
            elapsed,
            deferred,
        });
    }

    pub fn records(&self) -> &[SpanRecord] {
        &self.records
    }
}
