use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use crate::{
    Result,
    config::TriggerSpec,
    manager::Extension,
    report::{Observation, Summary},
    trigger::{IntervalTrigger, Progress, Trigger},
};

/// A single aggregated line of a `LogReport`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub epoch: usize,
    pub iteration: usize,
    pub means: Observation,
}

/// Logs the mean of every scalar reported since its previous entry.
///
/// It has to be registered to run after every iteration, its own trigger
/// decides when an entry is written.
pub struct LogReport {
    trigger: IntervalTrigger,
    summary: Summary,
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl LogReport {
    /// Creates a new `LogReport`.
    ///
    /// # Arguments
    /// * `every` - How often an entry is written.
    pub fn new(every: TriggerSpec) -> Self {
        Self {
            trigger: IntervalTrigger::new(every),
            summary: Summary::new(),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The written entries, readable after the extension was handed to a trainer.
    pub fn entries(&self) -> Arc<Mutex<Vec<LogEntry>>> {
        Arc::clone(&self.entries)
    }
}

impl Default for LogReport {
    fn default() -> Self {
        Self::new(TriggerSpec::default())
    }
}

impl Extension for LogReport {
    fn name(&self) -> &str {
        "LogReport"
    }

    fn call(&mut self, progress: &Progress, observation: &Observation) -> Result<()> {
        self.summary.add(observation);

        if !self.trigger.fire(progress) {
            return Ok(());
        }

        let means = self.summary.compute();
        self.summary.clear();

        let line: Vec<String> = means
            .iter()
            .filter_map(|(k, v)| v.as_scalar().map(|v| format!("{k}={v:.6}")))
            .collect();

        info!(
            epoch = progress.epoch(),
            iteration = progress.iteration;
            "{}", line.join(" ")
        );

        self.entries.lock().push(LogEntry {
            epoch: progress.epoch(),
            iteration: progress.iteration,
            means,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;

    fn observation(loss: f64) -> Observation {
        let mut obs = Observation::new();
        obs.report("loss", loss);
        obs
    }

    #[test]
    fn test_entries_hold_means_since_previous_entry() {
        let mut report = LogReport::new(TriggerSpec::iterations(NonZeroUsize::new(2).unwrap()));
        let entries = report.entries();
        let mut progress = Progress::new(4);

        for loss in [1.0, 3.0, 5.0, 7.0] {
            progress.iteration += 1;
            report.call(&progress, &observation(loss)).unwrap();
        }

        let entries = entries.lock();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].iteration, 2);
        assert_eq!(entries[0].means.get("loss").and_then(|v| v.as_scalar()), Some(2.0));
        assert_eq!(entries[1].means.get("loss").and_then(|v| v.as_scalar()), Some(6.0));
        assert_eq!(entries[1].epoch, 1);
    }
}
