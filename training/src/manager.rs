use log::debug;

use crate::{
    Result,
    report::Observation,
    trigger::{Progress, StopTrigger, Trigger},
};

/// Extensions that write the observation, they run first.
pub const PRIORITY_WRITER: i32 = 300;
/// Extensions that edit what writers produced.
pub const PRIORITY_EDITOR: i32 = 200;
/// Extensions that only read the observation, e.g. loggers.
pub const PRIORITY_READER: i32 = 100;

/// A periodic action invoked by the trainer after an iteration completes.
pub trait Extension: Send {
    /// The name the extension is registered under.
    fn name(&self) -> &str;

    /// Whether the extension reads the state of the model.
    fn needs_model_state(&self) -> bool {
        false
    }

    /// Runs the extension.
    ///
    /// # Arguments
    /// * `progress` - The progress after the completed iteration.
    /// * `observation` - The observation of the completed iteration.
    fn call(&mut self, progress: &Progress, observation: &Observation) -> Result<()>;
}

/// What a registered entry runs.
pub(crate) enum Slot {
    User(Box<dyn Extension>),
    Evaluator,
}

struct Entry {
    name: String,
    priority: i32,
    trigger: Box<dyn Trigger>,
    slot: Slot,
}

/// Owns the progress counters, the stop condition and the registered extensions of a trainer.
pub struct ExtensionsManager {
    progress: Progress,
    stop_trigger: StopTrigger,
    entries: Vec<Entry>,
    initialized: bool,
}

impl ExtensionsManager {
    /// Creates a new `ExtensionsManager`, it's not usable until `setup` is called.
    ///
    /// # Arguments
    /// * `stop_trigger` - When the training stops.
    pub fn new(stop_trigger: StopTrigger) -> Self {
        Self {
            progress: Progress::new(0),
            stop_trigger,
            entries: Vec::new(),
            initialized: false,
        }
    }

    /// Fixes the length of an epoch, only the first call has any effect.
    pub(crate) fn setup(&mut self, iters_per_epoch: usize) {
        if self.initialized {
            return;
        }

        self.progress.iters_per_epoch = iters_per_epoch;
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn stop_trigger(&self) -> &StopTrigger {
        &self.stop_trigger
    }

    /// Whether the stop condition holds.
    pub fn stop_requested(&self) -> bool {
        self.initialized && self.stop_trigger.is_satisfied(&self.progress)
    }

    /// Registers a new extension.
    ///
    /// Names are made unique by appending a numeric suffix.
    ///
    /// # Arguments
    /// * `extension` - The extension to register.
    /// * `trigger` - When the extension runs.
    /// * `priority` - Extensions with higher priority run first.
    pub fn extend<E, T>(&mut self, extension: E, trigger: T, priority: i32)
    where
        E: Extension + 'static,
        T: Trigger + 'static,
    {
        let name = extension.name().to_string();
        self.insert(name, priority, Box::new(trigger), Slot::User(Box::new(extension)));
    }

    pub(crate) fn register_evaluator(&mut self, trigger: Box<dyn Trigger>, priority: i32) {
        self.insert("Evaluator".to_string(), priority, trigger, Slot::Evaluator);
    }

    /// Returns the names of the registered extensions in the order they run.
    pub fn extension_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Marks one more iteration as completed.
    pub(crate) fn complete_iteration(&mut self) -> Progress {
        self.progress.iteration += 1;
        self.progress
    }

    /// Fires every trigger and returns the indices of the due entries in the order they must run.
    pub(crate) fn due(&mut self) -> Vec<usize> {
        let progress = self.progress;

        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(i, entry)| entry.trigger.fire(&progress).then_some(i))
            .collect()
    }

    pub(crate) fn slot_mut(&mut self, idx: usize) -> (&str, &mut Slot) {
        let entry = &mut self.entries[idx];
        (&entry.name, &mut entry.slot)
    }

    fn insert(&mut self, name: String, priority: i32, trigger: Box<dyn Trigger>, slot: Slot) {
        let name = self.unique_name(name);
        debug!(extension = name.as_str(), priority = priority; "registering extension");

        // Stable within a tier, later registrations run after earlier ones.
        let pos = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());

        let entry = Entry {
            name,
            priority,
            trigger,
            slot,
        };

        self.entries.insert(pos, entry);
    }

    fn unique_name(&self, name: String) -> String {
        let taken = |n: &str| self.entries.iter().any(|e| e.name == n);

        if !taken(&name) {
            return name;
        }

        let mut i = 1;
        loop {
            let candidate = format!("{name}_{i}");
            if !taken(&candidate) {
                return candidate;
            }
            i += 1;
        }
    }
}
