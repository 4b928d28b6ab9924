use std::{
    collections::BTreeSet,
    panic::{self, AssertUnwindSafe},
};

use log::{debug, info, warn};
use tokio::{runtime::Runtime, task::JoinSet};
use training::{
    Engine, Schedule, StepHook, TrainErr,
    data::DataSource,
    report::Value,
    trigger::{IntervalTrigger, Trigger},
};

use crate::{
    Result,
    barrier::{Checkpoint, CheckpointReceiver, ReportBarrier},
    collector::Collector,
    compare_fn::{CompareFn, DEFAULT_ATOL, DEFAULT_RTOL, get_default_comparer},
    config::CompareConfig,
    error::CompareErr,
};

type Job = Box<dyn FnOnce(&mut dyn StepHook) -> training::Result<()> + Send>;

/// A registered engine together with the data it runs over.
struct Runner {
    name: String,
    schedule: Schedule,
    job: Job,
}

/// What a successful comparison went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompareSummary {
    /// The amount of checkpoints every engine reached.
    pub checkpoints: usize,
    /// The amount of times the compare function was called.
    pub comparisons: usize,
    /// The most checkpoints a single engine had waiting for the comparer.
    pub peak_buffered: usize,
}

/// Runs the same procedure on many engines at once and checks they agree.
///
/// Every engine runs on its own thread. Whenever the comparison trigger fires
/// the engines meet at a checkpoint and every value they reported is compared
/// between each pair of engines.
pub struct Comparer {
    config: CompareConfig,
    compare_fn: CompareFn,
    runners: Vec<Runner>,
}

impl Comparer {
    /// Creates a new `Comparer` using the default compare function.
    ///
    /// # Arguments
    /// * `config` - Which values to compare and how often.
    pub fn new(config: CompareConfig) -> Self {
        Self {
            config,
            compare_fn: Box::new(get_default_comparer(DEFAULT_RTOL, DEFAULT_ATOL)),
            runners: Vec::new(),
        }
    }

    /// Replaces the compare function.
    pub fn with_compare_fn<F>(mut self, compare_fn: F) -> Self
    where
        F: Fn(&str, &str, &str, &Value, &Value) -> std::result::Result<(), String>
            + Send
            + Sync
            + 'static,
    {
        self.compare_fn = Box::new(compare_fn);
        self
    }

    pub fn config(&self) -> &CompareConfig {
        &self.config
    }

    /// The names of the registered engines, in registration order.
    pub fn engine_names(&self) -> Vec<&str> {
        self.runners.iter().map(|r| r.name.as_str()).collect()
    }

    /// Registers an engine that runs over `train`.
    ///
    /// # Errors
    /// A `DuplicateEngine` error if another engine has the same name.
    pub fn add_engine<E, S>(&mut self, name: &str, engine: E, train: S) -> Result<()>
    where
        E: Engine + 'static,
        S: DataSource<Batch = E::Batch> + Send + 'static,
    {
        self.register(name, engine, train, None::<S>)
    }

    /// Registers an engine that runs over `train` and validates over `eval`.
    ///
    /// # Errors
    /// A `DuplicateEngine` error if another engine has the same name.
    pub fn add_engine_with_eval<E, S, V>(
        &mut self,
        name: &str,
        engine: E,
        train: S,
        eval: V,
    ) -> Result<()>
    where
        E: Engine + 'static,
        S: DataSource<Batch = E::Batch> + Send + 'static,
        V: DataSource<Batch = E::Batch> + Send + 'static,
    {
        self.register(name, engine, train, Some(eval))
    }

    fn register<E, S, V>(
        &mut self,
        name: &str,
        mut engine: E,
        train: S,
        eval: Option<V>,
    ) -> Result<()>
    where
        E: Engine + 'static,
        S: DataSource<Batch = E::Batch> + Send + 'static,
        V: DataSource<Batch = E::Batch> + Send + 'static,
    {
        if self.runners.iter().any(|r| r.name == name) {
            return Err(CompareErr::DuplicateEngine(name.to_string()));
        }

        let schedule = engine.schedule(train.len());
        debug!(
            engine = name,
            iters_per_epoch = schedule.iters_per_epoch,
            total_iterations = schedule.total_iterations;
            "adding engine"
        );

        let job: Job = Box::new(move |hook: &mut dyn StepHook| {
            let eval = eval
                .as_ref()
                .map(|e| e as &dyn DataSource<Batch = E::Batch>);
            engine.run_engine(&train, eval, hook)
        });

        self.runners.push(Runner {
            name: name.to_string(),
            schedule,
            job,
        });

        Ok(())
    }

    /// The iterations at which an engine with `schedule` reaches a checkpoint.
    fn checkpoints(&self, schedule: &Schedule) -> Vec<usize> {
        let trigger = IntervalTrigger::new(self.config.trigger);

        (1..=schedule.total_iterations)
            .filter(|&i| trigger.may_fire(i, schedule.iters_per_epoch))
            .collect()
    }

    /// Checks every engine reaches the same checkpoints.
    ///
    /// # Returns
    /// The amount of checkpoints.
    fn check_schedules(&self) -> Result<usize> {
        let Some((first, rest)) = self.runners.split_first() else {
            return Err(CompareErr::NotEnoughEngines { got: 0 });
        };

        let expected = self.checkpoints(&first.schedule);

        for runner in rest {
            let checkpoints = self.checkpoints(&runner.schedule);

            if checkpoints != expected {
                return Err(CompareErr::IncompatibleTriggers {
                    engine_a: first.name.clone(),
                    checkpoints_a: expected,
                    engine_b: runner.name.clone(),
                    checkpoints_b: checkpoints,
                });
            }
        }

        if expected.is_empty() {
            warn!("the engines never reach a checkpoint, nothing will be compared");
        }

        Ok(expected.len())
    }

    /// Runs every engine to completion comparing them at every checkpoint.
    ///
    /// The registered engines are consumed, every engine thread is joined
    /// before this returns, whether the comparison passed or not.
    ///
    /// # Errors
    /// A `Mismatch` error if two engines disagree, an `IncompatibleTriggers` error if the
    /// engines reach different checkpoints, or an `Engine` error if an engine failed.
    pub fn compare(&mut self) -> Result<CompareSummary> {
        if self.runners.len() < 2 {
            return Err(CompareErr::NotEnoughEngines {
                got: self.runners.len(),
            });
        }

        let checkpoints = self.check_schedules()?;
        let runners = std::mem::take(&mut self.runners);

        info!(
            engines = runners.len(),
            checkpoints = checkpoints;
            "starting comparison"
        );

        let runtime = Runtime::new()?;
        runtime.block_on(self.drive(runners, checkpoints))
    }

    async fn drive(&self, runners: Vec<Runner>, checkpoints: usize) -> Result<CompareSummary> {
        let barrier = ReportBarrier::new(self.config.concurrency);
        let mut names = Vec::with_capacity(runners.len());
        let mut receivers = Vec::with_capacity(runners.len());
        let mut tasks = JoinSet::new();

        for Runner { name, job, .. } in runners {
            let (tx, rx) = barrier.channel();
            let mut collector = Collector::new(name.clone(), &self.config, tx);

            names.push(name.clone());
            receivers.push(rx);

            tasks.spawn_blocking(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| job(&mut collector)));
                (name, result.map_err(panic_message))
            });
        }

        let outcome = self
            .coordinate(&names, &mut receivers, checkpoints)
            .await;

        if let Err(e) = &outcome {
            warn!("comparison failed, stopping every engine: {e}");
            barrier.cancel();
        }

        // Blocked engines unblock once their receiver is gone.
        drop(receivers);
        let joined = join_engines(&mut tasks).await;

        match (outcome, joined) {
            (Ok(comparisons), Ok(())) => {
                let summary = CompareSummary {
                    checkpoints,
                    comparisons,
                    peak_buffered: barrier.peak_buffered(),
                };

                info!(
                    checkpoints = summary.checkpoints,
                    comparisons = summary.comparisons,
                    peak_buffered = summary.peak_buffered;
                    "comparison passed"
                );

                Ok(summary)
            }
            (Err(CompareErr::EngineFinishedEarly { .. }), Err(e)) | (Ok(_), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
        }
    }

    /// Receives every checkpoint of every engine in lock step and compares them.
    ///
    /// # Returns
    /// The amount of comparisons made.
    async fn coordinate(
        &self,
        names: &[String],
        receivers: &mut [CheckpointReceiver],
        checkpoints: usize,
    ) -> Result<usize> {
        let mut comparisons = 0;

        for n in 0..checkpoints {
            let mut reached = Vec::with_capacity(receivers.len());

            for (name, rx) in names.iter().zip(receivers.iter_mut()) {
                let checkpoint = self.receive(name, rx).await?.ok_or_else(|| {
                    CompareErr::EngineFinishedEarly {
                        engine: name.clone(),
                        checkpoint: n,
                    }
                })?;

                reached.push(checkpoint);
            }

            check_alignment(names, &reached)?;
            comparisons += self.compare_checkpoint(names, &reached)?;

            debug!(
                checkpoint = n,
                iteration = reached[0].iteration;
                "checkpoint matched"
            );
        }

        // Every engine must finish right after its last checkpoint.
        for (name, rx) in names.iter().zip(receivers.iter_mut()) {
            if let Some(extra) = self.receive(name, rx).await? {
                return Err(CompareErr::ExtraCheckpoint {
                    engine: name.clone(),
                    iteration: extra.iteration,
                });
            }
        }

        Ok(comparisons)
    }

    async fn receive(&self, name: &str, rx: &mut CheckpointReceiver) -> Result<Option<Checkpoint>> {
        let Some(timeout) = self.config.timeout else {
            return Ok(rx.recv().await);
        };

        tokio::time::timeout(timeout, rx.recv())
            .await
            .map_err(|_| CompareErr::Timeout {
                engine: name.to_string(),
                waited: timeout,
            })
    }

    /// The keys to compare at a checkpoint.
    fn keys(&self, reached: &[Checkpoint]) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = reached
            .iter()
            .flat_map(|cp| cp.records.keys().cloned())
            .collect();

        if let Some(outputs) = &self.config.outputs {
            keys.extend(outputs.iter().map(|o| format!("output/{o}")));
        }

        keys
    }

    /// Whether a key missing from some engine fails the comparison.
    fn required(&self, key: &str) -> bool {
        self.config.outputs.is_some() || key.starts_with("param/")
    }

    /// Compares every key of a checkpoint between every pair of engines.
    ///
    /// # Returns
    /// The amount of comparisons made.
    fn compare_checkpoint(&self, names: &[String], reached: &[Checkpoint]) -> Result<usize> {
        let mut comparisons = 0;

        for key in self.keys(reached) {
            for i in 0..reached.len() {
                for j in i + 1..reached.len() {
                    let a = reached[i].records.get(&key);
                    let b = reached[j].records.get(&key);

                    let (a, b) = match (a, b) {
                        (Some(a), Some(b)) => (a, b),
                        (None, _) | (_, None) if self.required(&key) => {
                            let missing = if a.is_none() { i } else { j };
                            return Err(CompareErr::MissingOutput {
                                engine: names[missing].clone(),
                                key,
                                checkpoint: reached[missing].seq,
                            });
                        }
                        _ => {
                            warn!(
                                key = key.as_str(),
                                engine_a = names[i].as_str(),
                                engine_b = names[j].as_str();
                                "value reported by only one engine, skipping"
                            );
                            continue;
                        }
                    };

                    self.compare_values(&names[i], &names[j], &key, a, b, &reached[i])?;
                    comparisons += 1;
                }
            }
        }

        Ok(comparisons)
    }

    fn compare_values(
        &self,
        engine_a: &str,
        engine_b: &str,
        key: &str,
        a: &Value,
        b: &Value,
        checkpoint: &Checkpoint,
    ) -> Result<()> {
        let compared = panic::catch_unwind(AssertUnwindSafe(|| {
            (self.compare_fn)(engine_a, engine_b, key, a, b)
        }));

        let detail = match compared {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(detail)) => detail,
            Err(payload) => panic_message(payload),
        };

        Err(CompareErr::Mismatch {
            engine_a: engine_a.to_string(),
            engine_b: engine_b.to_string(),
            key: key.to_string(),
            checkpoint: checkpoint.seq,
            iteration: checkpoint.iteration,
            detail,
        })
    }
}

/// Checks every engine delivered the same checkpoint.
fn check_alignment(names: &[String], reached: &[Checkpoint]) -> Result<()> {
    let Some(first) = reached.first() else {
        return Ok(());
    };

    for (name, checkpoint) in names.iter().zip(reached).skip(1) {
        if checkpoint.seq != first.seq || checkpoint.iteration != first.iteration {
            return Err(CompareErr::CheckpointMismatch {
                engine_a: names[0].clone(),
                iteration_a: first.iteration,
                engine_b: name.clone(),
                iteration_b: checkpoint.iteration,
            });
        }
    }

    Ok(())
}

type EngineResult = (String, std::result::Result<training::Result<()>, String>);

/// Joins every engine thread.
///
/// # Returns
/// The first failure of an engine, engines aborted because the comparison
/// stopped are not failures of their own.
async fn join_engines(tasks: &mut JoinSet<EngineResult>) -> Result<()> {
    let mut first_err = None;

    while let Some(joined) = tasks.join_next().await {
        let err = match joined {
            Ok((_, Ok(Ok(())))) | Ok((_, Ok(Err(TrainErr::Aborted)))) => continue,
            Ok((engine, Ok(Err(source)))) => CompareErr::Engine { engine, source },
            Ok((engine, Err(message))) => CompareErr::EnginePanicked { engine, message },
            Err(e) => CompareErr::EnginePanicked {
                engine: "unknown".to_string(),
                message: e.to_string(),
            },
        };

        debug!("engine failed: {err}");
        first_err.get_or_insert(err);
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }

    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(_) => "panicked".to_string(),
    }
}
