use std::{
    collections::BTreeMap,
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use tokio::sync::mpsc;
use training::{TrainErr, report::Value};

/// Everything an engine reported up to one of its checkpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// The position of the checkpoint among the engine's checkpoints.
    pub seq: usize,
    /// The amount of iterations the engine completed when it reached the checkpoint.
    pub iteration: usize,
    /// The values to compare, keyed `output/<name>` or `param/<name>`.
    pub records: BTreeMap<String, Value>,
}

/// The rendezvous between the engines and the comparer.
///
/// Every engine gets its own channel. With a concurrency of `K` the channels
/// hold at most `K` checkpoints, so an engine blocks once it's `K` checkpoints
/// ahead of the comparer and the comparer only advances with the slowest engine.
#[derive(Debug)]
pub struct ReportBarrier {
    concurrency: Option<NonZeroUsize>,
    cancelled: Arc<AtomicBool>,
    peak: Arc<AtomicUsize>,
}

impl ReportBarrier {
    /// Creates a new `ReportBarrier`.
    ///
    /// # Arguments
    /// * `concurrency` - How many checkpoints an engine may buffer, unbounded if `None`.
    pub fn new(concurrency: Option<NonZeroUsize>) -> Self {
        Self {
            concurrency,
            cancelled: Arc::new(AtomicBool::new(false)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Opens the channel of a single engine.
    pub fn channel(&self) -> (CheckpointSender, CheckpointReceiver) {
        let buffered = Arc::new(AtomicUsize::new(0));

        let (tx, rx) = match self.concurrency {
            Some(k) => {
                let (tx, rx) = mpsc::channel(k.get());
                (Tx::Bounded(tx), Rx::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Tx::Unbounded(tx), Rx::Unbounded(rx))
            }
        };

        let sender = CheckpointSender {
            tx,
            buffered: buffered.clone(),
            peak: self.peak.clone(),
            cancelled: self.cancelled.clone(),
        };

        let receiver = CheckpointReceiver { rx, buffered };
        (sender, receiver)
    }

    /// Tells every engine to stop at its next step.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// The most checkpoints a single engine had buffered at once.
    pub fn peak_buffered(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
enum Tx {
    Bounded(mpsc::Sender<Checkpoint>),
    Unbounded(mpsc::UnboundedSender<Checkpoint>),
}

#[derive(Debug)]
enum Rx {
    Bounded(mpsc::Receiver<Checkpoint>),
    Unbounded(mpsc::UnboundedReceiver<Checkpoint>),
}

/// The engine side of a barrier channel, used from the engine's own thread.
#[derive(Debug)]
pub struct CheckpointSender {
    tx: Tx,
    buffered: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    cancelled: Arc<AtomicBool>,
}

impl CheckpointSender {
    /// Hands a checkpoint to the comparer, blocking while the channel is full.
    ///
    /// Must not be called from inside an async context.
    ///
    /// # Errors
    /// `TrainErr::Aborted` if the comparison was cancelled or the comparer went away.
    pub fn send(&self, checkpoint: Checkpoint) -> training::Result<()> {
        if self.is_cancelled() {
            return Err(TrainErr::Aborted);
        }

        let buffered = match &self.tx {
            Tx::Bounded(tx) => {
                tx.blocking_send(checkpoint)
                    .map_err(|_| TrainErr::Aborted)?;
                tx.max_capacity() - tx.capacity()
            }
            Tx::Unbounded(tx) => {
                let buffered = self.buffered.fetch_add(1, Ordering::AcqRel) + 1;
                if tx.send(checkpoint).is_err() {
                    self.buffered.fetch_sub(1, Ordering::AcqRel);
                    return Err(TrainErr::Aborted);
                }
                buffered
            }
        };

        self.peak.fetch_max(buffered, Ordering::AcqRel);
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// The comparer side of a barrier channel.
#[derive(Debug)]
pub struct CheckpointReceiver {
    rx: Rx,
    buffered: Arc<AtomicUsize>,
}

impl CheckpointReceiver {
    /// Waits for the next checkpoint.
    ///
    /// # Returns
    /// `None` once the engine dropped its sender and every checkpoint was received.
    pub async fn recv(&mut self) -> Option<Checkpoint> {
        match &mut self.rx {
            Rx::Bounded(rx) => rx.recv().await,
            Rx::Unbounded(rx) => {
                let checkpoint = rx.recv().await?;
                self.buffered.fetch_sub(1, Ordering::AcqRel);
                Some(checkpoint)
            }
        }
    }
}
