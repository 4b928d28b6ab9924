use std::{collections::VecDeque, time::Instant};

use crate::{
    Result, TrainErr,
    profiler::Span,
    report::{Observation, Outputs},
};

/// The right to complete a single issued iteration.
///
/// Handles are minted by the trainer only and can't be cloned, a handler
/// either completes an iteration right away or keeps its handle until the
/// iteration's results are ready.
#[derive(Debug, PartialEq, Eq)]
pub struct StepHandle {
    index: usize,
}

impl StepHandle {
    pub(crate) fn new(index: usize) -> Self {
        Self { index }
    }

    /// The index of the iteration inside its epoch.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Completes the iteration with its outputs.
    pub fn complete(self, outputs: Outputs) -> Completion {
        Completion {
            index: self.index,
            outputs,
        }
    }
}

/// The results of an iteration, ready to be handed back to the trainer.
#[derive(Debug)]
pub struct Completion {
    index: usize,
    outputs: Outputs,
}

impl Completion {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    pub(crate) fn into_parts(self) -> (usize, Outputs) {
        (self.index, self.outputs)
    }
}

/// What a handler did with an issued iteration.
#[derive(Debug)]
pub enum StepOutcome {
    /// The iteration finished inside the `train_step` call.
    Completed(Completion),
    /// The handler kept the handle and will complete the iteration later.
    Deferred,
}

/// The profiling spans of an iteration, outermost first.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepSpans {
    pub iteration: Span,
    pub run_iteration: Span,
    pub train_step: Span,
}

/// Everything an iteration carries from being issued to being completed.
#[derive(Debug)]
pub(crate) struct StepContext<B> {
    pub index: usize,
    pub input: B,
    pub start: Instant,
    pub observation: Observation,
    pub spans: StepSpans,
}

/// The issued but not yet completed iterations, in issue order.
#[derive(Debug)]
pub(crate) struct StepQueue<B> {
    pending: VecDeque<StepContext<B>>,
}

impl<B> StepQueue<B> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    pub fn push(&mut self, ctx: StepContext<B>) {
        self.pending.push_back(ctx);
    }

    /// The most recently issued iteration.
    pub fn back_mut(&mut self) -> Option<&mut StepContext<B>> {
        self.pending.back_mut()
    }

    /// Takes the oldest pending iteration, which must be the one numbered `index`.
    ///
    /// # Returns
    /// An `OutOfOrderCompletion` error if the oldest pending iteration has a different index,
    /// or a `NoPendingStep` error if nothing is pending.
    pub fn pop(&mut self, index: usize) -> Result<StepContext<B>> {
        let expected = self
            .pending
            .front()
            .map(|ctx| ctx.index)
            .ok_or(TrainErr::NoPendingStep { got: index })?;

        if expected != index {
            return Err(TrainErr::OutOfOrderCompletion {
                expected,
                got: index,
            });
        }

        self.pending
            .pop_front()
            .ok_or(TrainErr::NoPendingStep { got: index })
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::Profiler;

    fn ctx(index: usize) -> StepContext<()> {
        let profiler = Profiler::new();

        StepContext {
            index,
            input: (),
            start: Instant::now(),
            observation: Observation::new(),
            spans: StepSpans {
                iteration: profiler.open("iteration", index),
                run_iteration: profiler.open("run_iteration", index),
                train_step: profiler.open("train_step", index),
            },
        }
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = StepQueue::new();
        queue.push(ctx(0));
        queue.push(ctx(1));

        assert_eq!(queue.pop(0).unwrap().index, 0);
        assert_eq!(queue.pop(1).unwrap().index, 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_out_of_order_pop_fails_and_keeps_the_queue() {
        let mut queue = StepQueue::new();
        queue.push(ctx(0));
        queue.push(ctx(1));

        let err = queue.pop(1).unwrap_err();
        assert_eq!(
            err,
            TrainErr::OutOfOrderCompletion {
                expected: 0,
                got: 1
            }
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_pop_on_empty_queue_fails() {
        let mut queue: StepQueue<()> = StepQueue::new();
        assert_eq!(queue.pop(3).unwrap_err(), TrainErr::NoPendingStep { got: 3 });
    }

    #[test]
    fn test_handle_completes_with_its_index() {
        let completion = StepHandle::new(7).complete(Outputs::new());
        assert_eq!(completion.index(), 7);
        assert!(completion.outputs().is_empty());
    }
}
