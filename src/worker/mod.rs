//! Verification worker pool
//!
//! Work items travel from the admission side to a fixed set of worker
//! threads through a bounded [`queue::ConcurrentQueue`]; completions come
//! back through a second one. The pool supervises its threads: a worker that
//! panics is replaced under the same index and the timeslice it held is
//! reported back as [`CompletionStatus::Lost`](crate::timeslice::CompletionStatus::Lost).

pub mod pool;
pub mod queue;

use crate::timeslice::{Completion, WorkItem};

/// Per-worker processing step
///
/// Each worker thread owns one processor, created by the pool's factory
/// with the worker index. A processor must not be shared between threads.
pub trait Processor: Send + 'static {
    /// Process one work item into its completion
    fn process(&mut self, item: WorkItem) -> Completion;
}

impl<F> Processor for F
where
    F: FnMut(WorkItem) -> Completion + Send + 'static,
{
    fn process(&mut self, item: WorkItem) -> Completion {
        self(item)
    }
}
