//! Admission and acknowledgment bookkeeping
//!
//! The admission side decides which timeslice positions go to the worker
//! pool and when buffer space can be released:
//!
//! - a position is submitted at most once at a time
//! - completions may arrive in any order; `acked` only moves over a
//!   contiguous run of retired positions
//! - work lost to a crashed worker is re-submitted up to `max_resubmits`
//!   times and abandoned afterwards
//! - repeated structural faults halt admission of new positions

use crate::timeslice::{Completion, CompletionStatus};
use log::{error, info, trace, warn};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// What a completion changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Retirement {
    /// The completion as retired, `None` if the position was re-queued
    pub completion: Option<Completion>,
    /// New acknowledged position, if it moved
    pub acked: Option<u64>,
}

/// Admission state for one run
#[derive(Debug)]
pub struct Admission {
    timeslice_size: u64,
    /// Next position never submitted before
    next_ts_pos: u64,
    /// Every position below this is retired
    acked: u64,
    /// Submitted positions and how often each was re-submitted
    outstanding: HashMap<u64, u32>,
    /// Re-submissions used by positions waiting in `retry`
    retry_attempts: HashMap<u64, u32>,
    /// Retired positions at or above `acked`
    retired: BTreeSet<u64>,
    /// Lost positions waiting to be submitted again
    retry: VecDeque<u64>,
    structural_faults: u64,
    structural_fault_limit: u64,
    max_resubmits: u32,
    halted: bool,
}

impl Admission {
    /// Start admitting at position zero
    ///
    /// # Arguments
    ///
    /// * `timeslice_size` - Distance between consecutive positions
    /// * `structural_fault_limit` - Faults tolerated before halting; zero never halts
    /// * `max_resubmits` - Re-submissions of a lost position before it is abandoned
    pub fn new(timeslice_size: u64, structural_fault_limit: u64, max_resubmits: u32) -> Self {
        Self {
            timeslice_size,
            next_ts_pos: 0,
            acked: 0,
            outstanding: HashMap::new(),
            retry_attempts: HashMap::new(),
            retired: BTreeSet::new(),
            retry: VecDeque::new(),
            structural_faults: 0,
            structural_fault_limit,
            max_resubmits,
            halted: false,
        }
    }

    /// The position to submit next, if any
    ///
    /// Lost positions come first; new positions are offered only while
    /// admission is not halted and `is_complete` accepts them.
    pub fn peek(&self, is_complete: impl Fn(u64) -> bool) -> Option<u64> {
        if let Some(&ts_pos) = self.retry.front() {
            return Some(ts_pos);
        }
        if !self.halted && is_complete(self.next_ts_pos) {
            return Some(self.next_ts_pos);
        }
        None
    }

    /// Record that the position returned by [`peek`](Self::peek) was submitted
    pub fn confirm(&mut self, ts_pos: u64) {
        if self.retry.front() == Some(&ts_pos) {
            self.retry.pop_front();
            let attempts = self.retry_attempts.remove(&ts_pos).unwrap_or(0);
            self.outstanding.insert(ts_pos, attempts);
        } else {
            debug_assert_eq!(ts_pos, self.next_ts_pos);
            self.outstanding.insert(ts_pos, 0);
            self.next_ts_pos += self.timeslice_size;
        }
        trace!("submitted timeslice at ts_pos {}", ts_pos);
    }

    /// Account for a completion
    pub fn complete(&mut self, completion: Completion) -> Retirement {
        let Some(attempts) = self.outstanding.remove(&completion.ts_pos) else {
            warn!(
                "ignoring completion for ts_pos {} that is not outstanding",
                completion.ts_pos
            );
            return Retirement::default();
        };

        let mut completion = completion;
        match completion.status {
            CompletionStatus::Lost if attempts < self.max_resubmits => {
                warn!(
                    "timeslice at ts_pos {} lost, re-submitting (attempt {} of {})",
                    completion.ts_pos,
                    attempts + 1,
                    self.max_resubmits
                );
                self.retry_attempts.insert(completion.ts_pos, attempts + 1);
                self.retry.push_back(completion.ts_pos);
                return Retirement::default();
            }
            CompletionStatus::Lost => {
                error!(
                    "timeslice at ts_pos {} lost {} times, abandoning it",
                    completion.ts_pos,
                    attempts + 1
                );
                completion.status = CompletionStatus::Abandoned;
            }
            CompletionStatus::StructuralFault => {
                self.structural_faults += 1;
                if !self.halted
                    && self.structural_fault_limit > 0
                    && self.structural_faults >= self.structural_fault_limit
                {
                    self.halted = true;
                    info!(
                        "admission halted after {} structural faults, last at ts_pos {}",
                        self.structural_faults, completion.ts_pos
                    );
                }
            }
            _ => {}
        }

        self.retired.insert(completion.ts_pos);
        let before = self.acked;
        while self.retired.remove(&self.acked) {
            self.acked += self.timeslice_size;
        }

        Retirement {
            completion: Some(completion),
            acked: (self.acked != before).then_some(self.acked),
        }
    }

    /// Every position below this one is retired
    pub fn acked(&self) -> u64 {
        self.acked
    }

    /// Next position never submitted before
    pub fn next_ts_pos(&self) -> u64 {
        self.next_ts_pos
    }

    /// Submitted positions without a completion
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Lost positions waiting to be submitted again
    pub fn pending_retries(&self) -> usize {
        self.retry.len()
    }

    /// True if nothing is submitted or waiting to be
    pub fn is_idle(&self) -> bool {
        self.outstanding.is_empty() && self.retry.is_empty()
    }

    /// Structural faults seen so far
    pub fn structural_faults(&self) -> u64 {
        self.structural_faults
    }

    /// True once new positions are no longer admitted
    pub fn halted(&self) -> bool {
        self.halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(ts_pos: u64, status: CompletionStatus) -> Completion {
        Completion { ts_pos, status }
    }

    fn submit_all(admission: &mut Admission, count: usize) -> Vec<u64> {
        (0..count)
            .map(|_| {
                let ts_pos = admission.peek(|_| true).unwrap();
                admission.confirm(ts_pos);
                ts_pos
            })
            .collect()
    }

    #[test]
    fn test_peek_requires_completeness() {
        let mut admission = Admission::new(100, 2, 1);
        assert_eq!(admission.peek(|_| false), None);
        assert_eq!(admission.peek(|p| p < 200), Some(0));

        assert_eq!(submit_all(&mut admission, 2), vec![0, 100]);
        assert_eq!(admission.peek(|p| p < 200), None);
        assert_eq!(admission.outstanding(), 2);
    }

    #[test]
    fn test_out_of_order_acknowledgment() {
        let mut admission = Admission::new(100, 2, 1);
        submit_all(&mut admission, 3);

        let retirement = admission.complete(done(200, CompletionStatus::Verified));
        assert_eq!(retirement.acked, None);
        let retirement = admission.complete(done(100, CompletionStatus::Verified));
        assert_eq!(retirement.acked, None);
        assert_eq!(admission.acked(), 0);

        let retirement = admission.complete(done(0, CompletionStatus::ContentError));
        assert_eq!(retirement.acked, Some(300));
        assert_eq!(retirement.completion, Some(done(0, CompletionStatus::ContentError)));
        assert!(admission.is_idle());
    }

    #[test]
    fn test_lost_work_is_resubmitted_then_abandoned() {
        let mut admission = Admission::new(100, 2, 1);
        submit_all(&mut admission, 2);

        let retirement = admission.complete(done(0, CompletionStatus::Lost));
        assert_eq!(retirement, Retirement::default());
        assert_eq!(admission.pending_retries(), 1);
        assert_eq!(admission.peek(|_| true), Some(0));
        admission.confirm(0);
        assert_eq!(admission.next_ts_pos(), 200);

        let retirement = admission.complete(done(0, CompletionStatus::Lost));
        assert_eq!(retirement.completion, Some(done(0, CompletionStatus::Abandoned)));
        assert_eq!(retirement.acked, Some(100));
    }

    #[test]
    fn test_structural_faults_halt_admission() {
        let mut admission = Admission::new(10, 2, 1);
        submit_all(&mut admission, 3);

        admission.complete(done(0, CompletionStatus::StructuralFault));
        assert!(!admission.halted());
        admission.complete(done(10, CompletionStatus::StructuralFault));
        assert!(admission.halted());
        assert_eq!(admission.peek(|_| true), None);

        let retirement = admission.complete(done(20, CompletionStatus::Verified));
        assert_eq!(retirement.acked, Some(30));
        assert_eq!(admission.structural_faults(), 2);
    }

    #[test]
    fn test_unknown_completion_is_ignored() {
        let mut admission = Admission::new(10, 2, 1);
        assert_eq!(admission.complete(done(40, CompletionStatus::Verified)), Retirement::default());
        assert_eq!(admission.acked(), 0);
    }
}
