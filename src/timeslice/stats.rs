//! Verification counters shared by all workers

use crate::timeslice::report::VerificationReport;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals, updated concurrently by the workers
#[derive(Debug, Default)]
pub struct VerificationStats {
    timeslices: AtomicU64,
    components: AtomicU64,
    microslices: AtomicU64,
    content_bytes: AtomicU64,
    content_errors: AtomicU64,
    structural_faults: AtomicU64,
    failed_timeslices: AtomicU64,
    lost: AtomicU64,
    abandoned: AtomicU64,
}

impl VerificationStats {
    /// All counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a finished verification
    pub fn record(&self, report: &VerificationReport) {
        self.timeslices.fetch_add(1, Ordering::Relaxed);
        self.components.fetch_add(report.components, Ordering::Relaxed);
        self.microslices.fetch_add(report.microslices, Ordering::Relaxed);
        self.content_bytes.fetch_add(report.content_bytes, Ordering::Relaxed);
        self.content_errors
            .fetch_add(report.content_errors.len() as u64, Ordering::Relaxed);
        self.structural_faults
            .fetch_add(report.structural_faults.len() as u64, Ordering::Relaxed);
        if !report.is_ok() {
            self.failed_timeslices.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a timeslice lost to a worker crash
    pub fn record_lost(&self) {
        self.lost.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a timeslice given up after repeated losses
    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy of the current totals
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            timeslices: self.timeslices.load(Ordering::Relaxed),
            components: self.components.load(Ordering::Relaxed),
            microslices: self.microslices.load(Ordering::Relaxed),
            content_bytes: self.content_bytes.load(Ordering::Relaxed),
            content_errors: self.content_errors.load(Ordering::Relaxed),
            structural_faults: self.structural_faults.load(Ordering::Relaxed),
            failed_timeslices: self.failed_timeslices.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`VerificationStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Timeslices verified
    pub timeslices: u64,
    /// Timeslice components verified
    pub components: u64,
    /// Microslices verified
    pub microslices: u64,
    /// Payload bytes verified
    pub content_bytes: u64,
    /// Content findings
    pub content_errors: u64,
    /// Structural findings
    pub structural_faults: u64,
    /// Timeslices with at least one finding
    pub failed_timeslices: u64,
    /// Timeslices lost to worker crashes
    pub lost: u64,
    /// Timeslices abandoned after repeated losses
    pub abandoned: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timeslices checked: {} ({} failed), components: {}, microslices: {}, \
             content bytes: {}, content errors: {}, structural faults: {}, lost: {}, abandoned: {}",
            self.timeslices,
            self.failed_timeslices,
            self.components,
            self.microslices,
            self.content_bytes,
            self.content_errors,
            self.structural_faults,
            self.lost,
            self.abandoned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeslice::report::StructuralFault;

    #[test]
    fn test_record_reports() {
        let stats = VerificationStats::new();
        let mut report = VerificationReport::new(0);
        report.components = 2;
        report.microslices = 204;
        report.content_bytes = 4096;
        stats.record(&report);

        report.structural_faults.push(StructuralFault::Missing {
            component: 1,
            desc_index: 150,
        });
        stats.record(&report);
        stats.record_lost();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.timeslices, 2);
        assert_eq!(snapshot.microslices, 408);
        assert_eq!(snapshot.structural_faults, 1);
        assert_eq!(snapshot.failed_timeslices, 1);
        assert_eq!(snapshot.lost, 1);
        assert!(snapshot.to_string().starts_with("timeslices checked: 2 (1 failed)"));
    }
}
