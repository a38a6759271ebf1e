//! FLES Ring Buffer - dual-index ring buffers and timeslice verification
//! for a detector-readout data plane.
//!
//! # Overview
//!
//! Every input link writes microslices (a fixed 32-byte descriptor plus a
//! variable-size payload) into its own pair of power-of-two ring buffers.
//! Consecutive microslices are grouped into timeslices that are aligned
//! across all links and verified bit-exactly by a pool of worker threads
//! before their buffer space is released.
//!
//! # Key Features
//!
//! - Dual-index ring buffers with monotonic logical indices, masked
//!   wraparound and exact per-microslice flow control
//! - Reserve-Write-Publish pattern: a descriptor becomes visible only after
//!   its payload is complete
//! - Heap or memory-mapped payload storage behind one `PayloadSource` trait
//! - Deterministic pattern generator (ramp, sequential counter, or
//!   throughput-only) with seeded sizes and optional rate limiting
//! - Ramp/CRC and multi-channel sequential-counter checkers plus
//!   cross-component timeslice alignment checks
//! - Supervised worker pool with crash detection, restart-by-index and
//!   re-submission of lost work
//! - Out-of-order completion acknowledgment
//!
//! # Usage
//!
//! The library is typically used by:
//! 1. Building a `PipelineConfig` (or starting from its defaults)
//! 2. Creating a `Pipeline` with a `CompletionSink`
//! 3. Driving it with `poll` or `run_until`
//! 4. Calling `shutdown` to join the workers and collect the statistics
//!
//! The building blocks (`DualRingBuffer`, `PatternGenerator`,
//! `TimesliceVerifier`, `WorkerPool`) can also be used on their own.

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod generator;
pub mod memory;
pub mod pattern;
pub mod pipeline;
pub mod timeslice;
pub mod worker;

pub use config::{
    ContentPattern, ContentSize, GeneratorConfig, PipelineConfig, PoolConfig, RatePolicy, RingConfig,
    TimesliceConfig,
};
pub use error::{Result, RingError};
pub use generator::{PatternGenerator, ProceedOutcome, StopReason};
pub use memory::dual::{DualRingBuffer, Reservation};
pub use memory::mapped::MappedRegion;
pub use memory::region::{HeapRegion, PayloadSource};
pub use memory::{DualIndex, MicrosliceDescriptor};
pub use pipeline::{CollectingSink, CompletionSink, Pipeline, PollOutcome};
pub use timeslice::verifier::TimesliceVerifier;
pub use timeslice::{Completion, CompletionStatus, TimesliceBuffer, WorkItem};
pub use worker::pool::WorkerPool;

/// Re-exported verification types used in the API
pub mod types {
    pub use crate::timeslice::admission::{Admission, Retirement};
    pub use crate::timeslice::counter::SequentialCounterVerifier;
    pub use crate::timeslice::ramp::RampChecker;
    pub use crate::timeslice::report::{ContentError, StructuralFault, VerificationReport};
    pub use crate::timeslice::stats::{StatsSnapshot, VerificationStats};
    pub use crate::timeslice::TimesliceComponentDescriptor;
    pub use crate::worker::queue::{ConcurrentQueue, Pop, PushError};
    pub use crate::worker::Processor;
}
