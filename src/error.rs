//! Error types shared by the ring buffers, the worker pool and the pipeline.
//!
//! Only setup and API-misuse conditions are errors. Backpressure is reported
//! through `Option`/outcome values and verification findings are collected
//! into reports, so neither ever shows up here.

use crate::memory::DualIndex;
use std::io;
use thiserror::Error;

/// Errors surfaced by the data plane.
#[derive(Debug, Error)]
pub enum RingError {
    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A buffer region is not sized as a power of two.
    #[error("{what} size {size} is not a power of two")]
    NotPowerOfTwo {
        /// Which region was rejected.
        what: &'static str,
        /// The offending size in bytes or entries.
        size: u64,
    },

    /// Allocating or mapping a payload region failed.
    #[error("failed to allocate {size} byte region: {source}")]
    Allocation {
        /// Requested region size in bytes.
        size: usize,
        /// Underlying mapping error.
        #[source]
        source: io::Error,
    },

    /// An I/O error occurred on a file-backed region.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The read index would move backwards.
    #[error("read index would move backwards from {current:?} to {requested:?}")]
    IndexRegression {
        /// Current read index.
        current: DualIndex,
        /// Requested read index.
        requested: DualIndex,
    },

    /// The read index would overtake the write index.
    #[error("read index {requested:?} is beyond write index {write:?}")]
    IndexBeyondWrite {
        /// Requested read index.
        requested: DualIndex,
        /// Current write index.
        write: DualIndex,
    },

    /// A published descriptor does not describe the reserved payload.
    #[error(
        "descriptor does not match reservation: expected offset {expected_offset} size {expected_size}, \
         found offset {found_offset} size {found_size}"
    )]
    DescriptorMismatch {
        /// Logical offset of the reservation.
        expected_offset: u64,
        /// Size of the reservation in bytes.
        expected_size: u32,
        /// Offset carried by the descriptor.
        found_offset: u64,
        /// Size carried by the descriptor.
        found_size: u32,
    },

    /// An input component index is out of range.
    #[error("unknown input component {0}")]
    UnknownComponent(usize),

    /// A push was attempted on a stopped queue.
    #[error("queue stopped")]
    QueueStopped,

    /// A worker or supervisor thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] io::Error),
}

/// Result type for data-plane operations.
pub type Result<T> = std::result::Result<T, RingError>;
