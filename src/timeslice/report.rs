//! Verification findings
//!
//! Findings are data, not errors: a timeslice with bad content or broken
//! structure is still completed and retired, and the findings travel in its
//! `VerificationReport`.

use crate::timeslice::CompletionStatus;
use std::fmt;
use thiserror::Error;

/// A content check failed for one microslice
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    /// Header id or version is not the standard layout
    #[error("component {component} ms {idx}: unexpected header {hdr_id:#04x}/{hdr_ver:#04x}")]
    Header {
        /// Input component
        component: usize,
        /// Microslice index
        idx: u64,
        /// Header id found
        hdr_id: u8,
        /// Header version found
        hdr_ver: u8,
    },

    /// A descriptor field changed within the timeslice component
    #[error("component {component} ms {idx}: {field} changed from {expected:#x} to {found:#x}")]
    DescriptorChanged {
        /// Input component
        component: usize,
        /// Microslice index
        idx: u64,
        /// Name of the field
        field: &'static str,
        /// Value in the first microslice
        expected: u64,
        /// Value in this microslice
        found: u64,
    },

    /// The payload was truncated upstream
    #[error("component {component} ms {idx}: payload truncated (flags {flags:#06x})")]
    Truncated {
        /// Input component
        component: usize,
        /// Microslice index
        idx: u64,
        /// Descriptor flags
        flags: u16,
    },

    /// The front-end flagged a data error
    #[error("component {component} ms {idx}: data error flagged (flags {flags:#06x})")]
    DataError {
        /// Input component
        component: usize,
        /// Microslice index
        idx: u64,
        /// Descriptor flags
        flags: u16,
    },

    /// The payload size is not a whole number of words
    #[error("component {component} ms {idx}: size {size} is not a multiple of 8")]
    UnalignedSize {
        /// Input component
        component: usize,
        /// Microslice index
        idx: u64,
        /// Payload size in bytes
        size: u32,
    },

    /// A ramp word has the wrong value
    #[error("component {component} ms {idx} offset {byte_offset}: expected {expected:#018x}, found {found:#018x}")]
    RampWord {
        /// Input component
        component: usize,
        /// Microslice index
        idx: u64,
        /// Byte offset within the microslice
        byte_offset: u64,
        /// Expected word
        expected: u64,
        /// Stored word
        found: u64,
    },

    /// The XOR-folded checksum does not match the descriptor
    #[error("component {component} ms {idx}: checksum {found:#010x}, descriptor says {expected:#010x}")]
    Checksum {
        /// Input component
        component: usize,
        /// Microslice index
        idx: u64,
        /// Checksum in the descriptor
        expected: u32,
        /// Checksum of the payload
        found: u32,
    },

    /// The CRC-32 does not match the descriptor
    #[error("component {component} ms {idx}: crc32 {found:#010x}, descriptor says {expected:#010x}")]
    Crc32 {
        /// Input component
        component: usize,
        /// Microslice index
        idx: u64,
        /// CRC in the descriptor
        expected: u32,
        /// CRC of the payload
        found: u32,
    },

    /// A counter word lacks the marker byte
    #[error("component {component} ms {idx} offset {byte_offset}: bad marker in {found:#018x}")]
    CounterMarker {
        /// Input component
        component: usize,
        /// Microslice index
        idx: u64,
        /// Byte offset within the microslice
        byte_offset: u64,
        /// Stored word
        found: u64,
    },

    /// A counter word carries a different stream id
    #[error("component {component} ms {idx} offset {byte_offset}: flim id {found:#04x}, expected {expected:#04x}")]
    FlimId {
        /// Input component
        component: usize,
        /// Microslice index
        idx: u64,
        /// Byte offset within the microslice
        byte_offset: u64,
        /// Stream id of the first word
        expected: u8,
        /// Stream id of this word
        found: u8,
    },

    /// A counter word names a channel out of range
    #[error("component {component} ms {idx} offset {byte_offset}: channel {channel} not below {max_channels}")]
    ChannelRange {
        /// Input component
        component: usize,
        /// Microslice index
        idx: u64,
        /// Byte offset within the microslice
        byte_offset: u64,
        /// Channel found
        channel: u8,
        /// Channel limit
        max_channels: u8,
    },

    /// A counter word is out of sequence for its channel
    #[error("component {component} ms {idx} offset {byte_offset}: expected {expected:#018x}, found {found:#018x}")]
    CounterSequence {
        /// Input component
        component: usize,
        /// Microslice index
        idx: u64,
        /// Byte offset within the microslice
        byte_offset: u64,
        /// Expected word
        expected: u64,
        /// Stored word
        found: u64,
    },
}

/// A timeslice is structurally broken
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralFault {
    /// Components report different timeslice numbers for the same position
    TsNumMismatch {
        /// Descriptor position
        ts_pos: u64,
        /// `(component, ts_num)` of every component
        ts_nums: Vec<(usize, u64)>,
    },
    /// A microslice index breaks the sequence
    IndexDiscontinuity {
        /// Input component
        component: usize,
        /// Descriptor position of the microslice
        desc_index: u64,
        /// Index implied by the timeslice number
        expected: u64,
        /// Index in the descriptor
        found: u64,
    },
    /// A payload does not start where the previous one ended
    OffsetDiscontinuity {
        /// Input component
        component: usize,
        /// Descriptor position of the microslice
        desc_index: u64,
        /// End of the previous payload
        expected: u64,
        /// Offset in the descriptor
        found: u64,
    },
    /// A descriptor of the window is not available
    Missing {
        /// Input component
        component: usize,
        /// Descriptor position
        desc_index: u64,
    },
}

impl fmt::Display for StructuralFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralFault::TsNumMismatch { ts_pos, ts_nums } => {
                write!(f, "components disagree on ts_num at ts_pos {}:", ts_pos)?;
                for (component, ts_num) in ts_nums {
                    write!(f, " component {}={}", component, ts_num)?;
                }
                Ok(())
            }
            StructuralFault::IndexDiscontinuity {
                component,
                desc_index,
                expected,
                found,
            } => write!(
                f,
                "component {} desc {}: microslice index {}, expected {}",
                component, desc_index, found, expected
            ),
            StructuralFault::OffsetDiscontinuity {
                component,
                desc_index,
                expected,
                found,
            } => write!(
                f,
                "component {} desc {}: payload offset {}, expected {}",
                component, desc_index, found, expected
            ),
            StructuralFault::Missing { component, desc_index } => {
                write!(f, "component {} desc {}: descriptor missing", component, desc_index)
            }
        }
    }
}

/// Everything found while verifying one timeslice
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerificationReport {
    /// Descriptor position of the timeslice
    pub ts_pos: u64,
    /// Agreed timeslice number, `None` if components disagree
    pub ts_num: Option<u64>,
    /// Components inspected
    pub components: u64,
    /// Microslices inspected
    pub microslices: u64,
    /// Payload bytes inspected
    pub content_bytes: u64,
    /// Content findings
    pub content_errors: Vec<ContentError>,
    /// Structural findings
    pub structural_faults: Vec<StructuralFault>,
}

impl VerificationReport {
    /// Empty report for a position
    pub fn new(ts_pos: u64) -> Self {
        Self {
            ts_pos,
            ..Default::default()
        }
    }

    /// True if nothing was found
    pub fn is_ok(&self) -> bool {
        self.content_errors.is_empty() && self.structural_faults.is_empty()
    }

    /// Completion status, structural faults taking precedence
    pub fn status(&self) -> CompletionStatus {
        if !self.structural_faults.is_empty() {
            CompletionStatus::StructuralFault
        } else if !self.content_errors.is_empty() {
            CompletionStatus::ContentError
        } else {
            CompletionStatus::Verified
        }
    }
}
