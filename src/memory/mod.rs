//! In-memory dual-index ring buffers and their binary layout
//!
//! This module provides the core data structures shared by producers and
//! verifiers. Key components include:
//!
//! - `MicrosliceDescriptor`, the fixed 32-byte record written by DMA engines
//! - `DualIndex`, the pair of monotonic logical counters (payload bytes,
//!   descriptor entries) that address both buffers
//! - `PublishedIndex`, a cache-padded atomic copy of the producer's write
//!   index that consumers poll without locking the buffer
//!
//! Logical indices never wrap; only storage does. Every physical position is
//! `logical & (size - 1)`, which is why all buffer sizes are powers of two.

pub mod dual;
pub mod mapped;
pub mod region;

use crossbeam_utils::CachePadded;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Microslice flag bits carried in `MicrosliceDescriptor::flags`.
pub mod flags {
    /// The `crc` field holds a CRC-32 of the payload computed by hardware.
    pub const CRC_VALID: u16 = 0x0001;
    /// The payload was truncated by the front-end because of an overflow.
    pub const OVERFLOW_FLIM: u16 = 0x0002;
    /// The payload was truncated by the user-side logic.
    pub const OVERFLOW_USER: u16 = 0x0004;
    /// The front-end flagged a data error.
    pub const DATA_ERROR: u16 = 0x0008;
}

/// Subsystem identifiers and format versions understood by the verifiers.
pub mod subsystem {
    /// Subsystem id used by the synthetic pattern sources.
    pub const FLES: u8 = 0xFF;
    /// Payload left uninitialized (throughput-only mode).
    pub const FORMAT_UNINITIALIZED: u8 = 0x00;
    /// Ramp payload: `(link_id << 48) | byte_offset` per word.
    pub const FORMAT_RAMP: u8 = 0x10;
    /// Multi-channel sequential counter payload.
    pub const FORMAT_SEQUENTIAL_COUNTER: u8 = 0x14;
}

/// A pair of monotonically increasing logical indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DualIndex {
    /// Logical payload byte index.
    pub data: u64,
    /// Logical descriptor entry index.
    pub desc: u64,
}

impl DualIndex {
    /// Both counters at zero.
    pub const ZERO: Self = Self { data: 0, desc: 0 };

    /// Create a new index pair.
    pub const fn new(data: u64, desc: u64) -> Self {
        Self { data, desc }
    }

    /// True if `self` is at or past `other` in both dimensions.
    pub fn dominates(&self, other: &DualIndex) -> bool {
        self.data >= other.data && self.desc >= other.desc
    }
}

impl Add for DualIndex {
    type Output = DualIndex;

    fn add(self, rhs: DualIndex) -> DualIndex {
        DualIndex::new(self.data + rhs.data, self.desc + rhs.desc)
    }
}

impl Sub for DualIndex {
    type Output = DualIndex;

    fn sub(self, rhs: DualIndex) -> DualIndex {
        DualIndex::new(self.data - rhs.data, self.desc - rhs.desc)
    }
}

/// Cache-padded atomic storage for a `DualIndex`
struct AtomicDualIndex {
    data: CachePadded<AtomicU64>,
    desc: CachePadded<AtomicU64>,
}

/// Lock-free view of a producer's write index.
///
/// The producer stores the data counter before the descriptor counter, so a
/// reader that observes descriptor `n` also observes the payload of every
/// descriptor below `n`.
#[derive(Clone)]
pub struct PublishedIndex {
    inner: Arc<AtomicDualIndex>,
}

impl PublishedIndex {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(AtomicDualIndex {
                data: CachePadded::new(AtomicU64::new(0)),
                desc: CachePadded::new(AtomicU64::new(0)),
            }),
        }
    }

    pub(crate) fn store(&self, index: DualIndex) {
        self.inner.data.store(index.data, Ordering::Release);
        self.inner.desc.store(index.desc, Ordering::Release);
    }

    /// Number of published descriptors.
    pub fn desc(&self) -> u64 {
        self.inner.desc.load(Ordering::Acquire)
    }

    /// Load the published index pair.
    pub fn load(&self) -> DualIndex {
        let desc = self.inner.desc.load(Ordering::Acquire);
        let data = self.inner.data.load(Ordering::Acquire);
        DualIndex { data, desc }
    }
}

/// Fixed 32-byte microslice descriptor, little-endian on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct MicrosliceDescriptor {
    /// Header format identifier (0xDD)
    pub hdr_id: u8,
    /// Header format version (0x01)
    pub hdr_ver: u8,
    /// Equipment (link) identifier
    pub eq_id: u16,
    /// Status and error flags, see [`flags`]
    pub flags: u16,
    /// Subsystem identifier
    pub sys_id: u8,
    /// Subsystem format version
    pub sys_ver: u8,
    /// Microslice index
    pub idx: u64,
    /// Payload checksum
    pub crc: u32,
    /// Payload size in bytes
    pub size: u32,
    /// Logical byte offset of the payload in the data buffer
    pub offset: u64,
}

const _: () = assert!(std::mem::size_of::<MicrosliceDescriptor>() == MicrosliceDescriptor::SIZE);

impl MicrosliceDescriptor {
    /// Size of the descriptor in bytes
    pub const SIZE: usize = 32;

    /// Header format identifier for the standard layout
    pub const HDR_ID: u8 = 0xDD;

    /// Header format version for the standard layout
    pub const HDR_VER: u8 = 0x01;

    /// Serialize into the wire layout.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.hdr_id;
        out[1] = self.hdr_ver;
        out[2..4].copy_from_slice(&self.eq_id.to_le_bytes());
        out[4..6].copy_from_slice(&self.flags.to_le_bytes());
        out[6] = self.sys_id;
        out[7] = self.sys_ver;
        out[8..16].copy_from_slice(&self.idx.to_le_bytes());
        out[16..20].copy_from_slice(&self.crc.to_le_bytes());
        out[20..24].copy_from_slice(&self.size.to_le_bytes());
        out[24..32].copy_from_slice(&self.offset.to_le_bytes());
        out
    }

    /// Deserialize from the wire layout.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let u32_at = |i: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&bytes[i..i + 4]);
            u32::from_le_bytes(b)
        };
        let u64_at = |i: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[i..i + 8]);
            u64::from_le_bytes(b)
        };

        Self {
            hdr_id: bytes[0],
            hdr_ver: bytes[1],
            eq_id: u16_at(2),
            flags: u16_at(4),
            sys_id: bytes[6],
            sys_ver: bytes[7],
            idx: u64_at(8),
            crc: u32_at(16),
            size: u32_at(20),
            offset: u64_at(24),
        }
    }

    /// Check whether a flag bit is set
    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    /// Logical offset one past the end of the payload
    pub fn end_offset(&self) -> u64 {
        self.offset + u64::from(self.size)
    }
}
