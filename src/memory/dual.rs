//! Dual-index ring buffer: payload bytes plus microslice descriptors
//!
//! This module implements the single-producer ring buffer pair that sits
//! between an input link and the verification workers. Key features include:
//!
//! - Two independently sized power-of-two regions (payload, descriptors)
//!   advanced by one logical `DualIndex` pair
//! - Reserve-Write-Publish pattern: payload bytes are written into a
//!   reservation and become visible only when the descriptor is published
//! - Exact per-item flow control plus a coarse low-water check
//! - A published copy of the write index for lock-free completeness polling
//!
//! The producer owns `write_index`; `read_index` moves only through
//! `advance_read`, called by the coordinator once every timeslice below the
//! new position has been retired.

use crate::error::{Result, RingError};
use crate::memory::region::{HeapRegion, PayloadSource, RingRegion};
use crate::memory::{DualIndex, MicrosliceDescriptor, PublishedIndex};

/// Space reserved for one microslice payload
///
/// Nothing becomes visible to consumers until [`Reservation::publish`] is
/// called. Dropping a reservation leaves both indices untouched.
pub struct Reservation<'a, S: PayloadSource> {
    /// Parent buffer
    ring: &'a mut DualRingBuffer<S>,
    /// Logical payload offset of this reservation
    offset: u64,
    /// Reserved payload size in bytes
    size: u32,
    /// Bytes written so far
    written: u64,
}

impl<'a, S: PayloadSource> Reservation<'a, S> {
    /// Logical payload offset
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reserved payload size in bytes
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Descriptor index the microslice will be published at
    pub fn desc_index(&self) -> u64 {
        self.ring.write_index.desc
    }

    /// Append payload bytes
    ///
    /// # Panics
    ///
    /// Panics if the total exceeds the reserved size
    pub fn write(&mut self, bytes: &[u8]) {
        assert!(
            self.written + bytes.len() as u64 <= u64::from(self.size),
            "data is larger than reservation"
        );

        self.ring.data.write(self.offset + self.written, bytes);
        self.written += bytes.len() as u64;
    }

    /// Append one little-endian 64-bit payload word
    pub fn write_word(&mut self, word: u64) {
        self.write(&word.to_le_bytes());
    }

    /// Publish the descriptor, making the microslice visible to consumers
    ///
    /// Returns the descriptor index. The descriptor must describe exactly the
    /// reserved payload region.
    pub fn publish(self, descriptor: MicrosliceDescriptor) -> Result<u64> {
        if descriptor.offset != self.offset || descriptor.size != self.size {
            return Err(RingError::DescriptorMismatch {
                expected_offset: self.offset,
                expected_size: self.size,
                found_offset: descriptor.offset,
                found_size: descriptor.size,
            });
        }

        let ring = self.ring;
        let desc_index = ring.write_index.desc;
        ring.desc.write(desc_index * MicrosliceDescriptor::SIZE as u64, &descriptor.to_bytes());

        ring.write_index.data += u64::from(self.size);
        ring.write_index.desc += 1;
        ring.published.store(ring.write_index);

        Ok(desc_index)
    }
}

/// Ring buffer pair for one input component
pub struct DualRingBuffer<S: PayloadSource = HeapRegion> {
    /// Payload bytes
    data: RingRegion<S>,
    /// Descriptor entries, `MicrosliceDescriptor::SIZE` bytes each
    desc: RingRegion<S>,
    /// Capacity of the descriptor buffer in entries
    desc_entries: u64,
    /// Producer position
    write_index: DualIndex,
    /// Oldest position still owned by consumers
    read_index: DualIndex,
    /// Lock-free copy of `write_index`
    published: PublishedIndex,
}

impl<S: PayloadSource> DualRingBuffer<S> {
    /// Allocate a buffer pair of `2^data_size_exp` bytes and
    /// `2^desc_size_exp` descriptor entries
    pub fn new(data_size_exp: u32, desc_size_exp: u32) -> Result<Self> {
        let data_len = 1usize
            .checked_shl(data_size_exp)
            .ok_or_else(|| RingError::InvalidConfig(format!("data size exponent {data_size_exp} too large")))?;
        let desc_len = 1usize
            .checked_shl(desc_size_exp)
            .and_then(|entries| entries.checked_mul(MicrosliceDescriptor::SIZE))
            .ok_or_else(|| RingError::InvalidConfig(format!("descriptor size exponent {desc_size_exp} too large")))?;

        Self::with_sources(S::allocate(data_len)?, S::allocate(desc_len)?)
    }

    /// Build a buffer pair over existing storage
    ///
    /// Both regions must be powers of two in bytes; the descriptor region
    /// must hold at least one descriptor.
    pub fn with_sources(data: S, desc: S) -> Result<Self> {
        let data = RingRegion::new(data, "data buffer")?;
        let desc = RingRegion::new(desc, "descriptor buffer")?;
        if desc.size() < MicrosliceDescriptor::SIZE as u64 {
            return Err(RingError::InvalidConfig(format!(
                "descriptor buffer of {} bytes cannot hold a descriptor",
                desc.size()
            )));
        }
        let desc_entries = desc.size() / MicrosliceDescriptor::SIZE as u64;

        Ok(Self {
            data,
            desc,
            desc_entries,
            write_index: DualIndex::ZERO,
            read_index: DualIndex::ZERO,
            published: PublishedIndex::new(),
        })
    }

    /// Payload buffer capacity in bytes
    pub fn data_size(&self) -> u64 {
        self.data.size()
    }

    /// Descriptor buffer capacity in entries
    pub fn desc_size(&self) -> u64 {
        self.desc_entries
    }

    /// Current producer position
    pub fn write_index(&self) -> DualIndex {
        self.write_index
    }

    /// Current consumer position
    pub fn read_index(&self) -> DualIndex {
        self.read_index
    }

    /// Handle to the lock-free published write index
    pub fn published(&self) -> PublishedIndex {
        self.published.clone()
    }

    /// Occupied space in both dimensions
    pub fn used(&self) -> DualIndex {
        self.write_index - self.read_index
    }

    /// Free space in both dimensions
    pub fn available_space(&self) -> DualIndex {
        let used = self.used();
        DualIndex::new(self.data_size() - used.data, self.desc_size() - used.desc)
    }

    /// Coarse low-water check: at least a quarter of both buffers is free
    ///
    /// This is a throughput heuristic for starting a production batch; only
    /// [`fits`](Self::fits) guards against overwriting unread data.
    pub fn has_low_water_space(&self) -> bool {
        let free = self.available_space();
        free.data >= self.data_size() / 4 && free.desc >= self.desc_size() / 4
    }

    /// Exact per-item check for a payload of `size` bytes
    pub fn fits(&self, size: u32) -> bool {
        let used = self.used();
        used.data + u64::from(size) <= self.data_size() && used.desc < self.desc_size()
    }

    /// Reserve space for a payload of `size` bytes
    ///
    /// Returns `None` if the payload or its descriptor would overwrite
    /// unread data. This is backpressure, not an error.
    pub fn reserve(&mut self, size: u32) -> Option<Reservation<'_, S>> {
        if !self.fits(size) {
            return None;
        }

        let offset = self.write_index.data;
        Some(Reservation {
            ring: self,
            offset,
            size,
            written: 0,
        })
    }

    /// Descriptor at a logical index, if it is published and not yet released
    pub fn descriptor(&self, desc_index: u64) -> Option<MicrosliceDescriptor> {
        if desc_index < self.read_index.desc || desc_index >= self.write_index.desc {
            return None;
        }

        let mut bytes = [0u8; MicrosliceDescriptor::SIZE];
        self.desc.read_into(desc_index * MicrosliceDescriptor::SIZE as u64, &mut bytes);
        Some(MicrosliceDescriptor::from_bytes(&bytes))
    }

    /// Copy the payload of a microslice into `out`, replacing its contents
    pub fn copy_content(&self, descriptor: &MicrosliceDescriptor, out: &mut Vec<u8>) {
        let size = (descriptor.size as usize).min(self.data_size() as usize);
        out.clear();
        out.resize(size, 0);
        self.data.read_into(descriptor.offset, out);
    }

    /// Iterate the complete 64-bit words of a microslice payload
    pub fn content_words(&self, descriptor: &MicrosliceDescriptor) -> impl Iterator<Item = u64> + '_ {
        let offset = descriptor.offset;
        let words = u64::from(descriptor.size) / 8;
        (0..words).map(move |i| self.data.read_word(offset + i * 8))
    }

    /// Read one payload word at a logical byte index
    pub fn read_data_word(&self, logical: u64) -> u64 {
        self.data.read_word(logical)
    }

    /// Release everything below `new_read_index` for reuse
    ///
    /// The index may not move backwards and may not pass the write index.
    pub fn advance_read(&mut self, new_read_index: DualIndex) -> Result<()> {
        self.check_read_index(new_read_index)?;
        self.read_index = new_read_index;
        Ok(())
    }

    /// Check that `new_read_index` is a valid target for [`advance_read`](Self::advance_read)
    pub fn check_read_index(&self, new_read_index: DualIndex) -> Result<()> {
        if !new_read_index.dominates(&self.read_index) {
            return Err(RingError::IndexRegression {
                current: self.read_index,
                requested: new_read_index,
            });
        }
        if !self.write_index.dominates(&new_read_index) {
            return Err(RingError::IndexBeyondWrite {
                requested: new_read_index,
                write: self.write_index,
            });
        }
        Ok(())
    }

    /// Payload storage
    pub fn data_region(&self) -> &RingRegion<S> {
        &self.data
    }

    /// Payload storage, mutably
    ///
    /// Writes through this handle bypass reservations. It exists for agents
    /// that fill payload outside the producer path, such as a device writing
    /// into its mapped region or a test injecting corruption.
    pub fn data_region_mut(&mut self) -> &mut RingRegion<S> {
        &mut self.data
    }

    /// Descriptor storage, mutably
    ///
    /// Entry `n` lives at logical byte `n * MicrosliceDescriptor::SIZE`. Like
    /// [`data_region_mut`](Self::data_region_mut) this bypasses publication
    /// and leaves both indices untouched.
    pub fn desc_region_mut(&mut self) -> &mut RingRegion<S> {
        &mut self.desc
    }
}
