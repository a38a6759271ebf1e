//! Payload storage backends and wraparound addressing
//!
//! A `PayloadSource` is a flat, fixed-size byte region. It is the boundary
//! between the ring-buffer logic and whatever actually owns the memory: plain
//! heap bytes for the synthetic generator, or a mapped region standing in for
//! a DMA-mapped device buffer (see the `mapped` module).
//!
//! `RingRegion` layers logical addressing on top of a source. Callers always
//! pass unwrapped logical indices; the region applies the power-of-two mask
//! and splits accesses that straddle the physical end.

use crate::error::{Result, RingError};

/// Flat byte storage backing one ring buffer
pub trait PayloadSource: Send + Sync {
    /// Allocate a zeroed region of `len` bytes
    fn allocate(len: usize) -> Result<Self>
    where
        Self: Sized;

    /// The whole region
    fn region(&self) -> &[u8];

    /// The whole region, mutably
    fn region_mut(&mut self) -> &mut [u8];

    /// Region size in bytes
    fn len(&self) -> usize {
        self.region().len()
    }

    /// True for a zero-sized region
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `bytes` to the physical `offset`
    fn write_region(&mut self, offset: usize, bytes: &[u8]) {
        self.region_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Borrow `len` bytes at the physical `offset`
    fn read_region(&self, offset: usize, len: usize) -> &[u8] {
        &self.region()[offset..offset + len]
    }
}

/// Heap-allocated payload storage
pub struct HeapRegion {
    bytes: Box<[u8]>,
}

impl HeapRegion {
    /// Create a zeroed heap region
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len].into_boxed_slice(),
        }
    }
}

impl PayloadSource for HeapRegion {
    fn allocate(len: usize) -> Result<Self> {
        Ok(Self::new(len))
    }

    fn region(&self) -> &[u8] {
        &self.bytes
    }

    fn region_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// A payload source addressed by logical index modulo its size
pub struct RingRegion<S: PayloadSource> {
    source: S,
    mask: u64,
}

impl<S: PayloadSource> RingRegion<S> {
    /// Wrap a source whose size is a power of two
    pub fn new(source: S, what: &'static str) -> Result<Self> {
        let size = source.len() as u64;
        if size == 0 || !size.is_power_of_two() {
            return Err(RingError::NotPowerOfTwo { what, size });
        }

        Ok(Self {
            source,
            mask: size - 1,
        })
    }

    /// Region size in bytes
    pub fn size(&self) -> u64 {
        self.mask + 1
    }

    /// Physical position of a logical index
    pub fn physical(&self, logical: u64) -> usize {
        (logical & self.mask) as usize
    }

    /// Write `bytes` starting at a logical index, wrapping at the end
    pub fn write(&mut self, logical: u64, bytes: &[u8]) {
        assert!(bytes.len() as u64 <= self.size(), "write larger than region");

        let start = self.physical(logical);
        let first = bytes.len().min(self.size() as usize - start);
        self.source.write_region(start, &bytes[..first]);
        if first < bytes.len() {
            self.source.write_region(0, &bytes[first..]);
        }
    }

    /// Fill `out` from a logical index, wrapping at the end
    pub fn read_into(&self, logical: u64, out: &mut [u8]) {
        assert!(out.len() as u64 <= self.size(), "read larger than region");

        let start = self.physical(logical);
        let first = out.len().min(self.size() as usize - start);
        out[..first].copy_from_slice(self.source.read_region(start, first));
        if first < out.len() {
            let rest = out.len() - first;
            out[first..].copy_from_slice(self.source.read_region(0, rest));
        }
    }

    /// Read one little-endian 64-bit word at a logical index
    pub fn read_word(&self, logical: u64) -> u64 {
        let mut word = [0u8; 8];
        self.read_into(logical, &mut word);
        u64::from_le_bytes(word)
    }

    /// Write one little-endian 64-bit word at a logical index
    pub fn write_word(&mut self, logical: u64, word: u64) {
        self.write(logical, &word.to_le_bytes());
    }

    /// The underlying storage
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The underlying storage, mutably
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}
