//! Memory-mapped payload storage
//!
//! `MappedRegion` stands in for a DMA-mapped device buffer: the ring-buffer
//! logic addresses it exactly like heap storage, but the bytes live in a
//! mapping that another agent (a device, another process, a debugger reading
//! the backing file) can observe. Two flavours are provided:
//!
//! - anonymous mappings, used when a region is allocated generically
//! - file-backed mappings, which leave a snapshot of the buffer on disk

use crate::error::{Result, RingError};
use crate::memory::region::PayloadSource;
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Payload storage backed by a memory mapping
pub struct MappedRegion {
    /// The mapping itself
    map: MmapMut,
    /// Backing file, if any
    path: Option<PathBuf>,
}

impl MappedRegion {
    /// Map an anonymous zeroed region of `len` bytes
    pub fn anonymous(len: usize) -> Result<Self> {
        let map = MmapMut::map_anon(len).map_err(|source| RingError::Allocation { size: len, source })?;

        Ok(Self { map, path: None })
    }

    /// Create (or truncate) `path` to `len` bytes and map it
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the backing file
    /// * `len` - Size of the region in bytes
    pub fn file_backed<P: AsRef<Path>>(path: P, len: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(len as u64)?;

        // The file is owned by this region for its whole lifetime
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file) }
            .map_err(|source| RingError::Allocation { size: len, source })?;

        Ok(Self {
            map,
            path: Some(path),
        })
    }

    /// Backing file path, `None` for anonymous mappings
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Flush outstanding writes to the backing file
    pub fn flush(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}

impl PayloadSource for MappedRegion {
    fn allocate(len: usize) -> Result<Self> {
        Self::anonymous(len)
    }

    fn region(&self) -> &[u8] {
        &self.map
    }

    fn region_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }
}
