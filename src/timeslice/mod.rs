//! Timeslice model over a set of component ring buffers
//!
//! A timeslice is the window of `timeslice_size + overlap_size` consecutive
//! microslices starting at the same descriptor position (`ts_pos`) in every
//! input component. This module provides:
//!
//! - `TimesliceBuffer`, the component buffers behind reader/writer locks
//!   plus their lock-free published write indices
//! - the handles exchanged with the worker pool (`WorkItem`, `Completion`)
//! - admission bookkeeping, content checkers and verification reports in the
//!   submodules
//!
//! The producer takes a component's write lock only while it generates;
//! verifiers share read locks. Completeness is decided from the published
//! indices alone.

pub mod admission;
pub mod counter;
pub mod ramp;
pub mod report;
pub mod stats;
pub mod verifier;

use crate::config::{RingConfig, TimesliceConfig};
use crate::error::{Result, RingError};
use crate::memory::dual::DualRingBuffer;
use crate::memory::region::{HeapRegion, PayloadSource};
use crate::memory::{DualIndex, PublishedIndex};
use log::debug;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Where one component's part of a timeslice starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimesliceComponentDescriptor {
    /// Input component index
    pub component: usize,
    /// Timeslice number, `idx / timeslice_size` of the first microslice
    pub ts_num: u64,
    /// Descriptor position of the first microslice
    pub ts_pos: u64,
    /// Microslices in the window, overlap included
    pub num_microslices: u64,
}

/// Request to verify the timeslice at `ts_pos`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItem {
    /// Descriptor position of the timeslice
    pub ts_pos: u64,
}

/// Outcome of a timeslice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionStatus {
    /// Every check passed
    Verified,
    /// Payload or descriptor content is wrong
    ContentError,
    /// Components disagree or a component stream is broken
    StructuralFault,
    /// The worker died before finishing
    Lost,
    /// Lost too often, given up
    Abandoned,
}

/// Result handle for a timeslice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Completion {
    /// Descriptor position of the timeslice
    pub ts_pos: u64,
    /// What happened to it
    pub status: CompletionStatus,
}

/// One input component's buffers
struct Component<S: PayloadSource> {
    ring: RwLock<DualRingBuffer<S>>,
    published: PublishedIndex,
}

/// The ring buffers of all input components
pub struct TimesliceBuffer<S: PayloadSource = HeapRegion> {
    components: Vec<Component<S>>,
    config: TimesliceConfig,
}

impl<S: PayloadSource> TimesliceBuffer<S> {
    /// Allocate `components` buffer pairs sized by `ring`
    pub fn new(ring: &RingConfig, timeslice: TimesliceConfig, components: usize) -> Result<Self> {
        let rings = (0..components)
            .map(|_| DualRingBuffer::new(ring.data_buffer_size_exp, ring.desc_buffer_size_exp))
            .collect::<Result<Vec<_>>>()?;
        Self::from_rings(rings, timeslice)
    }

    /// Wrap existing buffer pairs
    pub fn from_rings(rings: Vec<DualRingBuffer<S>>, timeslice: TimesliceConfig) -> Result<Self> {
        if timeslice.timeslice_size == 0 {
            return Err(RingError::InvalidConfig("timeslice size must be positive".to_string()));
        }
        if rings.is_empty() {
            return Err(RingError::InvalidConfig("at least one input component is required".to_string()));
        }

        let components = rings
            .into_iter()
            .map(|ring| Component {
                published: ring.published(),
                ring: RwLock::new(ring),
            })
            .collect();

        Ok(Self {
            components,
            config: timeslice,
        })
    }

    /// Number of input components
    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// Timeslice geometry
    pub fn timeslice_config(&self) -> TimesliceConfig {
        self.config
    }

    fn component(&self, component: usize) -> Result<&Component<S>> {
        self.components
            .get(component)
            .ok_or(RingError::UnknownComponent(component))
    }

    /// Shared access to a component's buffers
    pub fn ring(&self, component: usize) -> Result<RwLockReadGuard<'_, DualRingBuffer<S>>> {
        Ok(self.component(component)?.ring.read())
    }

    /// Exclusive access to a component's buffers, for the producer
    pub fn ring_mut(&self, component: usize) -> Result<RwLockWriteGuard<'_, DualRingBuffer<S>>> {
        Ok(self.component(component)?.ring.write())
    }

    /// Exclusive access to a component's buffers if no reader holds them
    ///
    /// Returns `None` instead of waiting while a verifier reads the component.
    pub fn try_ring_mut(&self, component: usize) -> Result<Option<RwLockWriteGuard<'_, DualRingBuffer<S>>>> {
        Ok(self.component(component)?.ring.try_write())
    }

    /// Published descriptor count of a component, without locking
    pub fn published_desc(&self, component: usize) -> Result<u64> {
        Ok(self.component(component)?.published.desc())
    }

    /// True once every component has published the whole window at `ts_pos`
    pub fn is_complete(&self, ts_pos: u64) -> bool {
        let end = ts_pos + self.config.window();
        self.components.iter().all(|c| c.published.desc() >= end)
    }

    /// Describe a component's part of the timeslice at `ts_pos`
    ///
    /// Returns `None` if the first microslice is not available.
    pub fn component_descriptor(&self, component: usize, ts_pos: u64) -> Result<Option<TimesliceComponentDescriptor>> {
        let ring = self.ring(component)?;
        Ok(ring.descriptor(ts_pos).map(|desc| TimesliceComponentDescriptor {
            component,
            ts_num: desc.idx / self.config.timeslice_size,
            ts_pos,
            num_microslices: self.config.window(),
        }))
    }

    /// Release every component up to the first microslice at `ts_pos`
    ///
    /// Either every component moves or none does: all targets are checked
    /// under the write locks before any read index changes. Waits for
    /// readers of any component to finish.
    pub fn advance_read(&self, ts_pos: u64) -> Result<()> {
        let mut rings: Vec<_> = self.components.iter().map(|c| c.ring.write()).collect();

        let mut targets = Vec::with_capacity(rings.len());
        for ring in &rings {
            let data = match ring.descriptor(ts_pos) {
                Some(desc) => desc.offset,
                None if ts_pos == ring.write_index().desc => ring.write_index().data,
                None if ts_pos == ring.read_index().desc => ring.read_index().data,
                None => {
                    return Err(RingError::IndexBeyondWrite {
                        requested: DualIndex::new(ring.read_index().data, ts_pos),
                        write: ring.write_index(),
                    })
                }
            };
            let target = DualIndex::new(data, ts_pos);
            ring.check_read_index(target)?;
            targets.push(target);
        }

        for (index, (ring, target)) in rings.iter_mut().zip(targets).enumerate() {
            ring.advance_read(target)?;
            debug!("component {}: read index advanced to {:?}", index, ring.read_index());
        }
        Ok(())
    }
}
