//! Configuration for the ring buffers, the generator, the worker pool and the
//! pipeline driver
//!
//! Every section is a plain struct with a `Default` matching the reference
//! deployment (2^20 byte payload buffers, 2^10 descriptor entries,
//! timeslices of 100 microslices with an overlap of 2, one ramp link 0xE001).
//! `PipelineConfig::validate` checks the whole tree before anything is
//! allocated.

use crate::error::{Result, RingError};
use crate::pattern::MAX_COUNTER_CHANNELS;
use std::collections::HashSet;
use std::time::Duration;

/// Sizing of one component's buffer pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    /// Payload buffer holds `2^data_buffer_size_exp` bytes
    pub data_buffer_size_exp: u32,
    /// Descriptor buffer holds `2^desc_buffer_size_exp` entries
    pub desc_buffer_size_exp: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            data_buffer_size_exp: 20,
            desc_buffer_size_exp: 10,
        }
    }
}

impl RingConfig {
    /// Payload buffer size in bytes
    pub fn data_size(&self) -> u64 {
        1u64 << self.data_buffer_size_exp
    }

    /// Descriptor buffer size in entries
    pub fn desc_size(&self) -> u64 {
        1u64 << self.desc_buffer_size_exp
    }

    /// Check the exponents are in the supported range
    pub fn validate(&self) -> Result<()> {
        if !(3..=40).contains(&self.data_buffer_size_exp) {
            return Err(RingError::InvalidConfig(format!(
                "data buffer size exponent {} outside 3..=40",
                self.data_buffer_size_exp
            )));
        }
        if !(1..=32).contains(&self.desc_buffer_size_exp) {
            return Err(RingError::InvalidConfig(format!(
                "descriptor buffer size exponent {} outside 1..=32",
                self.desc_buffer_size_exp
            )));
        }
        Ok(())
    }
}

/// Timeslice geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimesliceConfig {
    /// Microslices per timeslice
    pub timeslice_size: u64,
    /// Microslices shared with the following timeslice
    pub overlap_size: u64,
}

impl Default for TimesliceConfig {
    fn default() -> Self {
        Self {
            timeslice_size: 100,
            overlap_size: 2,
        }
    }
}

impl TimesliceConfig {
    /// Microslices a verifier reads per timeslice component
    pub fn window(&self) -> u64 {
        self.timeslice_size + self.overlap_size
    }
}

/// Largest payload word count whose byte size fits a descriptor's `size`
pub const MAX_PAYLOAD_WORDS: u32 = u32::MAX / 8;

/// How payload sizes are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSize {
    /// Every microslice carries this many bytes, rounded down to a multiple of 8
    Fixed(u32),
    /// Empty with probability `1 / empty_one_in`, otherwise a uniform word count
    Random {
        /// One microslice in this many is empty; zero never produces empty ones
        empty_one_in: u32,
        /// Smallest non-empty payload in 64-bit words
        min_words: u32,
        /// Largest payload in 64-bit words
        max_words: u32,
    },
}

impl Default for ContentSize {
    fn default() -> Self {
        ContentSize::Random {
            empty_one_in: 5,
            min_words: 20,
            max_words: 40,
        }
    }
}

impl ContentSize {
    /// Largest payload this policy can produce, in bytes
    pub fn max_bytes(&self) -> u64 {
        match *self {
            ContentSize::Fixed(bytes) => u64::from(bytes & !7),
            ContentSize::Random { max_words, .. } => u64::from(max_words) * 8,
        }
    }
}

/// What the generator writes into the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentPattern {
    /// Ramp words with an XOR-folded checksum
    #[default]
    Ramp,
    /// Space is reserved but not written; the checksum is zero
    Disabled,
    /// Multi-channel sequential counters
    SequentialCounter {
        /// Stream id carried by every word
        flim_id: u8,
        /// Channels served round-robin
        channels: u8,
    },
}

/// Production throttling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RatePolicy {
    /// Produce as fast as space allows
    #[default]
    Unlimited,
    /// Produce microslice `n` no earlier than `initial + n * delay` after start
    Limited {
        /// Interval between microslices
        delay: Duration,
        /// Offset before the first microslice
        initial: Duration,
    },
}

/// One synthetic input link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Equipment id, also the high 16 bits of every ramp word
    pub link_id: u16,
    /// Payload size policy
    pub content: ContentSize,
    /// Payload content
    pub pattern: ContentPattern,
    /// Throttling
    pub rate: RatePolicy,
    /// Seed for the size distribution
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            link_id: 0xE001,
            content: ContentSize::default(),
            pattern: ContentPattern::default(),
            rate: RatePolicy::default(),
            seed: 0,
        }
    }
}

impl GeneratorConfig {
    /// Check the size and pattern settings
    pub fn validate(&self) -> Result<()> {
        if let ContentSize::Random { min_words, max_words, .. } = self.content {
            if max_words > MAX_PAYLOAD_WORDS {
                return Err(RingError::InvalidConfig(format!(
                    "link {:#06x}: max_words {max_words} exceeds {MAX_PAYLOAD_WORDS}",
                    self.link_id
                )));
            }
            if min_words > max_words {
                return Err(RingError::InvalidConfig(format!(
                    "link {:#06x}: min_words {min_words} exceeds max_words {max_words}",
                    self.link_id
                )));
            }
        }
        if let ContentPattern::SequentialCounter { channels, .. } = self.pattern {
            if channels == 0 || channels > MAX_COUNTER_CHANNELS {
                return Err(RingError::InvalidConfig(format!(
                    "link {:#06x}: {channels} counter channels outside 1..={MAX_COUNTER_CHANNELS}",
                    self.link_id
                )));
            }
        }
        Ok(())
    }
}

/// Verification worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Capacity of the work and completion queues
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1000,
        }
    }
}

impl PoolConfig {
    /// Check the pool is non-empty
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RingError::InvalidConfig("worker count must be positive".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(RingError::InvalidConfig("queue capacity must be positive".to_string()));
        }
        Ok(())
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Buffer sizing, shared by every component
    pub ring: RingConfig,
    /// Timeslice geometry
    pub timeslice: TimesliceConfig,
    /// One generator per input component
    pub components: Vec<GeneratorConfig>,
    /// Worker pool
    pub pool: PoolConfig,
    /// Structural faults tolerated before admission halts
    pub structural_fault_limit: u64,
    /// Re-submissions of a timeslice lost to a worker crash
    pub max_resubmits: u32,
    /// Log a statistics line every this many timeslices; zero disables it
    pub stats_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring: RingConfig::default(),
            timeslice: TimesliceConfig::default(),
            components: vec![GeneratorConfig::default()],
            pool: PoolConfig::default(),
            structural_fault_limit: 2,
            max_resubmits: 1,
            stats_interval: 100,
        }
    }
}

impl PipelineConfig {
    /// Check every section and their interplay
    pub fn validate(&self) -> Result<()> {
        self.ring.validate()?;
        self.pool.validate()?;

        if self.timeslice.timeslice_size == 0 {
            return Err(RingError::InvalidConfig("timeslice size must be positive".to_string()));
        }
        if self.components.is_empty() {
            return Err(RingError::InvalidConfig("at least one input component is required".to_string()));
        }

        let mut link_ids = HashSet::new();
        for component in &self.components {
            component.validate()?;
            if !link_ids.insert(component.link_id) {
                return Err(RingError::InvalidConfig(format!(
                    "duplicate link id {:#06x}",
                    component.link_id
                )));
            }
        }

        // A window must fit in half of each buffer, otherwise the low-water
        // check can stop the producer before the window is complete
        let window = self.timeslice.window();
        if window > self.ring.desc_size() / 2 {
            return Err(RingError::InvalidConfig(format!(
                "timeslice window of {window} microslices exceeds half of {} descriptor entries",
                self.ring.desc_size()
            )));
        }
        for component in &self.components {
            let window_bytes = window.saturating_mul(component.content.max_bytes());
            if window_bytes > self.ring.data_size() / 2 {
                return Err(RingError::InvalidConfig(format!(
                    "link {:#06x}: timeslice window of up to {window_bytes} bytes exceeds half of {} byte data buffer",
                    component.link_id,
                    self.ring.data_size()
                )));
            }
        }

        Ok(())
    }
}
