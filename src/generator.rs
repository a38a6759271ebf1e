//! Synthetic microslice source
//!
//! The pattern generator stands in for a readout link: it writes a
//! deterministic, self-describing microslice stream into a dual ring buffer so
//! the whole path from producer to verifier can be checked for loss,
//! reordering and corruption.
//!
//! - Payload sizes are fixed or drawn from a seeded distribution; the stream
//!   is the same for a given seed regardless of how often `proceed` is called
//! - Content is a ramp, a multi-channel sequential counter, or nothing at all
//!   (throughput testing, checksum forced to zero)
//! - Production never blocks: lack of space or the rate limit simply ends the
//!   current batch and control returns to the caller's poll loop

use crate::config::{ContentPattern, ContentSize, GeneratorConfig, RatePolicy, MAX_PAYLOAD_WORDS};
use crate::error::Result;
use crate::memory::dual::{DualRingBuffer, Reservation};
use crate::memory::region::PayloadSource;
use crate::memory::{subsystem, MicrosliceDescriptor};
use crate::pattern::{fold_crc, ramp_word, CounterWord};
use log::trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

/// Why a call to [`PatternGenerator::proceed`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Less than a quarter of a buffer was free, no batch was started
    LowWater,
    /// The rate limit says the next microslice is not due yet
    RateLimited,
    /// The next microslice does not fit
    Full,
}

/// Result of one production batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProceedOutcome {
    /// Microslices published in this batch
    pub produced: u64,
    /// What ended the batch
    pub stopped: StopReason,
}

/// Deterministic microslice generator for one input link
pub struct PatternGenerator {
    config: GeneratorConfig,
    rng: StdRng,
    begin: Instant,
    /// Size drawn for a microslice that did not fit yet
    pending_size: Option<u32>,
    /// Next word of every counter channel
    counters: Vec<CounterWord>,
    next_channel: usize,
}

impl PatternGenerator {
    /// Create a generator; the rate limit clock starts now
    pub fn new(config: GeneratorConfig) -> Self {
        let counters = match config.pattern {
            ContentPattern::SequentialCounter { flim_id, channels } => {
                (0..channels).map(|channel| CounterWord::new(flim_id, channel)).collect()
            }
            _ => Vec::new(),
        };

        Self {
            config,
            rng: StdRng::seed_from_u64(config.seed),
            begin: Instant::now(),
            pending_size: None,
            counters,
            next_channel: 0,
        }
    }

    /// Link this generator produces for
    pub fn link_id(&self) -> u16 {
        self.config.link_id
    }

    /// Subsystem format version written into every descriptor
    pub fn sys_ver(&self) -> u8 {
        match self.config.pattern {
            ContentPattern::Ramp => subsystem::FORMAT_RAMP,
            ContentPattern::Disabled => subsystem::FORMAT_UNINITIALIZED,
            ContentPattern::SequentialCounter { .. } => subsystem::FORMAT_SEQUENTIAL_COUNTER,
        }
    }

    /// Produce microslices into `ring` until space or the rate limit runs out
    ///
    /// A batch is only started when at least a quarter of both buffers is
    /// free; inside a batch every microslice is checked for an exact fit.
    pub fn proceed<S: PayloadSource>(&mut self, ring: &mut DualRingBuffer<S>) -> Result<ProceedOutcome> {
        if !ring.has_low_water_space() {
            return Ok(ProceedOutcome {
                produced: 0,
                stopped: StopReason::LowWater,
            });
        }

        let mut produced = 0;
        let stopped = loop {
            if self.rate_limited(ring.write_index().desc) {
                break StopReason::RateLimited;
            }

            let size = self.next_size();
            let Some(reservation) = ring.reserve(size) else {
                self.pending_size = Some(size);
                break StopReason::Full;
            };

            self.write_microslice(reservation)?;
            produced += 1;
        };

        trace!(
            "link {:#06x}: produced {} microslices, stopped on {:?}, write index {:?}",
            self.config.link_id,
            produced,
            stopped,
            ring.write_index()
        );

        Ok(ProceedOutcome { produced, stopped })
    }

    fn rate_limited(&self, written: u64) -> bool {
        match self.config.rate {
            RatePolicy::Unlimited => false,
            RatePolicy::Limited { delay, initial } => {
                let due = delay.as_nanos() * u128::from(written) + initial.as_nanos();
                self.begin.elapsed().as_nanos() < due
            }
        }
    }

    fn next_size(&mut self) -> u32 {
        if let Some(size) = self.pending_size.take() {
            return size;
        }

        match self.config.content {
            ContentSize::Fixed(bytes) => bytes & !7,
            ContentSize::Random {
                empty_one_in,
                min_words,
                max_words,
            } => {
                if empty_one_in > 0 && self.rng.gen_range(0..empty_one_in) == 0 {
                    0
                } else {
                    self.rng.gen_range(min_words..=max_words).min(MAX_PAYLOAD_WORDS) * 8
                }
            }
        }
    }

    fn write_microslice<S: PayloadSource>(&mut self, mut reservation: Reservation<'_, S>) -> Result<u64> {
        let link_id = self.config.link_id;
        let sys_ver = self.sys_ver();
        let size = reservation.size();

        let mut crc = 0u32;
        match self.config.pattern {
            ContentPattern::Ramp => {
                for byte_offset in (0..u64::from(size)).step_by(8) {
                    let word = ramp_word(link_id, byte_offset);
                    reservation.write_word(word);
                    crc = fold_crc(crc, word);
                }
            }
            ContentPattern::Disabled => {}
            ContentPattern::SequentialCounter { .. } => {
                for _ in 0..size / 8 {
                    let channel = self.next_channel;
                    let word = self.counters[channel];
                    reservation.write_word(word.encode());
                    self.counters[channel] = word.next();
                    self.next_channel = (channel + 1) % self.counters.len();
                }
            }
        }

        let descriptor = MicrosliceDescriptor {
            hdr_id: MicrosliceDescriptor::HDR_ID,
            hdr_ver: MicrosliceDescriptor::HDR_VER,
            eq_id: link_id,
            flags: 0,
            sys_id: subsystem::FLES,
            sys_ver,
            idx: reservation.desc_index(),
            crc,
            size,
            offset: reservation.offset(),
        };
        reservation.publish(descriptor)
    }
}
