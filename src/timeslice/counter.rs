//! Sequential-counter checker
//!
//! The payload of a component is one continuous stream of counter words
//! spread over up to `max_channels` channels. The first word establishes the
//! stream id and the first word of each channel establishes its counter;
//! every later word must be the successor of the previous word on the same
//! channel, the 40-bit counter wrapping to zero.
//!
//! State carries over from one microslice to the next, so `check` must see
//! the microslices of a stream in order and a checker instance must not be
//! shared between streams. Call `reset` before each new stream.

use crate::memory::MicrosliceDescriptor;
use crate::pattern::{CounterWord, COUNTER_MARKER, MAX_COUNTER_CHANNELS};
use crate::timeslice::report::ContentError;

/// Stateful checker for one counter stream
#[derive(Debug, Clone)]
pub struct SequentialCounterVerifier {
    max_channels: u8,
    flim_id: Option<u8>,
    /// Next word expected on each channel
    expected: Vec<Option<CounterWord>>,
}

impl Default for SequentialCounterVerifier {
    fn default() -> Self {
        Self::new(MAX_COUNTER_CHANNELS)
    }
}

impl SequentialCounterVerifier {
    /// Create a checker accepting channels below `max_channels`
    pub fn new(max_channels: u8) -> Self {
        Self {
            max_channels,
            flim_id: None,
            expected: vec![None; usize::from(max_channels)],
        }
    }

    /// Forget the stream id and every channel's position
    pub fn reset(&mut self) {
        self.flim_id = None;
        self.expected.iter_mut().for_each(|e| *e = None);
    }

    /// Stream id established by the first word, if any
    pub fn flim_id(&self) -> Option<u8> {
        self.flim_id
    }

    /// Check the next microslice of the stream, returning the first finding
    ///
    /// Every word of the microslice is consumed even after a finding, so the
    /// channels stay in step for the next microslice. After a sequence
    /// mismatch the channel continues from the word found.
    pub fn check(
        &mut self,
        component: usize,
        desc: &MicrosliceDescriptor,
        words: impl IntoIterator<Item = u64>,
    ) -> Result<(), ContentError> {
        let mut first_error = None;
        for (i, raw) in words.into_iter().enumerate() {
            if let Err(e) = self.check_word(component, desc.idx, i as u64 * 8, raw) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn check_word(&mut self, component: usize, idx: u64, byte_offset: u64, raw: u64) -> Result<(), ContentError> {
        let word = CounterWord::decode(raw);

        if word.marker != COUNTER_MARKER {
            return Err(ContentError::CounterMarker {
                component,
                idx,
                byte_offset,
                found: raw,
            });
        }

        match self.flim_id {
            None => self.flim_id = Some(word.flim_id),
            Some(flim_id) if flim_id != word.flim_id => {
                return Err(ContentError::FlimId {
                    component,
                    idx,
                    byte_offset,
                    expected: flim_id,
                    found: word.flim_id,
                });
            }
            Some(_) => {}
        }

        if word.channel >= self.max_channels {
            return Err(ContentError::ChannelRange {
                component,
                idx,
                byte_offset,
                channel: word.channel,
                max_channels: self.max_channels,
            });
        }

        let slot = &mut self.expected[usize::from(word.channel)];
        let mismatch = slot.filter(|expected| *expected != word);
        *slot = Some(word.next());
        match mismatch {
            Some(expected) => Err(ContentError::CounterSequence {
                component,
                idx,
                byte_offset,
                expected: expected.encode(),
                found: raw,
            }),
            None => Ok(()),
        }
    }
}
