//! Payload word formats shared by the pattern generator and the checkers
//!
//! Two self-describing formats are understood:
//!
//! - Ramp words: `(link_id << 48) | byte_offset_within_microslice`, folded
//!   into a 32-bit checksum by XOR-ing the high and low halves of every word
//! - Sequential-counter words: a fixed marker byte, a stream ("flim") id, a
//!   channel id and a 40-bit per-channel counter

/// Ramp word for the 64-bit word at `byte_offset` within a microslice
pub fn ramp_word(link_id: u16, byte_offset: u64) -> u64 {
    (u64::from(link_id) << 48) | byte_offset
}

/// Fold one payload word into a running ramp checksum
pub fn fold_crc(crc: u32, word: u64) -> u32 {
    crc ^ (word & 0xffff_ffff) as u32 ^ (word >> 32) as u32
}

/// Fixed marker in the top byte of every sequential-counter word
pub const COUNTER_MARKER: u8 = 0xBC;

/// Mask of the 40-bit counter field
pub const COUNTER_MASK: u64 = 0xff_ffff_ffff;

/// Largest channel count a counter stream may use
pub const MAX_COUNTER_CHANNELS: u8 = 16;

/// Decoded sequential-counter word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterWord {
    /// Marker byte, bits 63:56
    pub marker: u8,
    /// Stream id, bits 55:48
    pub flim_id: u8,
    /// Channel id, bits 47:40
    pub channel: u8,
    /// Counter value, bits 39:0
    pub counter: u64,
}

impl CounterWord {
    /// First word of a channel, counter at zero
    pub fn new(flim_id: u8, channel: u8) -> Self {
        Self {
            marker: COUNTER_MARKER,
            flim_id,
            channel,
            counter: 0,
        }
    }

    /// Split a raw word into its fields
    pub fn decode(word: u64) -> Self {
        Self {
            marker: (word >> 56) as u8,
            flim_id: (word >> 48) as u8,
            channel: (word >> 40) as u8,
            counter: word & COUNTER_MASK,
        }
    }

    /// Pack the fields into a raw word
    pub fn encode(&self) -> u64 {
        (u64::from(self.marker) << 56)
            | (u64::from(self.flim_id) << 48)
            | (u64::from(self.channel) << 40)
            | (self.counter & COUNTER_MASK)
    }

    /// The word the same channel emits next
    ///
    /// The counter wraps from `0xFFFFFFFFFF` to zero; all other fields are kept.
    pub fn next(&self) -> Self {
        Self {
            counter: (self.counter + 1) & COUNTER_MASK,
            ..*self
        }
    }
}
