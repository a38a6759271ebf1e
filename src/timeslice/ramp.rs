//! Ramp pattern checker
//!
//! Every microslice is checked on its own: word `i` must hold
//! `(link_id << 48) | 8 * i` and the payload checksum must match the
//! descriptor. The checksum is the XOR fold of the words, or a CRC-32 over
//! the payload bytes when the descriptor carries `CRC_VALID`.

use crate::memory::dual::DualRingBuffer;
use crate::memory::region::PayloadSource;
use crate::memory::{flags, MicrosliceDescriptor};
use crate::pattern::{fold_crc, ramp_word};
use crate::timeslice::report::ContentError;

/// Checks ramp microslices of one component
#[derive(Debug, Default)]
pub struct RampChecker {
    /// Payload copy for CRC-32 computation
    scratch: Vec<u8>,
}

impl RampChecker {
    /// Create a checker
    pub fn new() -> Self {
        Self::default()
    }

    /// Check one microslice, returning the first mismatch
    ///
    /// # Arguments
    ///
    /// * `ring` - Buffers holding the microslice
    /// * `component` - Component index, for reporting
    /// * `desc` - Descriptor of the microslice
    /// * `link_id` - Link id expected in the ramp words
    pub fn check<S: PayloadSource>(
        &mut self,
        ring: &DualRingBuffer<S>,
        component: usize,
        desc: &MicrosliceDescriptor,
        link_id: u16,
    ) -> Result<(), ContentError> {
        let mut fold = 0u32;
        for (i, found) in ring.content_words(desc).enumerate() {
            let byte_offset = i as u64 * 8;
            let expected = ramp_word(link_id, byte_offset);
            if found != expected {
                return Err(ContentError::RampWord {
                    component,
                    idx: desc.idx,
                    byte_offset,
                    expected,
                    found,
                });
            }
            fold = fold_crc(fold, found);
        }

        if desc.has_flag(flags::CRC_VALID) {
            ring.copy_content(desc, &mut self.scratch);
            let found = crc32fast::hash(&self.scratch);
            if found != desc.crc {
                return Err(ContentError::Crc32 {
                    component,
                    idx: desc.idx,
                    expected: desc.crc,
                    found,
                });
            }
        } else if fold != desc.crc {
            return Err(ContentError::Checksum {
                component,
                idx: desc.idx,
                expected: desc.crc,
                found: fold,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::DualIndex;

    fn publish_ramp(ring: &mut DualRingBuffer, link_id: u16, words: u64, flag_bits: u16, crc: Option<u32>) -> MicrosliceDescriptor {
        let size = (words * 8) as u32;
        let mut reservation = ring.reserve(size).unwrap();
        let mut fold = 0;
        let mut bytes = Vec::new();
        for i in 0..words {
            let word = ramp_word(link_id, i * 8);
            reservation.write_word(word);
            fold = fold_crc(fold, word);
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let crc = crc.unwrap_or(if flag_bits & flags::CRC_VALID != 0 {
            crc32fast::hash(&bytes)
        } else {
            fold
        });
        let desc = MicrosliceDescriptor {
            eq_id: link_id,
            flags: flag_bits,
            idx: reservation.desc_index(),
            crc,
            size,
            offset: reservation.offset(),
            ..Default::default()
        };
        reservation.publish(desc).unwrap();
        desc
    }

    #[test]
    fn test_accepts_ramp_across_wrap() {
        let mut ring: DualRingBuffer = DualRingBuffer::new(6, 3).unwrap();
        let mut checker = RampChecker::new();

        let first = publish_ramp(&mut ring, 0xE001, 6, 0, None);
        checker.check(&ring, 0, &first, 0xE001).unwrap();
        ring.advance_read(DualIndex::new(48, 1)).unwrap();

        let wrapped = publish_ramp(&mut ring, 0xE001, 4, 0, None);
        assert_eq!(wrapped.offset, 48);
        checker.check(&ring, 0, &wrapped, 0xE001).unwrap();
    }

    #[test]
    fn test_reports_wrong_word() {
        let mut ring: DualRingBuffer = DualRingBuffer::new(8, 3).unwrap();
        let desc = publish_ramp(&mut ring, 0xE001, 4, 0, None);

        let mut checker = RampChecker::new();
        let error = checker.check(&ring, 2, &desc, 0xE002).unwrap_err();
        assert_eq!(
            error,
            ContentError::RampWord {
                component: 2,
                idx: 0,
                byte_offset: 0,
                expected: 0xE002_0000_0000_0000,
                found: 0xE001_0000_0000_0000,
            }
        );
    }

    #[test]
    fn test_reports_checksum_mismatch() {
        let mut ring: DualRingBuffer = DualRingBuffer::new(8, 3).unwrap();
        let desc = publish_ramp(&mut ring, 0xE001, 4, 0, Some(0x1234));

        let error = RampChecker::new().check(&ring, 0, &desc, 0xE001).unwrap_err();
        assert!(matches!(error, ContentError::Checksum { expected: 0x1234, .. }));
    }

    #[test]
    fn test_crc32_when_flagged() {
        let mut ring: DualRingBuffer = DualRingBuffer::new(8, 3).unwrap();
        let good = publish_ramp(&mut ring, 0xE001, 4, flags::CRC_VALID, None);
        let bad = publish_ramp(&mut ring, 0xE001, 4, flags::CRC_VALID, Some(good.crc ^ 1));

        let mut checker = RampChecker::new();
        checker.check(&ring, 0, &good, 0xE001).unwrap();
        assert!(matches!(
            checker.check(&ring, 0, &bad, 0xE001),
            Err(ContentError::Crc32 { .. })
        ));
    }

    #[test]
    fn test_empty_microslice() {
        let mut ring: DualRingBuffer = DualRingBuffer::new(8, 3).unwrap();
        let desc = publish_ramp(&mut ring, 0xE001, 0, 0, None);
        RampChecker::new().check(&ring, 0, &desc, 0xE001).unwrap();
    }
}
