//! Timeslice verification
//!
//! A `TimesliceVerifier` checks one timeslice across all input components:
//!
//! 1. every component must report the same timeslice number for `ts_pos`
//! 2. within a component, microslice indices must continue the timeslice
//!    numbering and payloads must follow each other without gaps
//! 3. descriptor headers must be standard and constant within a component,
//!    and flagged microslices are reported
//! 4. payloads are checked by the checker matching their subsystem format
//!
//! Steps 1 and 2 yield structural faults, which end the check of the
//! timeslice (1) or the component (2). Everything else yields content
//! errors, which are collected and never stop the run.

use crate::memory::dual::DualRingBuffer;
use crate::memory::region::{HeapRegion, PayloadSource};
use crate::memory::{flags, subsystem, MicrosliceDescriptor};
use crate::timeslice::counter::SequentialCounterVerifier;
use crate::timeslice::ramp::RampChecker;
use crate::timeslice::report::{ContentError, StructuralFault, VerificationReport};
use crate::timeslice::stats::VerificationStats;
use crate::timeslice::{Completion, TimesliceBuffer, WorkItem};
use crate::worker::Processor;
use log::{debug, error, trace, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// Verifies timeslices of a shared buffer; one instance per worker
pub struct TimesliceVerifier<S: PayloadSource = HeapRegion> {
    buffer: Arc<TimesliceBuffer<S>>,
    stats: Arc<VerificationStats>,
    ramp: RampChecker,
    counter: SequentialCounterVerifier,
    /// `(sys_id, sys_ver)` pairs already reported as unchecked
    unknown_formats: HashSet<(u8, u8)>,
    /// Descriptors of the component being checked
    window: Vec<MicrosliceDescriptor>,
}

impl<S: PayloadSource> TimesliceVerifier<S> {
    /// Create a verifier recording into `stats`
    pub fn new(buffer: Arc<TimesliceBuffer<S>>, stats: Arc<VerificationStats>) -> Self {
        Self {
            buffer,
            stats,
            ramp: RampChecker::new(),
            counter: SequentialCounterVerifier::default(),
            unknown_formats: HashSet::new(),
            window: Vec::new(),
        }
    }

    /// Check the timeslice at `ts_pos` and log what was found
    pub fn verify(&mut self, ts_pos: u64) -> VerificationReport {
        let mut report = VerificationReport::new(ts_pos);
        self.check_timeslice(&mut report);

        for fault in &report.structural_faults {
            error!("ts_pos {}: structural fault: {}", ts_pos, fault);
        }
        for content_error in &report.content_errors {
            warn!("ts_pos {}: content error: {}", ts_pos, content_error);
        }

        report
    }

    fn check_timeslice(&mut self, report: &mut VerificationReport) {
        let ts_pos = report.ts_pos;
        let timeslice_size = self.buffer.timeslice_config().timeslice_size;
        let num_components = self.buffer.num_components();

        let mut ts_nums = Vec::with_capacity(num_components);
        for component in 0..num_components {
            match self.buffer.component_descriptor(component, ts_pos) {
                Ok(Some(tcd)) => ts_nums.push((component, tcd.ts_num)),
                _ => report.structural_faults.push(StructuralFault::Missing {
                    component,
                    desc_index: ts_pos,
                }),
            }
        }
        if !report.structural_faults.is_empty() {
            return;
        }

        let ts_num = ts_nums[0].1;
        if ts_nums.iter().any(|&(_, n)| n != ts_num) {
            report
                .structural_faults
                .push(StructuralFault::TsNumMismatch { ts_pos, ts_nums });
            return;
        }
        report.ts_num = Some(ts_num);

        let buffer = Arc::clone(&self.buffer);
        for component in 0..num_components {
            let Ok(ring) = buffer.ring(component) else {
                continue;
            };
            report.components += 1;
            self.check_component(&ring, component, ts_num * timeslice_size, report);
        }
    }

    fn check_component(
        &mut self,
        ring: &DualRingBuffer<S>,
        component: usize,
        first_idx: u64,
        report: &mut VerificationReport,
    ) {
        let ts_pos = report.ts_pos;
        let window = self.buffer.timeslice_config().window();

        self.window.clear();
        for desc_index in ts_pos..ts_pos + window {
            match ring.descriptor(desc_index) {
                Some(desc) => self.window.push(desc),
                None => {
                    report
                        .structural_faults
                        .push(StructuralFault::Missing { component, desc_index });
                    return;
                }
            }
        }

        for (local, desc) in self.window.iter().enumerate() {
            let desc_index = ts_pos + local as u64;
            let expected = first_idx + local as u64;
            if desc.idx != expected {
                report.structural_faults.push(StructuralFault::IndexDiscontinuity {
                    component,
                    desc_index,
                    expected,
                    found: desc.idx,
                });
                return;
            }
            if local > 0 {
                let expected = self.window[local - 1].end_offset();
                if desc.offset != expected {
                    report.structural_faults.push(StructuralFault::OffsetDiscontinuity {
                        component,
                        desc_index,
                        expected,
                        found: desc.offset,
                    });
                    return;
                }
            }
        }

        let first = self.window[0];
        self.counter.reset();
        for i in 0..self.window.len() {
            let desc = self.window[i];
            report.microslices += 1;
            report.content_bytes += u64::from(desc.size);

            if let Err(content_error) = self.check_microslice(ring, component, &first, &desc) {
                report.content_errors.push(content_error);
            }
        }
        trace!(
            "ts_pos {} component {}: {} microslices checked",
            ts_pos,
            component,
            self.window.len()
        );
    }

    fn check_microslice(
        &mut self,
        ring: &DualRingBuffer<S>,
        component: usize,
        first: &MicrosliceDescriptor,
        desc: &MicrosliceDescriptor,
    ) -> Result<(), ContentError> {
        let idx = desc.idx;
        if desc.hdr_id != MicrosliceDescriptor::HDR_ID || desc.hdr_ver != MicrosliceDescriptor::HDR_VER {
            return Err(ContentError::Header {
                component,
                idx,
                hdr_id: desc.hdr_id,
                hdr_ver: desc.hdr_ver,
            });
        }

        let fields = [
            ("eq_id", u64::from(first.eq_id), u64::from(desc.eq_id)),
            ("sys_id", u64::from(first.sys_id), u64::from(desc.sys_id)),
            ("sys_ver", u64::from(first.sys_ver), u64::from(desc.sys_ver)),
        ];
        for (field, expected, found) in fields {
            if expected != found {
                return Err(ContentError::DescriptorChanged {
                    component,
                    idx,
                    field,
                    expected,
                    found,
                });
            }
        }

        if desc.size % 8 != 0 {
            return Err(ContentError::UnalignedSize {
                component,
                idx,
                size: desc.size,
            });
        }
        if desc.has_flag(flags::OVERFLOW_FLIM | flags::OVERFLOW_USER) {
            return Err(ContentError::Truncated {
                component,
                idx,
                flags: desc.flags,
            });
        }
        if desc.has_flag(flags::DATA_ERROR) {
            return Err(ContentError::DataError {
                component,
                idx,
                flags: desc.flags,
            });
        }

        match (desc.sys_id, desc.sys_ver) {
            (subsystem::FLES, subsystem::FORMAT_RAMP) => self.ramp.check(ring, component, desc, first.eq_id),
            (subsystem::FLES, subsystem::FORMAT_SEQUENTIAL_COUNTER) => {
                self.counter.check(component, desc, ring.content_words(desc))
            }
            (subsystem::FLES, subsystem::FORMAT_UNINITIALIZED) => Ok(()),
            (sys_id, sys_ver) => {
                if self.unknown_formats.insert((sys_id, sys_ver)) {
                    debug!(
                        "no content check for sys_id {:#04x} sys_ver {:#04x}, checking descriptors only",
                        sys_id, sys_ver
                    );
                }
                Ok(())
            }
        }
    }
}

impl<S: PayloadSource + 'static> Processor for TimesliceVerifier<S> {
    fn process(&mut self, item: WorkItem) -> Completion {
        let report = self.verify(item.ts_pos);
        self.stats.record(&report);

        let completion = Completion {
            ts_pos: item.ts_pos,
            status: report.status(),
        };
        trace!("verified ts_pos {}: {:?}", item.ts_pos, completion.status);
        completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContentPattern, GeneratorConfig, RingConfig, TimesliceConfig};
    use crate::generator::PatternGenerator;
    use crate::timeslice::CompletionStatus;

    const RING: RingConfig = RingConfig {
        data_buffer_size_exp: 16,
        desc_buffer_size_exp: 6,
    };
    const TIMESLICE: TimesliceConfig = TimesliceConfig {
        timeslice_size: 10,
        overlap_size: 2,
    };

    fn generated(configs: &[GeneratorConfig]) -> Arc<TimesliceBuffer> {
        let buffer = TimesliceBuffer::new(&RING, TIMESLICE, configs.len()).unwrap();
        for (component, config) in configs.iter().enumerate() {
            let mut generator = PatternGenerator::new(*config);
            let mut ring = buffer.ring_mut(component).unwrap();
            generator.proceed(&mut ring).unwrap();
        }
        Arc::new(buffer)
    }

    fn verifier(buffer: &Arc<TimesliceBuffer>) -> TimesliceVerifier {
        TimesliceVerifier::new(Arc::clone(buffer), Arc::new(VerificationStats::new()))
    }

    fn link(link_id: u16, pattern: ContentPattern) -> GeneratorConfig {
        GeneratorConfig {
            link_id,
            pattern,
            seed: u64::from(link_id),
            ..Default::default()
        }
    }

    #[test]
    fn test_generated_timeslices_verify() {
        let buffer = generated(&[
            link(1, ContentPattern::Ramp),
            link(2, ContentPattern::Disabled),
            link(3, ContentPattern::SequentialCounter { flim_id: 5, channels: 4 }),
        ]);
        let mut verifier = verifier(&buffer);

        for ts_pos in (0..50).step_by(10) {
            assert!(buffer.is_complete(ts_pos));
            let report = verifier.verify(ts_pos);
            assert!(report.is_ok(), "{:?}", report);
            assert_eq!(report.ts_num, Some(ts_pos / 10));
            assert_eq!(report.components, 3);
            assert_eq!(report.microslices, 36);
        }
    }

    #[test]
    fn test_corrupted_word_is_content_error() {
        let buffer = generated(&[link(1, ContentPattern::Ramp)]);
        let desc = (0..64)
            .filter_map(|i| buffer.ring(0).unwrap().descriptor(i))
            .find(|d| d.idx >= 20 && d.size > 0)
            .unwrap();
        buffer.ring_mut(0).unwrap().data_region_mut().write_word(desc.offset + 8, 0xDEAD);

        let mut verifier = verifier(&buffer);
        let report = verifier.verify(20);
        assert_eq!(report.status(), CompletionStatus::ContentError);
        assert_eq!(
            report.content_errors,
            vec![ContentError::RampWord {
                component: 0,
                idx: desc.idx,
                byte_offset: 8,
                expected: 0x0001_0000_0000_0008,
                found: 0xDEAD,
            }]
        );
    }

    #[test]
    fn test_missing_descriptor_is_structural() {
        let buffer = generated(&[link(1, ContentPattern::Ramp)]);
        let report = verifier(&buffer).verify(60);
        assert_eq!(report.status(), CompletionStatus::StructuralFault);
        assert_eq!(
            report.structural_faults,
            vec![StructuralFault::Missing {
                component: 0,
                desc_index: 64,
            }]
        );
    }

    #[test]
    fn test_unchecked_format_passes_descriptor_checks() {
        let buffer = TimesliceBuffer::new(&RING, TIMESLICE, 1).unwrap();
        {
            let mut ring = buffer.ring_mut(0).unwrap();
            for _ in 0..12 {
                let reservation = ring.reserve(8).unwrap();
                let desc = MicrosliceDescriptor {
                    hdr_id: MicrosliceDescriptor::HDR_ID,
                    hdr_ver: MicrosliceDescriptor::HDR_VER,
                    sys_id: 0x40,
                    sys_ver: 0x02,
                    idx: reservation.desc_index(),
                    size: 8,
                    offset: reservation.offset(),
                    ..Default::default()
                };
                reservation.publish(desc).unwrap();
            }
        }
        let buffer = Arc::new(buffer);
        let mut verifier = verifier(&buffer);
        assert!(verifier.verify(0).is_ok());
        assert!(verifier.unknown_formats.contains(&(0x40, 0x02)));
    }

    /// Twelve 8-byte microslices of one timeslice; `edit` may change any of
    /// them before it is reserved and published
    fn hand_built(edit: impl Fn(u64, &mut MicrosliceDescriptor)) -> Arc<TimesliceBuffer> {
        let buffer = TimesliceBuffer::new(&RING, TIMESLICE, 1).unwrap();
        {
            let mut ring = buffer.ring_mut(0).unwrap();
            for i in 0..12 {
                let mut desc = MicrosliceDescriptor {
                    hdr_id: MicrosliceDescriptor::HDR_ID,
                    hdr_ver: MicrosliceDescriptor::HDR_VER,
                    eq_id: 0xE001,
                    sys_id: subsystem::FLES,
                    sys_ver: subsystem::FORMAT_UNINITIALIZED,
                    idx: i,
                    size: 8,
                    ..Default::default()
                };
                edit(i, &mut desc);
                let reservation = ring.reserve(desc.size).unwrap();
                desc.offset = reservation.offset();
                reservation.publish(desc).unwrap();
            }
        }
        Arc::new(buffer)
    }

    fn content_errors_with(edit: impl Fn(&mut MicrosliceDescriptor)) -> Vec<ContentError> {
        let buffer = hand_built(|i, desc| {
            if i == 5 {
                edit(desc);
            }
        });
        let report = verifier(&buffer).verify(0);
        assert!(report.structural_faults.is_empty(), "{:?}", report);
        assert_eq!(report.microslices, 12);
        report.content_errors
    }

    #[test]
    fn test_overflow_flags_are_truncation() {
        for flag in [flags::OVERFLOW_FLIM, flags::OVERFLOW_USER] {
            assert_eq!(
                content_errors_with(|desc| desc.flags = flag),
                vec![ContentError::Truncated {
                    component: 0,
                    idx: 5,
                    flags: flag,
                }]
            );
        }
    }

    #[test]
    fn test_data_error_flag() {
        assert_eq!(
            content_errors_with(|desc| desc.flags = flags::DATA_ERROR),
            vec![ContentError::DataError {
                component: 0,
                idx: 5,
                flags: flags::DATA_ERROR,
            }]
        );
    }

    #[test]
    fn test_nonstandard_header() {
        assert_eq!(
            content_errors_with(|desc| desc.hdr_id = 0xDE),
            vec![ContentError::Header {
                component: 0,
                idx: 5,
                hdr_id: 0xDE,
                hdr_ver: MicrosliceDescriptor::HDR_VER,
            }]
        );
    }

    #[test]
    fn test_descriptor_fields_must_stay_constant() {
        assert_eq!(
            content_errors_with(|desc| desc.eq_id = 0xE00F),
            vec![ContentError::DescriptorChanged {
                component: 0,
                idx: 5,
                field: "eq_id",
                expected: 0xE001,
                found: 0xE00F,
            }]
        );
        assert_eq!(
            content_errors_with(|desc| desc.sys_id = 0x40),
            vec![ContentError::DescriptorChanged {
                component: 0,
                idx: 5,
                field: "sys_id",
                expected: u64::from(subsystem::FLES),
                found: 0x40,
            }]
        );
        assert_eq!(
            content_errors_with(|desc| desc.sys_ver = subsystem::FORMAT_RAMP),
            vec![ContentError::DescriptorChanged {
                component: 0,
                idx: 5,
                field: "sys_ver",
                expected: u64::from(subsystem::FORMAT_UNINITIALIZED),
                found: u64::from(subsystem::FORMAT_RAMP),
            }]
        );
    }

    #[test]
    fn test_unaligned_size() {
        let buffer = hand_built(|i, desc| {
            if i == 5 {
                desc.size = 12;
            }
        });
        let report = verifier(&buffer).verify(0);
        assert_eq!(report.status(), CompletionStatus::ContentError);
        assert_eq!(
            report.content_errors,
            vec![ContentError::UnalignedSize {
                component: 0,
                idx: 5,
                size: 12,
            }]
        );
        assert_eq!(report.content_bytes, 11 * 8 + 12);
    }

    #[test]
    fn test_payload_gap_is_structural() {
        let buffer = hand_built(|_, _| {});
        {
            let mut ring = buffer.ring_mut(0).unwrap();
            let mut desc = ring.descriptor(5).unwrap();
            assert_eq!(desc.offset, 40);
            desc.offset = 48;
            ring.desc_region_mut().write(5 * MicrosliceDescriptor::SIZE as u64, &desc.to_bytes());
        }

        let report = verifier(&buffer).verify(0);
        assert_eq!(report.status(), CompletionStatus::StructuralFault);
        assert_eq!(
            report.structural_faults,
            vec![StructuralFault::OffsetDiscontinuity {
                component: 0,
                desc_index: 5,
                expected: 40,
                found: 48,
            }]
        );
        assert_eq!(report.microslices, 0);
        assert!(report.content_errors.is_empty());
    }

    #[test]
    fn test_processor_records_stats() {
        let buffer = generated(&[link(1, ContentPattern::Ramp)]);
        let stats = Arc::new(VerificationStats::new());
        let mut verifier = TimesliceVerifier::new(Arc::clone(&buffer), Arc::clone(&stats));

        let completion = verifier.process(WorkItem { ts_pos: 10 });
        assert_eq!(completion.status, CompletionStatus::Verified);
        assert_eq!(stats.snapshot().timeslices, 1);
        assert_eq!(stats.snapshot().microslices, 12);
    }
}
