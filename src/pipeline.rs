//! Cooperative pipeline driver
//!
//! The pipeline ties the pieces together on one coordinating thread:
//!
//! 1. every component's generator fills its ring buffer as far as flow
//!    control and the rate limit allow
//! 2. complete timeslices are admitted to the worker pool without blocking
//! 3. completions are drained, handed to the sink and acknowledged
//! 4. once a contiguous run of timeslices is retired, every component's
//!    read index moves up and the space is reused
//!
//! Only this thread advances read indices; workers only read the buffers.

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::generator::PatternGenerator;
use crate::memory::region::{HeapRegion, PayloadSource};
use crate::timeslice::admission::Admission;
use crate::timeslice::stats::{StatsSnapshot, VerificationStats};
use crate::timeslice::verifier::TimesliceVerifier;
use crate::timeslice::{Completion, CompletionStatus, TimesliceBuffer, WorkItem};
use crate::worker::pool::WorkerPool;
use log::info;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Receives every retired timeslice
pub trait CompletionSink {
    /// Called once per retired timeslice, as it is retired
    fn on_completion(&mut self, completion: &Completion);
}

impl<F> CompletionSink for F
where
    F: FnMut(&Completion),
{
    fn on_completion(&mut self, completion: &Completion) {
        self(completion)
    }
}

/// Sink that keeps every completion
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    completions: Vec<Completion>,
}

impl CollectingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Completions in retirement order
    pub fn completions(&self) -> &[Completion] {
        &self.completions
    }

    /// Number of completions with `status`
    pub fn count(&self, status: CompletionStatus) -> usize {
        self.completions.iter().filter(|c| c.status == status).count()
    }
}

impl CompletionSink for CollectingSink {
    fn on_completion(&mut self, completion: &Completion) {
        self.completions.push(*completion);
    }
}

/// What one [`Pipeline::poll`] step did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollOutcome {
    /// Microslices generated
    pub produced: u64,
    /// Timeslices submitted to the pool
    pub submitted: u64,
    /// Timeslices retired
    pub retired: u64,
}

impl PollOutcome {
    /// True if nothing happened
    pub fn is_idle(&self) -> bool {
        self.produced == 0 && self.submitted == 0 && self.retired == 0
    }
}

/// Generators, buffers, admission and workers of one run
pub struct Pipeline<S: PayloadSource + 'static = HeapRegion, K: CompletionSink = CollectingSink> {
    config: PipelineConfig,
    buffer: Arc<TimesliceBuffer<S>>,
    generators: Vec<PatternGenerator>,
    admission: Admission,
    pool: Option<WorkerPool>,
    stats: Arc<VerificationStats>,
    sink: K,
    retired: u64,
}

impl<S: PayloadSource + 'static, K: CompletionSink> Pipeline<S, K> {
    /// Validate `config`, allocate the buffers and start the workers
    pub fn new(config: PipelineConfig, sink: K) -> Result<Self> {
        config.validate()?;

        let buffer = Arc::new(TimesliceBuffer::new(
            &config.ring,
            config.timeslice,
            config.components.len(),
        )?);
        let stats = Arc::new(VerificationStats::new());
        let pool = {
            let buffer = Arc::clone(&buffer);
            let stats = Arc::clone(&stats);
            WorkerPool::start(&config.pool, move |_| {
                TimesliceVerifier::new(Arc::clone(&buffer), Arc::clone(&stats))
            })?
        };
        let generators = config.components.iter().copied().map(PatternGenerator::new).collect();
        let admission = Admission::new(
            config.timeslice.timeslice_size,
            config.structural_fault_limit,
            config.max_resubmits,
        );

        info!(
            "pipeline started: {} components, {} workers, data buffer 2^{} bytes, desc buffer 2^{} entries, \
             timeslice {}+{}",
            config.components.len(),
            config.pool.workers,
            config.ring.data_buffer_size_exp,
            config.ring.desc_buffer_size_exp,
            config.timeslice.timeslice_size,
            config.timeslice.overlap_size
        );

        Ok(Self {
            config,
            buffer,
            generators,
            admission,
            pool: Some(pool),
            stats,
            sink,
            retired: 0,
        })
    }

    /// Run one cooperative step
    ///
    /// Production skips a component while a verifier reads it, and admission
    /// and completion polling never wait. Releasing buffer space after an
    /// acknowledgment takes every component's write lock and may wait for
    /// verifiers still reading.
    pub fn poll(&mut self) -> Result<PollOutcome> {
        let mut outcome = PollOutcome::default();

        for (component, generator) in self.generators.iter_mut().enumerate() {
            let Some(mut ring) = self.buffer.try_ring_mut(component)? else {
                continue;
            };
            outcome.produced += generator.proceed(&mut ring)?.produced;
        }

        outcome.submitted = self.admit();

        let ready: Vec<Completion> = match &self.pool {
            Some(pool) => std::iter::from_fn(|| pool.try_completion()).collect(),
            None => Vec::new(),
        };
        for completion in ready {
            if self.retire(completion)? {
                outcome.retired += 1;
            }
        }

        Ok(outcome)
    }

    /// Poll until `predicate` holds or `timeout` passes
    ///
    /// Returns whether the predicate was met. Idle steps wait briefly for a
    /// completion instead of spinning.
    pub fn run_until(&mut self, timeout: Duration, mut predicate: impl FnMut(&Self) -> bool) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(self) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }

            if self.poll()?.is_idle() {
                let waited = self
                    .pool
                    .as_ref()
                    .and_then(|pool| pool.wait_completion(Duration::from_millis(1)));
                if let Some(completion) = waited {
                    self.retire(completion)?;
                }
            }
        }
    }

    /// Stop the workers, retire what they finished, and return the totals
    ///
    /// Timeslices lost during shutdown are not re-submitted.
    pub fn shutdown(mut self) -> Result<StatsSnapshot> {
        if let Some(pool) = self.pool.take() {
            let summary = pool.shutdown();
            for completion in summary.completions {
                self.retire(completion)?;
            }
            if summary.restarts > 0 {
                info!("{} workers were restarted during the run", summary.restarts);
            }
        }

        let snapshot = self.stats.snapshot();
        info!("pipeline stopped at ts_pos {}: {}", self.admission.acked(), snapshot);
        Ok(snapshot)
    }

    fn admit(&mut self) -> u64 {
        let Some(pool) = self.pool.as_ref() else {
            return 0;
        };
        let buffer = &self.buffer;

        let mut submitted = 0;
        while let Some(ts_pos) = self.admission.peek(|ts_pos| buffer.is_complete(ts_pos)) {
            if pool.try_submit(WorkItem { ts_pos }).is_err() {
                break;
            }
            self.admission.confirm(ts_pos);
            submitted += 1;
        }
        submitted
    }

    fn retire(&mut self, completion: Completion) -> Result<bool> {
        if completion.status == CompletionStatus::Lost {
            self.stats.record_lost();
        }

        let retirement = self.admission.complete(completion);
        if let Some(done) = retirement.completion {
            if done.status == CompletionStatus::Abandoned {
                self.stats.record_abandoned();
            }
            self.sink.on_completion(&done);
            self.retired += 1;
            if self.config.stats_interval > 0 && self.retired % self.config.stats_interval == 0 {
                info!("{}", self.stats.snapshot());
            }
        }
        if let Some(acked) = retirement.acked {
            self.buffer.advance_read(acked)?;
        }

        Ok(retirement.completion.is_some())
    }

    /// The component buffers
    pub fn buffer(&self) -> &Arc<TimesliceBuffer<S>> {
        &self.buffer
    }

    /// Current verification totals
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The completion sink
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Timeslices retired so far
    pub fn retired(&self) -> u64 {
        self.retired
    }

    /// Every timeslice below this position is retired
    pub fn acked(&self) -> u64 {
        self.admission.acked()
    }

    /// True once structural faults halted admission
    pub fn halted(&self) -> bool {
        self.admission.halted()
    }

    /// Admission bookkeeping
    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    /// Workers restarted after a crash so far
    pub fn restarts(&self) -> u64 {
        self.pool.as_ref().map_or(0, WorkerPool::restarts)
    }

    /// The configuration the pipeline runs with
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, RingConfig, TimesliceConfig};

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            ring: RingConfig {
                data_buffer_size_exp: 16,
                desc_buffer_size_exp: 7,
            },
            timeslice: TimesliceConfig {
                timeslice_size: 10,
                overlap_size: 2,
            },
            pool: PoolConfig {
                workers: 2,
                queue_capacity: 16,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_poll_skips_component_being_read() {
        let mut pipeline: Pipeline = Pipeline::new(small_config(), CollectingSink::new()).unwrap();
        let buffer = Arc::clone(pipeline.buffer());

        let reader = buffer.ring(0).unwrap();
        let outcome = pipeline.poll().unwrap();
        assert_eq!(outcome.produced, 0);
        assert_eq!(outcome.submitted, 0);
        assert_eq!(reader.write_index().desc, 0);
        drop(reader);

        assert!(pipeline.poll().unwrap().produced > 0);
        assert!(buffer.published_desc(0).unwrap() > 0);
        pipeline.shutdown().unwrap();
    }

    #[test]
    fn test_runs_past_buffer_capacity() {
        let mut pipeline: Pipeline = Pipeline::new(small_config(), CollectingSink::new()).unwrap();

        let reached = pipeline
            .run_until(Duration::from_secs(20), |p| p.acked() >= 1000)
            .unwrap();
        assert!(reached);
        assert!(pipeline.buffer().ring(0).unwrap().read_index().desc >= 1000);

        let verified = pipeline.sink().count(CompletionStatus::Verified);
        assert!(verified >= 100);
        assert_eq!(verified, pipeline.sink().completions().len());

        let stats = pipeline.shutdown().unwrap();
        assert_eq!(stats.content_errors, 0);
        assert_eq!(stats.structural_faults, 0);
    }

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        {
            let mut pipeline: Pipeline<HeapRegion, _> =
                Pipeline::new(small_config(), |c: &Completion| seen.push(c.ts_pos)).unwrap();
            assert!(pipeline
                .run_until(Duration::from_secs(20), |p| p.retired() >= 5)
                .unwrap());
            pipeline.shutdown().unwrap();
        }

        assert!(seen.len() >= 5);
        assert!(seen.iter().all(|ts_pos| ts_pos % 10 == 0));
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen[0], 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = small_config();
        config.components.clear();
        assert!(Pipeline::<HeapRegion, CollectingSink>::new(config, CollectingSink::new()).is_err());
    }
}
