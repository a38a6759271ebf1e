//! Supervised pool of verification threads
//!
//! - Workers block on the work queue and push one completion per item
//! - Every worker carries an exit guard that reports its termination, and
//!   whether it was a panic, to the supervisor thread over a channel
//! - The supervisor joins the dead thread, starts a replacement with the
//!   same index and reports the timeslice the dead thread held as lost
//! - Shutdown stops the work queue; workers drain it and exit, and the
//!   supervisor ends once every worker has exited normally

use crate::config::PoolConfig;
use crate::error::{Result, RingError};
use crate::timeslice::{Completion, CompletionStatus, WorkItem};
use crate::worker::queue::{ConcurrentQueue, Pop, PushError};
use crate::worker::Processor;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Sent by a worker thread when it terminates
#[derive(Debug)]
struct ExitNotice {
    index: usize,
    panicked: bool,
}

/// Reports the owning thread's exit when dropped, including during unwinding
struct ExitGuard {
    index: usize,
    exits: Sender<ExitNotice>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.exits.send(ExitNotice {
            index: self.index,
            panicked: thread::panicking(),
        });
    }
}

/// State shared by the workers and the supervisor
struct Shared<F> {
    factory: F,
    work: Arc<ConcurrentQueue<WorkItem>>,
    completions: Arc<ConcurrentQueue<Completion>>,
    /// Timeslice currently held by each worker
    in_flight: Mutex<Vec<Option<u64>>>,
    exits: Sender<ExitNotice>,
}

/// What is left after a shutdown
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PoolSummary {
    /// Completions not collected before the shutdown
    pub completions: Vec<Completion>,
    /// Workers restarted after a crash
    pub restarts: u64,
}

/// Fixed-size pool of supervised worker threads
pub struct WorkerPool {
    work: Arc<ConcurrentQueue<WorkItem>>,
    completions: Arc<ConcurrentQueue<Completion>>,
    restarts: Arc<AtomicU64>,
    supervisor: Option<JoinHandle<()>>,
    workers: usize,
}

impl WorkerPool {
    /// Start `config.workers` threads, each running a processor built by
    /// `factory` from its worker index
    ///
    /// # Arguments
    ///
    /// * `config` - Pool size and queue capacity
    /// * `factory` - Builds the processor of a worker, also for replacements
    pub fn start<P, F>(config: &PoolConfig, factory: F) -> Result<Self>
    where
        P: Processor,
        F: Fn(usize) -> P + Send + Sync + 'static,
    {
        config.validate()?;

        let work = Arc::new(ConcurrentQueue::new(config.queue_capacity));
        // Every outstanding item can complete without blocking a worker
        let completions = Arc::new(ConcurrentQueue::new(config.queue_capacity + config.workers));
        let restarts = Arc::new(AtomicU64::new(0));
        let (exit_tx, exit_rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            factory,
            work: Arc::clone(&work),
            completions: Arc::clone(&completions),
            in_flight: Mutex::new(vec![None; config.workers]),
            exits: exit_tx,
        });

        let mut handles = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            match spawn_worker::<P, F>(&shared, index) {
                Ok(handle) => handles.push(Some(handle)),
                Err(e) => {
                    abort_start(&work, handles);
                    return Err(RingError::WorkerSpawn(e));
                }
            }
        }

        let supervisor = {
            let restarts = Arc::clone(&restarts);
            thread::Builder::new()
                .name("fles-supervisor".to_string())
                .spawn(move || supervise::<P, F>(shared, exit_rx, handles, restarts))
        };
        let supervisor = match supervisor {
            Ok(handle) => handle,
            Err(e) => {
                // The workers are detached but leave as soon as the queue stops
                work.stop();
                return Err(RingError::WorkerSpawn(e));
            }
        };

        debug!("worker pool started with {} workers", config.workers);
        Ok(Self {
            work,
            completions,
            restarts,
            supervisor: Some(supervisor),
            workers: config.workers,
        })
    }

    /// Queue a work item, blocking while the queue is full
    pub fn submit(&self, item: WorkItem) -> Result<()> {
        self.work.push(item)
    }

    /// Queue a work item if there is room
    pub fn try_submit(&self, item: WorkItem) -> std::result::Result<(), PushError<WorkItem>> {
        self.work.try_push(item)
    }

    /// Take a completion if one is ready
    pub fn try_completion(&self) -> Option<Completion> {
        match self.completions.try_pop() {
            Pop::Item(completion) => Some(completion),
            Pop::Empty | Pop::Stopped => None,
        }
    }

    /// Wait up to `timeout` for a completion
    pub fn wait_completion(&self, timeout: Duration) -> Option<Completion> {
        match self.completions.pop_timeout(timeout) {
            Pop::Item(completion) => Some(completion),
            Pop::Empty | Pop::Stopped => None,
        }
    }

    /// Work items waiting for a worker
    pub fn queued(&self) -> usize {
        self.work.len()
    }

    /// Number of worker slots
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Workers restarted after a crash so far
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Stop accepting work, let the workers drain the queue, and join them
    pub fn shutdown(mut self) -> PoolSummary {
        let completions = self.finish();
        PoolSummary {
            completions,
            restarts: self.restarts(),
        }
    }

    fn finish(&mut self) -> Vec<Completion> {
        self.work.stop();

        let mut collected = Vec::new();
        if let Some(supervisor) = self.supervisor.take() {
            // Keep draining so no worker blocks on a full completion queue
            while !supervisor.is_finished() {
                if let Pop::Item(completion) = self.completions.pop_timeout(Duration::from_millis(1)) {
                    collected.push(completion);
                }
            }
            if supervisor.join().is_err() {
                error!("worker supervisor panicked");
            }
        }
        while let Pop::Item(completion) = self.completions.try_pop() {
            collected.push(completion);
        }

        debug!("worker pool stopped");
        collected
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.supervisor.is_some() {
            let dropped = self.finish();
            if !dropped.is_empty() {
                warn!("worker pool dropped with {} uncollected completions", dropped.len());
            }
        }
    }
}

fn abort_start(work: &ConcurrentQueue<WorkItem>, handles: Vec<Option<JoinHandle<()>>>) {
    work.stop();
    for handle in handles.into_iter().flatten() {
        let _ = handle.join();
    }
}

fn spawn_worker<P, F>(shared: &Arc<Shared<F>>, index: usize) -> io::Result<JoinHandle<()>>
where
    P: Processor,
    F: Fn(usize) -> P + Send + Sync + 'static,
{
    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("fles-verifier-{}", index))
        .spawn(move || run_worker::<P, F>(&shared, index))
}

fn run_worker<P, F>(shared: &Shared<F>, index: usize)
where
    P: Processor,
    F: Fn(usize) -> P,
{
    let _guard = ExitGuard {
        index,
        exits: shared.exits.clone(),
    };
    let mut processor = (shared.factory)(index);
    debug!("worker {} started", index);

    loop {
        match shared.work.pop() {
            Pop::Item(item) => {
                shared.in_flight.lock()[index] = Some(item.ts_pos);
                let completion = processor.process(item);
                shared.in_flight.lock()[index] = None;
                if shared.completions.push(completion).is_err() {
                    break;
                }
            }
            Pop::Empty => continue,
            Pop::Stopped => break,
        }
    }

    debug!("worker {} stopped", index);
}

fn supervise<P, F>(
    shared: Arc<Shared<F>>,
    exits: Receiver<ExitNotice>,
    mut handles: Vec<Option<JoinHandle<()>>>,
    restarts: Arc<AtomicU64>,
) where
    P: Processor,
    F: Fn(usize) -> P + Send + Sync + 'static,
{
    let mut running = handles.len();
    while running > 0 {
        let Ok(notice) = exits.recv() else {
            break;
        };
        if let Some(handle) = handles[notice.index].take() {
            let _ = handle.join();
        }
        if !notice.panicked {
            running -= 1;
            continue;
        }

        let lost = shared.in_flight.lock()[notice.index].take();
        match lost {
            Some(ts_pos) => warn!("worker {} crashed while verifying ts_pos {}", notice.index, ts_pos),
            None => warn!("worker {} crashed", notice.index),
        }

        match spawn_worker::<P, F>(&shared, notice.index) {
            Ok(handle) => {
                handles[notice.index] = Some(handle);
                restarts.fetch_add(1, Ordering::Relaxed);
                warn!("worker {} restarted", notice.index);
            }
            Err(e) => {
                error!("failed to restart worker {}: {}", notice.index, e);
                running -= 1;
            }
        }

        if let Some(ts_pos) = lost {
            let completion = Completion {
                ts_pos,
                status: CompletionStatus::Lost,
            };
            if shared.completions.push(completion).is_err() {
                error!("could not report lost ts_pos {}", ts_pos);
            }
        }
    }

    debug!("supervisor stopped");
}
