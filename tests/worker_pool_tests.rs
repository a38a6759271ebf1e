//! Tests for the blocking queue and the supervised worker pool

use fles_ring_buffer::config::{GeneratorConfig, PoolConfig, RingConfig, TimesliceConfig};
use fles_ring_buffer::types::{ConcurrentQueue, Pop, VerificationStats};
use fles_ring_buffer::{Completion, CompletionStatus, PatternGenerator, TimesliceBuffer, TimesliceVerifier, WorkItem, WorkerPool};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn collect(pool: &WorkerPool, count: usize) -> Vec<Completion> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut done = Vec::new();
    while done.len() < count && Instant::now() < deadline {
        if let Some(completion) = pool.wait_completion(Duration::from_millis(10)) {
            done.push(completion);
        }
    }
    done
}

#[test]
fn test_queue_stop_with_many_consumers() {
    init_logger();
    let queue = Arc::new(ConcurrentQueue::new(8));
    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut taken = Vec::new();
                while let Pop::Item(item) = queue.pop() {
                    taken.push(item);
                }
                taken
            })
        })
        .collect();

    for i in 0..1000u64 {
        queue.push(i).unwrap();
    }
    queue.stop();
    assert!(queue.push(1000).is_err());

    let mut taken: Vec<u64> = consumers.into_iter().flat_map(|c| c.join().unwrap()).collect();
    taken.sort_unstable();
    assert_eq!(taken, (0..1000).collect::<Vec<_>>());
    assert!(queue.is_empty());
}

#[test]
fn test_timed_pop_on_empty_queue() {
    let queue = ConcurrentQueue::<u64>::new(2);
    let start = Instant::now();
    assert_eq!(queue.pop_timeout(Duration::from_millis(20)), Pop::Empty);
    assert!(start.elapsed() >= Duration::from_millis(15));
    assert_eq!(queue.capacity(), 2);
}

#[test]
fn test_replacement_keeps_worker_index() {
    init_logger();
    let config = PoolConfig {
        workers: 2,
        queue_capacity: 8,
    };
    let built = Arc::new(Mutex::new(Vec::new()));
    let pool = {
        let built = Arc::clone(&built);
        WorkerPool::start(&config, move |index| {
            built.lock().push(index);
            move |item: WorkItem| {
                if item.ts_pos % 100 == 7 {
                    panic!("worker {} crashed on {}", index, item.ts_pos);
                }
                Completion {
                    ts_pos: item.ts_pos,
                    status: CompletionStatus::Verified,
                }
            }
        })
        .unwrap()
    };

    for ts_pos in [7, 107, 207] {
        pool.submit(WorkItem { ts_pos }).unwrap();
    }
    let lost = collect(&pool, 3);
    assert_eq!(lost.len(), 3);
    assert!(lost.iter().all(|c| c.status == CompletionStatus::Lost));
    let positions: HashSet<u64> = lost.iter().map(|c| c.ts_pos).collect();
    assert_eq!(positions, HashSet::from([7, 107, 207]));

    for ts_pos in 0..5 {
        pool.submit(WorkItem { ts_pos }).unwrap();
    }
    assert_eq!(collect(&pool, 5).len(), 5);

    let summary = pool.shutdown();
    assert_eq!(summary.restarts, 3);
    let built = built.lock();
    assert_eq!(built.len(), 5);
    assert!(built.iter().all(|&index| index < 2));
}

#[test]
fn test_verifiers_share_one_buffer() {
    init_logger();
    let ring = RingConfig {
        data_buffer_size_exp: 18,
        desc_buffer_size_exp: 9,
    };
    let timeslice = TimesliceConfig {
        timeslice_size: 20,
        overlap_size: 1,
    };
    let buffer: TimesliceBuffer = TimesliceBuffer::new(&ring, timeslice, 2).unwrap();
    for (component, link_id) in [0xE001, 0xE002].into_iter().enumerate() {
        let mut generator = PatternGenerator::new(GeneratorConfig {
            link_id,
            seed: u64::from(link_id),
            ..Default::default()
        });
        generator.proceed(&mut buffer.ring_mut(component).unwrap()).unwrap();
    }
    let buffer = Arc::new(buffer);
    let stats = Arc::new(VerificationStats::new());

    let pool = {
        let buffer = Arc::clone(&buffer);
        let stats = Arc::clone(&stats);
        WorkerPool::start(&PoolConfig::default(), move |_| {
            TimesliceVerifier::new(Arc::clone(&buffer), Arc::clone(&stats))
        })
        .unwrap()
    };
    assert_eq!(pool.workers(), 4);

    let positions: Vec<u64> = (0..25).map(|n| n * 20).filter(|&p| buffer.is_complete(p)).collect();
    assert_eq!(positions.len(), 25);
    for &ts_pos in &positions {
        pool.submit(WorkItem { ts_pos }).unwrap();
    }

    let done = collect(&pool, positions.len());
    assert_eq!(done.len(), positions.len());
    assert!(done.iter().all(|c| c.status == CompletionStatus::Verified));
    pool.shutdown();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.timeslices, 25);
    assert_eq!(snapshot.components, 50);
    assert_eq!(snapshot.microslices, 25 * 2 * 21);
    assert_eq!(snapshot.failed_timeslices, 0);
}
