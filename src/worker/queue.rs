//! Bounded blocking queue with a stopped state
//!
//! Producers block while the queue is full and consumers block while it is
//! empty. `stop` wakes everybody: pushes fail from then on, while pops keep
//! draining what is left and report `Pop::Stopped` only once the queue is
//! empty, so no item is dropped by a shutdown.

use crate::error::{Result, RingError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Outcome of a pop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop<T> {
    /// The next item
    Item(T),
    /// Nothing available right now (non-blocking and timed pops only)
    Empty,
    /// The queue is stopped and drained
    Stopped,
}

/// Outcome of a failed non-blocking push, handing the item back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError<T> {
    /// The queue is at capacity
    Full(T),
    /// The queue is stopped
    Stopped(T),
}

impl<T> PushError<T> {
    /// Recover the rejected item
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Stopped(item) => item,
        }
    }
}

struct State<T> {
    items: VecDeque<T>,
    stopped: bool,
}

/// Multi-producer, multi-consumer bounded queue
pub struct ConcurrentQueue<T> {
    state: Mutex<State<T>>,
    /// Signalled when an item is pushed or the queue stops
    not_empty: Condvar,
    /// Signalled when an item is popped or the queue stops
    not_full: Condvar,
    capacity: usize,
}

impl<T> ConcurrentQueue<T> {
    /// Create a queue holding at most `capacity` items
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                stopped: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Append an item, blocking while the queue is full
    ///
    /// Fails with `QueueStopped` if the queue is or becomes stopped; the
    /// item is dropped in that case.
    pub fn push(&self, item: T) -> Result<()> {
        let mut state = self.state.lock();
        while !state.stopped && state.items.len() >= self.capacity {
            self.not_full.wait(&mut state);
        }
        if state.stopped {
            return Err(RingError::QueueStopped);
        }

        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Append an item if there is room
    pub fn try_push(&self, item: T) -> std::result::Result<(), PushError<T>> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(PushError::Stopped(item));
        }
        if state.items.len() >= self.capacity {
            return Err(PushError::Full(item));
        }

        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item, blocking until one arrives or the queue stops
    pub fn pop(&self) -> Pop<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Pop::Item(item);
            }
            if state.stopped {
                return Pop::Stopped;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Remove the oldest item, waiting at most `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Pop<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Pop::Item(item);
            }
            if state.stopped {
                return Pop::Stopped;
            }
            if self.not_empty.wait_for(&mut state, timeout).timed_out() {
                return match state.items.pop_front() {
                    Some(item) => {
                        drop(state);
                        self.not_full.notify_one();
                        Pop::Item(item)
                    }
                    None if state.stopped => Pop::Stopped,
                    None => Pop::Empty,
                };
            }
        }
    }

    /// Remove the oldest item without blocking
    pub fn try_pop(&self) -> Pop<T> {
        let mut state = self.state.lock();
        match state.items.pop_front() {
            Some(item) => {
                drop(state);
                self.not_full.notify_one();
                Pop::Item(item)
            }
            None if state.stopped => Pop::Stopped,
            None => Pop::Empty,
        }
    }

    /// Stop the queue and wake every waiter
    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// True once `stop` was called
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// True if no item is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued items
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = ConcurrentQueue::new(4);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.try_push(3).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Pop::Item(1));
        assert_eq!(queue.try_pop(), Pop::Item(2));
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), Pop::Item(3));
        assert_eq!(queue.try_pop(), Pop::Empty);
    }

    #[test]
    fn test_try_push_full_returns_item() {
        let queue = ConcurrentQueue::new(1);
        queue.try_push("a").unwrap();
        assert_eq!(queue.try_push("b"), Err(PushError::Full("b")));
    }

    #[test]
    fn test_stop_drains_before_stopped() {
        let queue = ConcurrentQueue::new(4);
        queue.push(7).unwrap();
        queue.stop();

        assert!(matches!(queue.push(8), Err(RingError::QueueStopped)));
        assert_eq!(queue.try_push(9).unwrap_err().into_inner(), 9);
        assert_eq!(queue.pop(), Pop::Item(7));
        assert_eq!(queue.pop(), Pop::Stopped);
        assert_eq!(queue.try_pop(), Pop::Stopped);
    }

    #[test]
    fn test_stop_wakes_blocked_pop() {
        let queue = Arc::new(ConcurrentQueue::<u64>::new(2));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(20));
        queue.stop();
        assert_eq!(consumer.join().unwrap(), Pop::Stopped);
    }

    #[test]
    fn test_blocked_push_resumes_after_pop() {
        let queue = Arc::new(ConcurrentQueue::new(1));
        queue.push(1).unwrap();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.pop(), Pop::Item(1));
        producer.join().unwrap().unwrap();
        assert_eq!(queue.pop(), Pop::Item(2));
    }
}
