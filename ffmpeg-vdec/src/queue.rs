//! Bounded FIFO shared between a channel's decode callback and its pipeline thread.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

use crate::policy::{FRAME_QUEUE_CAPACITY, RetryPolicy};

/// Fixed-capacity queue. `push` and `pop` never block.
#[derive(Debug)]
pub struct FrameQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> FrameQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Appends `item`, handing it back if the queue is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut items = self.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        Ok(())
    }

    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Pushes with a bounded number of attempts, sleeping `policy.pause`
    /// between them. Returns the item if every attempt found the queue full.
    pub fn push_with_retry(&self, item: T, policy: &RetryPolicy) -> Result<(), T> {
        let attempts = policy.attempts.max(1);
        let mut item = item;
        for attempt in 1..=attempts {
            match self.push(item) {
                Ok(()) => return Ok(()),
                Err(rejected) => {
                    item = rejected;
                    if attempt < attempts {
                        thread::sleep(policy.pause);
                    }
                }
            }
        }
        Err(item)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::new(FRAME_QUEUE_CAPACITY)
    }
}
