//! Tunable policy constants for frame sampling, queueing and retries.

use std::time::Duration;

/// Every Nth decoded frame is kept (ids 1, 1+N, 1+2N, ...).
pub const KEY_FRAME_INTERVAL: u32 = 5;

/// Capacity of each channel's frame queue.
pub const FRAME_QUEUE_CAPACITY: usize = 10;

/// Producer attempts before a frame is dropped on a full queue.
pub const PUSH_RETRY_ATTEMPTS: u32 = 100;

pub const PUSH_RETRY_PAUSE: Duration = Duration::from_millis(100);

/// Pause between downstream submissions while the sink reports queue full.
pub const SINK_RETRY_PAUSE: Duration = Duration::from_millis(10);

/// Bounded retry used by the decode callback when its queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: PUSH_RETRY_ATTEMPTS,
            pause: PUSH_RETRY_PAUSE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodePolicy {
    pub key_frame_interval: u32,
    pub queue_capacity: usize,
    pub push_retry: RetryPolicy,
    pub sink_retry_pause: Duration,
}

impl Default for DecodePolicy {
    fn default() -> Self {
        Self {
            key_frame_interval: KEY_FRAME_INTERVAL,
            queue_capacity: FRAME_QUEUE_CAPACITY,
            push_retry: RetryPolicy::default(),
            sink_retry_pause: SINK_RETRY_PAUSE,
        }
    }
}
