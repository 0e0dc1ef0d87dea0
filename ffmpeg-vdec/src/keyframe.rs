//! Sampling of decoded frames by per-channel sequence id.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::policy::KEY_FRAME_INTERVAL;

/// Outcome of numbering one decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub frame_id: u32,
    pub retained: bool,
}

/// Numbers decoded frames from 1 and keeps ids 1, 1+N, 1+2N, ...
///
/// Not a codec-level key frame: this is a cheap sampling policy. The counter
/// is monotonic for the selector's lifetime and is never reset.
#[derive(Debug)]
pub struct KeyFrameSelector {
    interval: u32,
    counter: AtomicU32,
}

impl KeyFrameSelector {
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            counter: AtomicU32::new(0),
        }
    }

    /// Assigns the next sequence id and decides whether the frame is kept.
    pub fn select(&self) -> Selection {
        let frame_id = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        Selection {
            frame_id,
            retained: self.is_key_frame(frame_id),
        }
    }

    /// An interval of 0 or 1 keeps every frame.
    pub fn is_key_frame(&self, frame_id: u32) -> bool {
        self.interval <= 1 || frame_id % self.interval == 1
    }

    /// Last id handed out, 0 before the first frame.
    pub fn last_frame_id(&self) -> u32 {
        self.counter.load(Ordering::Relaxed)
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }
}

impl Default for KeyFrameSelector {
    fn default() -> Self {
        Self::new(KEY_FRAME_INTERVAL)
    }
}
