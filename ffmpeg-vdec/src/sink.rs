//! Downstream hand-off of finished images.
//!
//! The sink may report a full queue; the [`Dispatcher`] keeps re-submitting
//! the same image until it is accepted or rejected for another reason.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;

use crate::image::ProcessedImage;
use crate::queue::FrameQueue;

/// Output port used for every image.
pub const IMAGE_PORT: u32 = 0;

/// Type tag attached to every submission.
pub const IMAGE_TYPE_TAG: &str = "VideoImageParaT";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("downstream queue is full")]
    QueueFull,
    #[error("downstream rejected the image: {0}")]
    Other(String),
}

/// Receiver of finished images.
pub trait ImageSink: Send + Sync {
    fn submit(
        &self,
        port: u32,
        type_tag: &str,
        image: Arc<ProcessedImage>,
    ) -> Result<(), SinkError>;
}

/// Forwards images to a sink, retrying while the sink is full.
#[derive(Clone)]
pub struct Dispatcher {
    sink: Arc<dyn ImageSink>,
    retry_pause: Duration,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn ImageSink>, retry_pause: Duration) -> Self {
        Self { sink, retry_pause }
    }

    /// Submits `image`, sleeping and retrying on `QueueFull` with no upper
    /// bound. Any other failure is logged and the image is discarded.
    pub fn send(&self, image: ProcessedImage) -> bool {
        let image = Arc::new(image);
        loop {
            match self
                .sink
                .submit(IMAGE_PORT, IMAGE_TYPE_TAG, Arc::clone(&image))
            {
                Ok(()) => return true,
                Err(SinkError::QueueFull) => {
                    log::debug!("downstream queue full when sending {}, sleep", image);
                    thread::sleep(self.retry_pause);
                }
                Err(SinkError::Other(reason)) => {
                    log::error!("send {} failed: {}", image, reason);
                    return false;
                }
            }
        }
    }

    /// Forwards everything currently queued. Returns the number delivered.
    pub fn drain(&self, queue: &FrameQueue<ProcessedImage>) -> u64 {
        let mut delivered = 0;
        while let Some(image) = queue.pop() {
            if self.send(image) {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn send_finished(&self) -> bool {
        let delivered = self.send(ProcessedImage::finished());
        if !delivered {
            log::error!("send finished data failed");
        }
        delivered
    }
}

/// Sink backed by a bounded tokio channel; a full channel maps to `QueueFull`.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::Sender<Arc<ProcessedImage>>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<Arc<ProcessedImage>>) {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ImageSink for ChannelSink {
    fn submit(
        &self,
        port: u32,
        type_tag: &str,
        image: Arc<ProcessedImage>,
    ) -> Result<(), SinkError> {
        if port != IMAGE_PORT || type_tag != IMAGE_TYPE_TAG {
            return Err(SinkError::Other(format!(
                "no route for port {} type {}",
                port, type_tag
            )));
        }
        self.tx.try_send(image).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::QueueFull,
            TrySendError::Closed(_) => SinkError::Other("receiver closed".to_string()),
        })
    }
}
