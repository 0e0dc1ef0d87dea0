//! Decode completion handling: key-frame sampling, post-processing and
//! enqueueing onto the channel's frame queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::{
    config::{ChannelId, SourceAddress},
    error::Error,
    frame::RawDecodedFrame,
    hw::FrameCallback,
    image::ProcessedImage,
    keyframe::KeyFrameSelector,
    policy::RetryPolicy,
    postprocess::{OutputGeometry, PostProcessor, ProcessRequest},
    queue::FrameQueue,
};

/// Per-channel state carried as callback metadata. Owned by the
/// orchestrator so the frame counter survives across runs.
#[derive(Debug)]
pub struct ChannelContext {
    channel: ChannelId,
    address: String,
    selector: KeyFrameSelector,
    queue: FrameQueue<ProcessedImage>,
    queued_total: AtomicU64,
}

impl ChannelContext {
    pub fn new(
        channel: ChannelId,
        address: &SourceAddress,
        selector: KeyFrameSelector,
        queue: FrameQueue<ProcessedImage>,
    ) -> Self {
        Self {
            channel,
            address: address.as_str().to_string(),
            selector,
            queue,
            queued_total: AtomicU64::new(0),
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn selector(&self) -> &KeyFrameSelector {
        &self.selector
    }

    pub fn queue(&self) -> &FrameQueue<ProcessedImage> {
        &self.queue
    }

    /// Images ever pushed onto the queue, whether or not the sink took them.
    pub fn queued_total(&self) -> u64 {
        self.queued_total.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Missing frame or metadata; nothing was counted.
    Rejected,
    /// Not a sampled frame.
    Skipped { frame_id: u32 },
    Queued { frame_id: u32 },
    /// Post-processing failed or the queue stayed full.
    Dropped { frame_id: u32 },
}

pub struct DecodeCallbackHandler {
    post_processor: Arc<dyn PostProcessor>,
    push_retry: RetryPolicy,
}

impl DecodeCallbackHandler {
    pub fn new(post_processor: Arc<dyn PostProcessor>, push_retry: RetryPolicy) -> Self {
        Self {
            post_processor,
            push_retry,
        }
    }

    pub fn handle(
        &self,
        frame: Option<RawDecodedFrame>,
        context: Option<&ChannelContext>,
    ) -> FrameOutcome {
        let (Some(frame), Some(context)) = (frame, context) else {
            log::error!("the input data for decode callback is empty");
            return FrameOutcome::Rejected;
        };

        let selection = context.selector.select();
        let frame_id = selection.frame_id;
        if !selection.retained {
            drop(frame);
            return FrameOutcome::Skipped { frame_id };
        }

        log::info!(
            "get key frame, frame id: {}, channel: {}, address: {}, {}x{}",
            frame_id,
            context.channel,
            context.address,
            frame.width(),
            frame.height()
        );

        let data = match self.post_process(&frame) {
            Ok(data) => data,
            Err(e) => {
                log::error!(
                    "{} drop frame {}: {}",
                    context.channel,
                    frame_id,
                    e
                );
                return FrameOutcome::Dropped { frame_id };
            }
        };

        let image = ProcessedImage::new(
            context.channel,
            &context.address,
            frame_id,
            frame.width(),
            frame.height(),
            data,
        );
        drop(frame);

        match context.queue.push_with_retry(image, &self.push_retry) {
            Ok(()) => {
                context.queued_total.fetch_add(1, Ordering::AcqRel);
                FrameOutcome::Queued { frame_id }
            }
            Err(image) => {
                log::error!(
                    "{} queue stayed full after {} attempts, drop {}",
                    context.channel,
                    self.push_retry.attempts,
                    image
                );
                FrameOutcome::Dropped { frame_id }
            }
        }
    }

    /// Runs the post-processor and copies its output into process-owned
    /// memory. The collaborator buffer is released before returning.
    fn post_process(&self, frame: &RawDecodedFrame) -> crate::Result<Bytes> {
        let geometry = OutputGeometry::for_frame(frame.width(), frame.height())?;
        let request = ProcessRequest::new(frame, geometry);
        let output = self
            .post_processor
            .process(&request)
            .map_err(|e| Error::PostProcess(e.to_string()))?;

        let bytes = output.as_bytes();
        if bytes.len() as u64 != geometry.size {
            return Err(Error::PostProcess(format!(
                "output buffer has {} bytes, expected {}",
                bytes.len(),
                geometry.size
            )));
        }
        let data = Bytes::copy_from_slice(bytes);
        drop(output);
        Ok(data)
    }
}

impl FrameCallback for DecodeCallbackHandler {
    fn on_frame(&self, frame: Option<RawDecodedFrame>, metadata: Option<&ChannelContext>) {
        match self.handle(frame, metadata) {
            FrameOutcome::Queued { frame_id } => log::debug!("frame {} queued", frame_id),
            FrameOutcome::Skipped { .. } | FrameOutcome::Rejected | FrameOutcome::Dropped { .. } => {}
        }
    }
}
