//! Per-channel control loop: open, select, reformat, decode, drain.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::{
    backend::Backend,
    bsf::BitstreamFilter,
    callback::{ChannelContext, DecodeCallbackHandler},
    config::{ChannelId, SourceAddress},
    error::{Error, Result},
    hw::{CallbackBinding, HwDecoder},
    input::Demuxer,
    sink::Dispatcher,
    stream::{AvStream, CodecFamily},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    SourceOpened,
    StreamSelected,
    FiltersReady,
    Decoding,
    Draining,
    Closed,
}

/// Outcome of one [`ChannelPipeline::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub channel: ChannelId,
    pub state: PipelineState,
    pub units_read: u64,
    pub units_submitted: u64,
    pub images_dispatched: u64,
    /// Images queued during this run, including ones the sink refused.
    pub images_queued: u64,
    /// Every state entered, in order.
    pub states: Vec<PipelineState>,
    /// The channel-fatal error, if any.
    pub error: Option<Error>,
}

impl PipelineReport {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            state: PipelineState::Idle,
            units_read: 0,
            units_submitted: 0,
            images_dispatched: 0,
            images_queued: 0,
            states: vec![PipelineState::Idle],
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl Display for PipelineReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {:?}, read {}, submitted {}, dispatched {}",
            self.channel, self.state, self.units_read, self.units_submitted, self.images_dispatched
        )?;
        if let Some(error) = &self.error {
            write!(f, ", error: {}", error)?;
        }
        Ok(())
    }
}

fn open_source(backend: &dyn Backend, address: &SourceAddress) -> Result<Box<dyn Demuxer>> {
    backend.open(address).map_err(|e| Error::Open {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

fn select_video_stream(demuxer: &dyn Demuxer, address: &SourceAddress) -> Result<AvStream> {
    demuxer
        .video_stream()
        .cloned()
        .ok_or_else(|| Error::NoVideoStream {
            address: address.to_string(),
        })
}

fn codec_family(stream: &AvStream) -> Result<CodecFamily> {
    stream.codec_family().ok_or_else(|| Error::UnsupportedCodec {
        codec: format!("{:?}", stream.codec_id()),
    })
}

/// Pre-flight check: the source opens and its first video stream is
/// H.264 or H.265. The source is closed again before returning.
pub fn verify_source(backend: &dyn Backend, address: &SourceAddress) -> Result<CodecFamily> {
    let demuxer = open_source(backend, address)?;
    let stream = select_video_stream(demuxer.as_ref(), address)?;
    let family = codec_family(&stream)?;
    log::info!(
        "{} video stream {}x{}, format {}",
        address,
        stream.width(),
        stream.height(),
        family.video_format()
    );
    Ok(family)
}

pub struct ChannelPipeline {
    channel: ChannelId,
    address: SourceAddress,
    backend: Arc<dyn Backend>,
    context: Arc<ChannelContext>,
    handler: Arc<DecodeCallbackHandler>,
    dispatcher: Dispatcher,
    report: PipelineReport,
}

impl ChannelPipeline {
    pub fn new(
        channel: ChannelId,
        address: SourceAddress,
        backend: Arc<dyn Backend>,
        context: Arc<ChannelContext>,
        handler: Arc<DecodeCallbackHandler>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            channel,
            address,
            backend,
            context,
            handler,
            dispatcher,
            report: PipelineReport::new(channel),
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn state(&self) -> PipelineState {
        self.report.state
    }

    /// Runs the channel to `Closed`. Errors end only this channel and are
    /// carried in the returned report.
    pub fn run(mut self) -> PipelineReport {
        log::info!("{} start decoding {}", self.channel, self.address);
        let queued_before = self.context.queued_total();
        if let Err(e) = self.decode() {
            log::error!("{} stopped: {}", self.channel, e);
            self.report.error = Some(e);
        }

        self.report.images_queued = self.context.queued_total() - queued_before;
        if self.report.images_queued > 0 || !self.context.queue().is_empty() {
            self.transition(PipelineState::Draining);
        }
        self.report.images_dispatched += self.dispatcher.drain(self.context.queue());
        self.transition(PipelineState::Closed);

        log::info!("{}", self.report);
        self.report
    }

    fn transition(&mut self, state: PipelineState) {
        log::debug!("{} {:?} -> {:?}", self.channel, self.report.state, state);
        self.report.state = state;
        self.report.states.push(state);
    }

    fn decode(&mut self) -> Result<()> {
        let mut demuxer = open_source(self.backend.as_ref(), &self.address)?;
        self.transition(PipelineState::SourceOpened);

        let stream = select_video_stream(demuxer.as_ref(), &self.address)?;
        self.transition(PipelineState::StreamSelected);

        let family = codec_family(&stream)?;
        let mut filter = self
            .backend
            .bitstream_filter(family, &stream)
            .map_err(|e| Error::FilterInit(format!("{}: {}", family.filter_name(), e)))?;
        self.transition(PipelineState::FiltersReady);

        let binding = CallbackBinding::new(
            self.channel.number(),
            self.handler.clone(),
            Some(self.context.clone()),
        );
        let mut decoder = self
            .backend
            .create_decoder(&stream, binding)
            .map_err(|e| Error::AcceleratorUnavailable(e.to_string()))?;
        self.transition(PipelineState::Decoding);

        let result = self.decode_loop(
            demuxer.as_mut(),
            filter.as_mut(),
            decoder.as_mut(),
            stream.index(),
        );

        drop(filter);
        drop(demuxer);
        if let Err(e) = decoder.destroy() {
            log::warn!("{} release decoder failed: {}", self.channel, e);
        }
        result
    }

    fn decode_loop(
        &mut self,
        demuxer: &mut dyn Demuxer,
        filter: &mut dyn BitstreamFilter,
        decoder: &mut dyn HwDecoder,
        video_index: usize,
    ) -> Result<()> {
        loop {
            let unit = match demuxer.read_access_unit() {
                Ok(Some(unit)) => unit,
                Ok(None) => break,
                Err(e) => {
                    log::error!("{} read from {} failed: {}", self.channel, self.address, e);
                    break;
                }
            };
            self.report.units_read += 1;
            if unit.stream_index() != video_index {
                continue;
            }

            if let Err(e) = filter.submit(unit) {
                log::warn!("{} bitstream filter rejected unit: {}", self.channel, e);
                continue;
            }

            while let Some(filtered) = filter.receive() {
                decoder
                    .submit(filtered)
                    .map_err(|e| Error::DecoderSubmit(e.to_string()))?;
                self.report.units_submitted += 1;
                self.report.images_dispatched += self.dispatcher.drain(self.context.queue());
            }
        }
        log::info!("{} end of source {}", self.channel, self.address);
        Ok(())
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
