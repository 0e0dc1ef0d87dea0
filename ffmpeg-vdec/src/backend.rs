use std::sync::Arc;

use crate::{
    bsf::{AnnexBFilter, BitstreamFilter},
    config::SourceAddress,
    hw::{CallbackBinding, FfmpegDecoder, HwDecoder},
    input::{AvInput, Demuxer},
    postprocess::{PostProcessor, SemiPlanarAligner},
    stream::{AvStream, CodecFamily},
};

/// The external collaborators a channel pipeline drives.
pub trait Backend: Send + Sync {
    fn open(&self, address: &SourceAddress) -> anyhow::Result<Box<dyn Demuxer>>;

    /// Allocates and initialises the reformat filter for `stream`.
    fn bitstream_filter(
        &self,
        family: CodecFamily,
        stream: &AvStream,
    ) -> anyhow::Result<Box<dyn BitstreamFilter>>;

    fn create_decoder(
        &self,
        stream: &AvStream,
        binding: CallbackBinding,
    ) -> anyhow::Result<Box<dyn HwDecoder>>;

    fn post_processor(&self) -> Arc<dyn PostProcessor>;
}

/// FFmpeg demux and decode with the software aligner.
pub struct FfmpegBackend {
    post_processor: Arc<dyn PostProcessor>,
}

impl FfmpegBackend {
    pub fn new() -> Self {
        Self {
            post_processor: Arc::new(SemiPlanarAligner),
        }
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for FfmpegBackend {
    fn open(&self, address: &SourceAddress) -> anyhow::Result<Box<dyn Demuxer>> {
        Ok(Box::new(AvInput::open(address)?))
    }

    fn bitstream_filter(
        &self,
        family: CodecFamily,
        stream: &AvStream,
    ) -> anyhow::Result<Box<dyn BitstreamFilter>> {
        let mut filter = AnnexBFilter::new(family);
        filter.init(stream.extradata())?;
        Ok(Box::new(filter))
    }

    fn create_decoder(
        &self,
        stream: &AvStream,
        binding: CallbackBinding,
    ) -> anyhow::Result<Box<dyn HwDecoder>> {
        Ok(Box::new(FfmpegDecoder::create(stream, binding)?))
    }

    fn post_processor(&self) -> Arc<dyn PostProcessor> {
        Arc::clone(&self.post_processor)
    }
}
