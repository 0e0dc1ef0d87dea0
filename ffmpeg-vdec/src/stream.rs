use bytes::Bytes;
use ffmpeg_next::{Rational, codec::Id, codec::Parameters, format::stream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Other,
}

impl From<ffmpeg_next::media::Type> for MediaKind {
    fn from(medium: ffmpeg_next::media::Type) -> Self {
        match medium {
            ffmpeg_next::media::Type::Video => MediaKind::Video,
            ffmpeg_next::media::Type::Audio => MediaKind::Audio,
            _ => MediaKind::Other,
        }
    }
}

/// The two compressed codec families the hardware decoder accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFamily {
    H264,
    Hevc,
}

impl CodecFamily {
    pub fn from_codec_id(id: Id) -> Option<Self> {
        match id {
            Id::H264 => Some(CodecFamily::H264),
            Id::HEVC => Some(CodecFamily::Hevc),
            _ => None,
        }
    }

    pub fn codec_id(self) -> Id {
        match self {
            CodecFamily::H264 => Id::H264,
            CodecFamily::Hevc => Id::HEVC,
        }
    }

    /// Name of the equivalent FFmpeg bitstream filter.
    pub fn filter_name(self) -> &'static str {
        match self {
            CodecFamily::H264 => "h264_mp4toannexb",
            CodecFamily::Hevc => "hevc_mp4toannexb",
        }
    }

    /// Video format string handed to the decoder.
    pub fn video_format(self) -> &'static str {
        match self {
            CodecFamily::H264 => "h264",
            CodecFamily::Hevc => "h265",
        }
    }
}

/// Owned copy of a stream's codec parameters.
pub struct CodecParameters(Parameters);

// SAFETY: always built with `Parameters::clone`, which allocates a fresh
// AVCodecParameters with no owner shared with the demuxer context.
unsafe impl Send for CodecParameters {}
unsafe impl Sync for CodecParameters {}

impl CodecParameters {
    pub fn inner(&self) -> &Parameters {
        &self.0
    }
}

impl Clone for CodecParameters {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Elementary stream description exposed by the demuxer.
#[derive(Clone)]
pub struct AvStream {
    index: usize,
    kind: MediaKind,
    codec_id: Id,
    width: u32,
    height: u32,
    time_base: Rational,
    extradata: Bytes,
    parameters: Option<CodecParameters>,
}

impl AvStream {
    pub fn new(index: usize, kind: MediaKind, codec_id: Id) -> Self {
        Self {
            index,
            kind,
            codec_id,
            width: 0,
            height: 0,
            time_base: Rational::new(1, 90000),
            extradata: Bytes::new(),
            parameters: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_extradata(mut self, extradata: impl Into<Bytes>) -> Self {
        self.extradata = extradata.into();
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn codec_id(&self) -> Id {
        self.codec_id
    }

    pub fn codec_family(&self) -> Option<CodecFamily> {
        CodecFamily::from_codec_id(self.codec_id)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Codec configuration record (avcC/hvcC) or in-band Annex B headers.
    pub fn extradata(&self) -> &[u8] {
        &self.extradata
    }

    /// Present only for streams opened through FFmpeg.
    pub fn parameters(&self) -> Option<&CodecParameters> {
        self.parameters.as_ref()
    }
}

impl std::fmt::Debug for AvStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvStream")
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("codec_id", &self.codec_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("extradata_len", &self.extradata.len())
            .finish()
    }
}

/// Reads extradata from codec parameters via the raw AVCodecParameters pointer.
fn get_extradata(codec_params: &Parameters) -> Bytes {
    unsafe {
        let p = codec_params.as_ptr();
        let extradata_ptr = (*p).extradata;
        let size = (*p).extradata_size;
        if extradata_ptr.is_null() || size <= 0 {
            return Bytes::new();
        }
        Bytes::copy_from_slice(std::slice::from_raw_parts(extradata_ptr, size as usize))
    }
}

impl From<stream::Stream<'_>> for AvStream {
    fn from(stream: stream::Stream<'_>) -> Self {
        let parameters = stream.parameters().clone();
        let (width, height) = unsafe {
            let ptr = parameters.as_ptr();
            ((*ptr).width.max(0) as u32, (*ptr).height.max(0) as u32)
        };
        Self {
            index: stream.index(),
            kind: MediaKind::from(parameters.medium()),
            codec_id: parameters.id(),
            width,
            height,
            time_base: stream.time_base(),
            extradata: get_extradata(&parameters),
            parameters: Some(CodecParameters(parameters)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_family() {
        assert_eq!(CodecFamily::from_codec_id(Id::H264), Some(CodecFamily::H264));
        assert_eq!(CodecFamily::from_codec_id(Id::HEVC), Some(CodecFamily::Hevc));
        assert_eq!(CodecFamily::from_codec_id(Id::VP9), None);
        assert_eq!(CodecFamily::Hevc.filter_name(), "hevc_mp4toannexb");
        assert_eq!(CodecFamily::Hevc.video_format(), "h265");
    }

    #[test]
    fn test_stream_builder() {
        let stream = AvStream::new(1, MediaKind::Video, Id::H264)
            .with_size(1920, 1080)
            .with_extradata(vec![1, 2, 3]);
        assert!(stream.is_video());
        assert_eq!(stream.codec_family(), Some(CodecFamily::H264));
        assert_eq!(stream.extradata(), &[1, 2, 3]);
        assert!(stream.parameters().is_none());
    }
}
