//! Error taxonomy for the decode pipeline.

use thiserror::Error;

/// Errors raised while configuring or running a channel pipeline.
///
/// `Config` aborts startup. The source/stream/filter/accelerator variants are
/// fatal to one channel only. `InvalidOutputSize` and `PostProcess` are
/// per-frame: the frame is dropped and decoding continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid channel configuration: {0}")]
    Config(String),

    #[error("could not open source {address}: {reason}")]
    Open { address: String, reason: String },

    #[error("source {address} has no video stream")]
    NoVideoStream { address: String },

    #[error("unsupported codec {codec}, expected h264 or h265")]
    UnsupportedCodec { codec: String },

    #[error("bitstream filter init failed: {0}")]
    FilterInit(String),

    #[error("hardware decoder unavailable: {0}")]
    AcceleratorUnavailable(String),

    #[error("decoder submission failed: {0}")]
    DecoderSubmit(String),

    #[error("output size {0} is invalid, value range: 1~67108864")]
    InvalidOutputSize(u64),

    #[error("post-processing failed: {0}")]
    PostProcess(String),

    #[error("pipeline thread failed: {0}")]
    Thread(String),
}

impl Error {
    /// True for errors that terminate a single channel's pipeline.
    pub fn is_channel_fatal(&self) -> bool {
        matches!(
            self,
            Error::Open { .. }
                | Error::NoVideoStream { .. }
                | Error::UnsupportedCodec { .. }
                | Error::FilterInit(_)
                | Error::AcceleratorUnavailable(_)
                | Error::DecoderSubmit(_)
                | Error::Thread(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::NoVideoStream {
            address: "/video/a.mp4".to_string(),
        };
        assert_eq!(err.to_string(), "source /video/a.mp4 has no video stream");

        let err = Error::InvalidOutputSize(0);
        assert!(err.to_string().contains("1~67108864"));
    }

    #[test]
    fn test_channel_fatal() {
        assert!(Error::DecoderSubmit("x".into()).is_channel_fatal());
        assert!(Error::AcceleratorUnavailable("x".into()).is_channel_fatal());
        assert!(!Error::InvalidOutputSize(0).is_channel_fatal());
        assert!(!Error::PostProcess("x".into()).is_channel_fatal());
        assert!(!Error::Config("x".into()).is_channel_fatal());
    }
}
