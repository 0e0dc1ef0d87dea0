use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::config::ChannelId;

/// Pixel layout of a processed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// 4:2:0 semi-planar, UV ordered (NV12).
    Yuv420Sp,
}

/// Per-image metadata carried downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// None only for the finished sentinel.
    pub channel: Option<ChannelId>,
    /// Source address of the channel.
    pub channel_name: String,
    pub frame_id: u32,
    pub is_finished: bool,
}

/// A post-processed frame, or the zero-pixel finished sentinel.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
    pub info: ImageInfo,
}

impl ProcessedImage {
    pub fn new(
        channel: ChannelId,
        channel_name: &str,
        frame_id: u32,
        width: u32,
        height: u32,
        data: Bytes,
    ) -> Self {
        Self {
            format: ImageFormat::Yuv420Sp,
            width,
            height,
            data,
            info: ImageInfo {
                channel: Some(channel),
                channel_name: channel_name.to_string(),
                frame_id,
                is_finished: false,
            },
        }
    }

    /// The end-of-run sentinel: no pixels, only the finished flag set.
    pub fn finished() -> Self {
        Self {
            format: ImageFormat::Yuv420Sp,
            width: 0,
            height: 0,
            data: Bytes::new(),
            info: ImageInfo {
                channel: None,
                channel_name: String::new(),
                frame_id: 0,
                is_finished: true,
            },
        }
    }

    pub fn is_finished(&self) -> bool {
        self.info.is_finished
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.info.channel
    }

    pub fn frame_id(&self) -> u32 {
        self.info.frame_id
    }
}

impl Display for ProcessedImage {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        if self.is_finished() {
            return write!(f, "ProcessedImage {{ finished }}");
        }
        write!(
            f,
            "ProcessedImage {{ channel: {}, frame_id: {}, {}x{}, size: {} }}",
            self.info
                .channel
                .map(ChannelId::name)
                .unwrap_or_default(),
            self.info.frame_id,
            self.width,
            self.height,
            self.size()
        )
    }
}
