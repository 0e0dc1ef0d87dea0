use std::fmt::{Display, Formatter};

use bytes::Bytes;

/// Source format tag of UV-ordered semi-planar frames.
pub const FORMAT_NV12: &str = "nv12";
/// Source format tag of VU-ordered semi-planar frames.
pub const FORMAT_NV21: &str = "nv21";

/// Chroma byte order of a 4:2:0 semi-planar frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaOrder {
    Uv,
    Vu,
}

impl ChromaOrder {
    /// `nv12` selects UV ordering, any other tag VU ordering.
    pub fn from_format_tag(tag: &str) -> Self {
        if tag == FORMAT_NV12 {
            ChromaOrder::Uv
        } else {
            ChromaOrder::Vu
        }
    }
}

/// A decoded 4:2:0 semi-planar frame handed to the decode callback.
///
/// The callback owns the frame; dropping it releases the decoder's buffer.
#[derive(Debug, Clone)]
pub struct RawDecodedFrame {
    width: u32,
    height: u32,
    format_tag: String,
    luma: Bytes,
    luma_stride: usize,
    chroma: Bytes,
    chroma_stride: usize,
    pts: Option<i64>,
}

impl RawDecodedFrame {
    pub fn new(
        width: u32,
        height: u32,
        format_tag: impl Into<String>,
        luma: Bytes,
        luma_stride: usize,
        chroma: Bytes,
        chroma_stride: usize,
    ) -> Self {
        Self {
            width,
            height,
            format_tag: format_tag.into(),
            luma,
            luma_stride,
            chroma,
            chroma_stride,
            pts: None,
        }
    }

    /// Tightly packed NV12 frame with every byte set to `fill`.
    pub fn filled_nv12(width: u32, height: u32, fill: u8) -> Self {
        let w = width as usize;
        let h = height as usize;
        let chroma_rows = h.div_ceil(2);
        let chroma_stride = w.div_ceil(2) * 2;
        Self::new(
            width,
            height,
            FORMAT_NV12,
            Bytes::from(vec![fill; w * h]),
            w,
            Bytes::from(vec![fill; chroma_stride * chroma_rows]),
            chroma_stride,
        )
    }

    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.pts = pts;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format_tag(&self) -> &str {
        &self.format_tag
    }

    pub fn chroma_order(&self) -> ChromaOrder {
        ChromaOrder::from_format_tag(&self.format_tag)
    }

    pub fn luma(&self) -> &[u8] {
        &self.luma
    }

    pub fn luma_stride(&self) -> usize {
        self.luma_stride
    }

    pub fn chroma(&self) -> &[u8] {
        &self.chroma
    }

    pub fn chroma_stride(&self) -> usize {
        self.chroma_stride
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    /// Checks that both planes hold every row the dimensions require.
    pub fn validate(&self) -> anyhow::Result<()> {
        let w = self.width as usize;
        let h = self.height as usize;
        if w == 0 || h == 0 {
            anyhow::bail!("invalid frame size {}x{}", w, h);
        }
        let chroma_width = w.div_ceil(2) * 2;
        let chroma_rows = h.div_ceil(2);
        if self.luma_stride < w || self.luma.len() < self.luma_stride * (h - 1) + w {
            anyhow::bail!(
                "luma plane too small: {} bytes, stride {}",
                self.luma.len(),
                self.luma_stride
            );
        }
        if self.chroma_stride < chroma_width
            || self.chroma.len() < self.chroma_stride * (chroma_rows - 1) + chroma_width
        {
            anyhow::bail!(
                "chroma plane too small: {} bytes, stride {}",
                self.chroma.len(),
                self.chroma_stride
            );
        }
        Ok(())
    }
}

impl Display for RawDecodedFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "RawDecodedFrame {}x{} {} pts: {:?}",
            self.width, self.height, self.format_tag, self.pts
        )
    }
}

impl TryFrom<&ffmpeg_next::frame::Video> for RawDecodedFrame {
    type Error = anyhow::Error;

    /// Copies an NV12/NV21 FFmpeg frame out of decoder-owned memory.
    fn try_from(frame: &ffmpeg_next::frame::Video) -> Result<Self, Self::Error> {
        use ffmpeg_next::format::Pixel;

        let tag = match frame.format() {
            Pixel::NV12 => FORMAT_NV12,
            Pixel::NV21 => FORMAT_NV21,
            other => anyhow::bail!("frame is not semi-planar: {:?}", other),
        };
        Ok(Self::new(
            frame.width(),
            frame.height(),
            tag,
            Bytes::copy_from_slice(frame.data(0)),
            frame.stride(0),
            Bytes::copy_from_slice(frame.data(1)),
            frame.stride(1),
        )
        .with_pts(frame.pts()))
    }
}
