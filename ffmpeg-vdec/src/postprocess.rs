//! Crop/align post-processing of decoded frames.
//!
//! Output is UV-ordered 4:2:0 semi-planar with a 128-byte width stride and a
//! 16-row height stride.

use crate::error::{Error, Result};
use crate::frame::{ChromaOrder, RawDecodedFrame};

pub const WIDTH_ALIGN: u32 = 128;
pub const HEIGHT_ALIGN: u32 = 16;
/// 64 MiB
pub const MAX_OUTPUT_SIZE: u64 = 64 * 1024 * 1024;

pub fn align_up(value: u32, align: u32) -> u64 {
    let align = u64::from(align.max(1));
    u64::from(value).div_ceil(align) * align
}

/// `align(width,128) * align(height,16) * 3 / 2`
pub fn aligned_output_size(width: u32, height: u32) -> u64 {
    align_up(width, WIDTH_ALIGN) * align_up(height, HEIGHT_ALIGN) * 3 / 2
}

/// Inclusive crop offsets. Right and down must be odd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropArea {
    pub left: u32,
    pub right: u32,
    pub up: u32,
    pub down: u32,
}

impl CropArea {
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            right: odd_offset(width),
            up: 0,
            down: odd_offset(height),
        }
    }
}

fn odd_offset(extent: u32) -> u32 {
    if extent % 2 == 0 {
        extent.saturating_sub(1)
    } else {
        extent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputGeometry {
    pub width_stride: u32,
    pub height_stride: u32,
    pub size: u64,
}

impl OutputGeometry {
    pub fn for_frame(width: u32, height: u32) -> Result<Self> {
        let size = aligned_output_size(width, height);
        if size == 0 || size > MAX_OUTPUT_SIZE {
            return Err(Error::InvalidOutputSize(size));
        }
        Ok(Self {
            width_stride: align_up(width, WIDTH_ALIGN) as u32,
            height_stride: align_up(height, HEIGHT_ALIGN) as u32,
            size,
        })
    }
}

/// Input descriptor handed to the post-process collaborator.
#[derive(Debug, Clone, Copy)]
pub struct ProcessRequest<'a> {
    pub frame: &'a RawDecodedFrame,
    pub input_order: ChromaOrder,
    pub crop: CropArea,
    pub output: OutputGeometry,
}

impl<'a> ProcessRequest<'a> {
    pub fn new(frame: &'a RawDecodedFrame, output: OutputGeometry) -> Self {
        Self {
            frame,
            input_order: frame.chroma_order(),
            crop: CropArea::full_frame(frame.width(), frame.height()),
            output,
        }
    }
}

/// Collaborator-owned output memory. Released on drop.
pub trait OutputBuffer: Send {
    fn as_bytes(&self) -> &[u8];
}

pub struct AlignedBuffer(Vec<u8>);

impl OutputBuffer for AlignedBuffer {
    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

pub trait PostProcessor: Send + Sync {
    fn process(&self, request: &ProcessRequest<'_>) -> anyhow::Result<Box<dyn OutputBuffer>>;
}

/// Software post-processor: copies the cropped planes into an aligned
/// NV12 layout, swapping chroma bytes for VU input.
#[derive(Debug, Default, Clone, Copy)]
pub struct SemiPlanarAligner;

impl PostProcessor for SemiPlanarAligner {
    fn process(&self, request: &ProcessRequest<'_>) -> anyhow::Result<Box<dyn OutputBuffer>> {
        let frame = request.frame;
        frame.validate()?;

        let crop = request.crop;
        let out = request.output;
        // offsets are inclusive, clamp to the real picture
        let width = (crop.right.min(frame.width() - 1) + 1 - crop.left.min(frame.width())) as usize;
        let height = (crop.down.min(frame.height() - 1) + 1 - crop.up.min(frame.height())) as usize;
        let left = crop.left as usize;
        let up = crop.up as usize;

        let ws = out.width_stride as usize;
        let hs = out.height_stride as usize;
        if width > ws || height > hs || (ws * hs * 3 / 2) as u64 != out.size {
            anyhow::bail!(
                "output geometry {}x{} size {} does not fit {}x{}",
                ws,
                hs,
                out.size,
                width,
                height
            );
        }

        let mut buffer = vec![0u8; out.size as usize];
        let (luma_out, chroma_out) = buffer.split_at_mut(ws * hs);

        let luma = frame.luma();
        let luma_stride = frame.luma_stride();
        for row in 0..height {
            let src = (up + row) * luma_stride + left;
            luma_out[row * ws..row * ws + width].copy_from_slice(&luma[src..src + width]);
        }

        let chroma = frame.chroma();
        let chroma_stride = frame.chroma_stride();
        let chroma_width = width.div_ceil(2) * 2;
        let chroma_left = left / 2 * 2;
        for row in 0..height.div_ceil(2) {
            let src = (up / 2 + row) * chroma_stride + chroma_left;
            let dst = &mut chroma_out[row * ws..row * ws + chroma_width];
            dst.copy_from_slice(&chroma[src..src + chroma_width]);
            if request.input_order == ChromaOrder::Vu {
                for pair in dst.chunks_exact_mut(2) {
                    pair.swap(0, 1);
                }
            }
        }

        Ok(Box::new(AlignedBuffer(buffer)))
    }
}
