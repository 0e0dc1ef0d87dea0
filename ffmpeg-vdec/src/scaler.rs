use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context, Flags};

/// Converts decoder output that is not already semi-planar into NV12.
pub struct Scaler {
    context: Context,
    format: Pixel,
    width: u32,
    height: u32,
}

impl Scaler {
    pub fn new(format: Pixel, width: u32, height: u32) -> anyhow::Result<Self> {
        let context = Context::get(format, width, height, Pixel::NV12, width, height, Flags::BILINEAR)?;
        Ok(Self {
            context,
            format,
            width,
            height,
        })
    }

    pub fn matches(&self, frame: &ffmpeg_next::frame::Video) -> bool {
        frame.format() == self.format && frame.width() == self.width && frame.height() == self.height
    }

    pub fn run(&mut self, frame: &ffmpeg_next::frame::Video) -> anyhow::Result<ffmpeg_next::frame::Video> {
        let mut dst = ffmpeg_next::frame::Video::empty();
        self.context.run(frame, &mut dst)?;
        dst.set_pts(frame.pts());
        Ok(dst)
    }
}

unsafe impl Send for Scaler {}

pub fn is_semi_planar(format: Pixel) -> bool {
    matches!(format, Pixel::NV12 | Pixel::NV21)
}

/// Returns `frame` unchanged when it is NV12/NV21, otherwise converts it,
/// rebuilding the cached scaler whenever the input geometry changes.
pub fn to_semi_planar(
    scaler: &mut Option<Scaler>,
    frame: ffmpeg_next::frame::Video,
) -> anyhow::Result<ffmpeg_next::frame::Video> {
    if is_semi_planar(frame.format()) {
        return Ok(frame);
    }
    let reuse = scaler.as_ref().is_some_and(|s| s.matches(&frame));
    if !reuse {
        log::debug!(
            "create scaler {:?} {}x{} -> nv12",
            frame.format(),
            frame.width(),
            frame.height()
        );
        *scaler = Some(Scaler::new(frame.format(), frame.width(), frame.height())?);
    }
    match scaler.as_mut() {
        Some(s) => s.run(&frame),
        None => anyhow::bail!("scaler unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_semi_planar() {
        assert!(is_semi_planar(Pixel::NV12));
        assert!(is_semi_planar(Pixel::NV21));
        assert!(!is_semi_planar(Pixel::YUV420P));
    }

    #[test]
    fn test_planar_converted_to_nv12() -> anyhow::Result<()> {
        crate::init()?;
        let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, 32, 16);
        frame.set_pts(Some(5));
        let mut scaler = None;
        let out = to_semi_planar(&mut scaler, frame)?;
        assert_eq!(out.format(), Pixel::NV12);
        assert_eq!(out.width(), 32);
        assert_eq!(out.pts(), Some(5));
        assert!(scaler.is_some());
        Ok(())
    }
}
