/// Registers FFmpeg components and sets FFmpeg's own log level. Call once at
/// startup before opening any source.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))?;
    ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Info);
    Ok(())
}

pub mod backend;
pub mod bsf;
pub mod callback;
pub mod config;
pub mod error;
pub mod frame;
pub mod hw;
pub mod image;
pub mod input;
pub mod keyframe;
pub mod orchestrator;
pub mod packet;
pub mod pipeline;
pub mod policy;
pub mod postprocess;
pub mod queue;
pub mod scaler;
pub mod sink;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
