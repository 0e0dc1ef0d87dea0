//! Downstream consumer of finished images: one JSON line per image, and
//! optionally the raw NV12 pixels on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ffmpeg_vdec::image::ProcessedImage;
use serde::Serialize;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
pub struct ImageRecord {
    pub channel: Option<String>,
    pub channel_name: String,
    pub frame_id: u32,
    pub width: u32,
    pub height: u32,
    pub size: usize,
    pub finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl From<&ProcessedImage> for ImageRecord {
    fn from(image: &ProcessedImage) -> Self {
        Self {
            channel: image.channel().map(|c| c.to_string()),
            channel_name: image.info.channel_name.clone(),
            frame_id: image.frame_id(),
            width: image.width,
            height: image.height,
            size: image.size(),
            finished: image.is_finished(),
            file: None,
        }
    }
}

pub fn file_name(image: &ProcessedImage) -> String {
    let channel = image
        .channel()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "finished".to_string());
    format!("{}_{}.nv12", channel, image.frame_id())
}

async fn write_image(dir: &Path, image: &ProcessedImage) -> anyhow::Result<PathBuf> {
    let path = dir.join(file_name(image));
    tokio::fs::write(&path, &image.data).await?;
    Ok(path)
}

/// Consumes images until the finished sentinel arrives, the channel closes
/// or `cancel` fires. Returns the number of real images handled.
pub async fn consume(
    mut rx: Receiver<Arc<ProcessedImage>>,
    output_dir: Option<PathBuf>,
    cancel: CancellationToken,
) -> anyhow::Result<u64> {
    if let Some(dir) = &output_dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    let mut handled = 0;
    loop {
        let image = tokio::select! {
            _ = cancel.cancelled() => break,
            image = rx.recv() => match image {
                Some(image) => image,
                None => {
                    log::warn!("image channel closed before finished");
                    break;
                }
            },
        };

        let mut record = ImageRecord::from(image.as_ref());
        if image.is_finished() {
            println!("{}", serde_json::to_string(&record)?);
            break;
        }

        if let Some(dir) = &output_dir {
            match write_image(dir, &image).await {
                Ok(path) => record.file = Some(path.display().to_string()),
                Err(e) => log::error!("write {} failed: {}", image, e),
            }
        }
        println!("{}", serde_json::to_string(&record)?);
        handled += 1;
    }
    Ok(handled)
}
