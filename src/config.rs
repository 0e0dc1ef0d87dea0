use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use ffmpeg_vdec::config::{CHANNEL1_KEY, CHANNEL2_KEY};

pub const DEFAULT_SINK_CAPACITY: usize = 16;

/// Process settings read once from the environment.
pub struct AppConfig {
    channel1: Option<String>,
    channel2: Option<String>,
    output_dir: Option<PathBuf>,
    sink_capacity: usize,
}

impl AppConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let sink_capacity = lookup("VDEC_SINK_CAPACITY")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_SINK_CAPACITY);
        Self {
            channel1: lookup("VDEC_CHANNEL1"),
            channel2: lookup("VDEC_CHANNEL2"),
            output_dir: lookup("VDEC_OUTPUT_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            sink_capacity,
        }
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    pub fn sink_capacity(&self) -> usize {
        self.sink_capacity
    }
}

pub fn config() -> &'static AppConfig {
    static CONFIG: LazyLock<AppConfig> =
        LazyLock::new(|| AppConfig::from_lookup(|key| std::env::var(key).ok()));
    &CONFIG
}

/// Maps `key=value` arguments to decoder options. Channels missing from the
/// arguments fall back to the environment.
pub fn channel_options(
    args: impl IntoIterator<Item = String>,
    config: &AppConfig,
) -> anyhow::Result<HashMap<String, String>> {
    let mut options = HashMap::new();
    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            anyhow::bail!("invalid argument {:?}, expected key=value", arg);
        };
        options.insert(key.trim().to_string(), value.to_string());
    }

    for (key, fallback) in [(CHANNEL1_KEY, &config.channel1), (CHANNEL2_KEY, &config.channel2)] {
        if let Some(value) = fallback {
            options
                .entry(key.to_string())
                .or_insert_with(|| value.clone());
        }
    }
    Ok(options)
}
