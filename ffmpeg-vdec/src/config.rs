//! Channel source configuration and address validation.
//!
//! A source is either an absolute `.mp4` path or an RTSP address of the form
//! `rtsp://<ipv4>:<port>/<name>`. Validation performs no I/O.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Option key carrying channel A's source address.
pub const CHANNEL1_KEY: &str = "channel1";
/// Option key carrying channel B's source address.
pub const CHANNEL2_KEY: &str = "channel2";

static RTSP_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^rtsp://(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3}):(\d{1,5})/(.{1,100})$")
        .expect("rtsp address pattern")
});

static MP4_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/.*\.mp4$").expect("mp4 file pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    A,
    B,
}

impl ChannelId {
    pub const ALL: [ChannelId; 2] = [ChannelId::A, ChannelId::B];

    /// Numeric id handed to the hardware decoder (A = 1, B = 2).
    pub fn number(self) -> u32 {
        match self {
            ChannelId::A => 1,
            ChannelId::B => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChannelId::A => CHANNEL1_KEY,
            ChannelId::B => CHANNEL2_KEY,
        }
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Network,
}

/// A trimmed, validated source address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAddress {
    value: String,
    kind: SourceKind,
}

impl SourceAddress {
    pub fn parse(raw: &str) -> Result<Self> {
        let value = trim_source(raw);
        if value.is_empty() {
            return Err(Error::Config("source address is empty".to_string()));
        }
        if is_valid_rtsp(value) {
            Ok(Self {
                value: value.to_string(),
                kind: SourceKind::Network,
            })
        } else if is_valid_mp4_file(value) {
            Ok(Self {
                value: value.to_string(),
                kind: SourceKind::File,
            })
        } else {
            Err(Error::Config(format!(
                "invalid mp4 file name or rtsp address: {}",
                value
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn is_network(&self) -> bool {
        self.kind == SourceKind::Network
    }
}

impl Display for SourceAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

/// Validated sources for the two logical channels. At least one is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    channel_a: Option<SourceAddress>,
    channel_b: Option<SourceAddress>,
}

impl ChannelConfig {
    pub fn new(channel_a: Option<&str>, channel_b: Option<&str>) -> Result<Self> {
        let channel_a = non_empty(channel_a);
        let channel_b = non_empty(channel_b);
        if channel_a.is_none() && channel_b.is_none() {
            return Err(Error::Config(
                "both channel1 and channel2 are empty".to_string(),
            ));
        }

        let parse = |id: ChannelId, raw: Option<&str>| -> Result<Option<SourceAddress>> {
            match raw {
                Some(raw) => {
                    let address = SourceAddress::parse(raw).map_err(|e| match e {
                        Error::Config(msg) => Error::Config(format!("{}: {}", id, msg)),
                        other => other,
                    })?;
                    log::info!("{} source: {}", id, address);
                    Ok(Some(address))
                }
                None => {
                    log::info!("{} is empty or all spaces", id);
                    Ok(None)
                }
            }
        };

        Ok(Self {
            channel_a: parse(ChannelId::A, channel_a)?,
            channel_b: parse(ChannelId::B, channel_b)?,
        })
    }

    /// Builds the configuration from named string options (`channel1`, `channel2`).
    /// Unknown keys are ignored.
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self> {
        Self::new(
            options.get(CHANNEL1_KEY).map(String::as_str),
            options.get(CHANNEL2_KEY).map(String::as_str),
        )
    }

    pub fn source(&self, channel: ChannelId) -> Option<&SourceAddress> {
        match channel {
            ChannelId::A => self.channel_a.as_ref(),
            ChannelId::B => self.channel_b.as_ref(),
        }
    }

    /// Configured channels in channel order.
    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &SourceAddress)> {
        ChannelId::ALL
            .into_iter()
            .filter_map(|id| self.source(id).map(|address| (id, address)))
    }

    pub fn channel_count(&self) -> usize {
        self.channels().count()
    }
}

fn trim_source(raw: &str) -> &str {
    raw.trim_matches(|c: char| c.is_whitespace() || c.is_control())
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.filter(|value| !trim_source(value).is_empty())
}

pub fn is_valid_mp4_file(value: &str) -> bool {
    MP4_FILE.is_match(value) && !value.split('/').any(|segment| segment == "..")
}

pub fn is_valid_rtsp(value: &str) -> bool {
    let Some(caps) = RTSP_ADDRESS.captures(value) else {
        return false;
    };
    let octets_ok = (1..=4).all(|i| caps.get(i).is_some_and(|m| is_octet(m.as_str())));
    let port_ok = caps.get(5).is_some_and(|m| is_port(m.as_str()));
    octets_ok && port_ok
}

fn is_octet(value: &str) -> bool {
    if value.len() > 1 && value.starts_with('0') {
        return false;
    }
    value.parse::<u16>().is_ok_and(|v| v <= 255)
}

fn is_port(value: &str) -> bool {
    if value.starts_with('0') {
        return false;
    }
    value.parse::<u32>().is_ok_and(|v| (1..=65535).contains(&v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_file_and_rtsp() {
        let address = SourceAddress::parse("/video/test.mp4").unwrap();
        assert_eq!(address.kind(), SourceKind::File);

        let address = SourceAddress::parse("rtsp://10.0.0.1:5540/cam1").unwrap();
        assert_eq!(address.kind(), SourceKind::Network);
        assert!(address.is_network());
    }

    #[test]
    fn test_rejects_parent_segment() {
        assert!(SourceAddress::parse("/etc/../video.mp4").is_err());
        assert!(SourceAddress::parse("/../video.mp4").is_err());
        assert!(SourceAddress::parse("/video/..").is_err());
        // ".." inside a file name is not a path segment
        assert!(SourceAddress::parse("/video/a..b.mp4").is_ok());
    }

    #[test]
    fn test_rejects_bad_files() {
        for raw in [
            "video/test.mp4",
            "/video/test.avi",
            "/video/test.MP4",
            "/video/test.mp4.bak",
            "file:///video/test.mp4",
        ] {
            assert!(SourceAddress::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_rtsp_grammar() {
        assert!(is_valid_rtsp("rtsp://0.0.0.0:1/a"));
        assert!(is_valid_rtsp("rtsp://255.255.255.255:65535/a"));
        assert!(is_valid_rtsp(&format!("rtsp://192.168.1.2:554/{}", "n".repeat(100))));

        assert!(!is_valid_rtsp(&format!("rtsp://192.168.1.2:554/{}", "n".repeat(101))));
        assert!(!is_valid_rtsp("rtsp://256.0.0.1:554/a"));
        assert!(!is_valid_rtsp("rtsp://01.0.0.1:554/a"));
        assert!(!is_valid_rtsp("rtsp://10.0.0.1:0/a"));
        assert!(!is_valid_rtsp("rtsp://10.0.0.1:65536/a"));
        assert!(!is_valid_rtsp("rtsp://10.0.0.1:0554/a"));
        assert!(!is_valid_rtsp("rtsp://10.0.0.1:554/"));
        assert!(!is_valid_rtsp("rtsp://10.0.0.1/a"));
        assert!(!is_valid_rtsp("rtsp://camera.local:554/a"));
        assert!(!is_valid_rtsp("http://10.0.0.1:554/a"));
    }

    #[test]
    fn test_trims_whitespace_and_controls() {
        let address = SourceAddress::parse(" \t/video/test.mp4\r\n").unwrap();
        assert_eq!(address.as_str(), "/video/test.mp4");

        let config = ChannelConfig::new(Some("  rtsp://10.0.0.1:5540/cam1\n"), None).unwrap();
        assert_eq!(
            config.source(ChannelId::A).map(SourceAddress::as_str),
            Some("rtsp://10.0.0.1:5540/cam1")
        );
        assert!(config.source(ChannelId::B).is_none());
    }

    #[test]
    fn test_both_empty_fails() {
        assert!(matches!(ChannelConfig::new(None, None), Err(Error::Config(_))));
        assert!(matches!(
            ChannelConfig::new(Some("   "), Some("\t\n")),
            Err(Error::Config(_))
        ));
        assert!(matches!(ChannelConfig::new(Some(""), None), Err(Error::Config(_))));
    }

    #[test]
    fn test_one_invalid_channel_fails() {
        let err = ChannelConfig::new(Some("/video/a.mp4"), Some("/etc/../b.mp4")).unwrap_err();
        match err {
            Error::Config(msg) => assert!(msg.starts_with("channel2")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_options() {
        let mut options = HashMap::new();
        options.insert(CHANNEL2_KEY.to_string(), "/video/b.mp4".to_string());
        options.insert("unrelated".to_string(), "value".to_string());

        let config = ChannelConfig::from_options(&options).unwrap();
        let channels: Vec<_> = config.channels().map(|(id, _)| id).collect();
        assert_eq!(channels, vec![ChannelId::B]);
        assert_eq!(config.channel_count(), 1);

        options.insert(CHANNEL1_KEY.to_string(), "/video/a.mp4".to_string());
        let config = ChannelConfig::from_options(&options).unwrap();
        assert_eq!(config.channel_count(), 2);
    }

    #[test]
    fn test_channel_numbers() {
        assert_eq!(ChannelId::A.number(), 1);
        assert_eq!(ChannelId::B.number(), 2);
        assert_eq!(ChannelId::B.to_string(), "channel2");
    }
}
