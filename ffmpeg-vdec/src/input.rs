use std::path::Path;
use std::sync::Once;

use ffmpeg_next::Dictionary;

use crate::{config::SourceAddress, packet::AccessUnit, stream::AvStream};

/// Demuxer options applied to every network source.
pub const NETWORK_OPTIONS: &[(&str, &str)] = &[
    ("rtsp_transport", "udp"),
    // 100MB
    ("buffer_size", "104857600"),
    // 100s
    ("max_delay", "100000000"),
    // socket timeout, 5s
    ("timeout", "5000000"),
    ("reorder_queue_size", "0"),
    // 10MB
    ("pkt_size", "10485760"),
];

/// Opened media source yielding compressed access units.
pub trait Demuxer: Send {
    fn streams(&self) -> &[AvStream];

    /// Next demuxed unit, `Ok(None)` at end of stream.
    fn read_access_unit(&mut self) -> anyhow::Result<Option<AccessUnit>>;

    /// First video-typed stream.
    fn video_stream(&self) -> Option<&AvStream> {
        self.streams().iter().find(|stream| stream.is_video())
    }
}

pub fn network_options() -> Dictionary<'static> {
    let mut options = Dictionary::new();
    for (key, value) in NETWORK_OPTIONS {
        options.set(key, value);
    }
    options
}

fn init_network() {
    static NETWORK: Once = Once::new();
    NETWORK.call_once(|| {
        ffmpeg_next::format::network::init();
    });
}

/// FFmpeg-backed demuxer for mp4 files and RTSP streams.
pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    streams: Vec<AvStream>,
}

// The input context is only ever used by the thread that owns the AvInput.
unsafe impl Send for AvInput {}

impl AvInput {
    pub fn open(address: &SourceAddress) -> anyhow::Result<Self> {
        let path = Path::new(address.as_str());
        let input = if address.is_network() {
            init_network();
            log::info!("set network parameters for {}", address);
            ffmpeg_next::format::input_with_dictionary(path, network_options())?
        } else {
            ffmpeg_next::format::input(path)?
        };

        let streams = input.streams().map(AvStream::from).collect();
        Ok(Self {
            inner: input,
            streams,
        })
    }
}

impl Demuxer for AvInput {
    fn streams(&self) -> &[AvStream] {
        &self.streams
    }

    fn read_access_unit(&mut self) -> anyhow::Result<Option<AccessUnit>> {
        let mut packet = ffmpeg_next::Packet::empty();
        match packet.read(&mut self.inner) {
            Ok(()) => Ok(Some(AccessUnit::from(&packet))),
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
