//! In-memory collaborators for pipeline and orchestrator tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::mpsc::{self, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use ffmpeg_next::codec::Id;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::{Dictionary, Rational};

use crate::{
    backend::Backend,
    bsf::{AnnexBFilter, BitstreamFilter},
    config::{ChannelId, SourceAddress},
    frame::RawDecodedFrame,
    hw::{CallbackBinding, HwDecoder},
    image::ProcessedImage,
    input::Demuxer,
    packet::AccessUnit,
    postprocess::{PostProcessor, SemiPlanarAligner},
    sink::{ImageSink, SinkError},
    stream::{AvStream, MediaKind},
};

pub(crate) const AUDIO_INDEX: usize = 0;
pub(crate) const VIDEO_INDEX: usize = 1;

pub(crate) const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1e];
pub(crate) const PPS: &[u8] = &[0x68, 0xce, 0x38, 0x80];

/// AVCDecoderConfigurationRecord with 4-byte NAL lengths, one SPS and one PPS.
pub(crate) fn avcc_record() -> Vec<u8> {
    let mut record = vec![0x01, 0x42, 0x00, 0x1e, 0xff, 0xe1];
    record.extend_from_slice(&(SPS.len() as u16).to_be_bytes());
    record.extend_from_slice(SPS);
    record.push(0x01);
    record.extend_from_slice(&(PPS.len() as u16).to_be_bytes());
    record.extend_from_slice(PPS);
    record
}

/// Behaviour of one fake source.
#[derive(Debug, Clone)]
pub(crate) struct SourceScript {
    pub codec: Id,
    pub has_video: bool,
    pub video_units: usize,
    pub extradata: Vec<u8>,
    /// Opens allowed before every further open fails.
    pub opens_allowed: Option<usize>,
    pub fail_decoder_create: bool,
    /// 1-based decoder submission that fails.
    pub fail_submit_at: Option<usize>,
    /// 1-based demuxer read that fails; later reads are never made.
    pub fail_read_at: Option<usize>,
    /// Video units carry 4-byte NAL lengths instead of start codes.
    pub length_prefixed: bool,
}

impl SourceScript {
    pub fn h264(video_units: usize) -> Self {
        Self {
            codec: Id::H264,
            has_video: true,
            video_units,
            extradata: Vec::new(),
            opens_allowed: None,
            fail_decoder_create: false,
            fail_submit_at: None,
            fail_read_at: None,
            length_prefixed: false,
        }
    }

    /// mp4-style source: avcC record and length-prefixed video units.
    pub fn h264_avcc(video_units: usize) -> Self {
        Self {
            extradata: avcc_record(),
            length_prefixed: true,
            ..Self::h264(video_units)
        }
    }

    fn streams(&self) -> Vec<AvStream> {
        let mut streams = vec![AvStream::new(AUDIO_INDEX, MediaKind::Audio, Id::AAC)];
        if self.has_video {
            streams.push(
                AvStream::new(VIDEO_INDEX, MediaKind::Video, self.codec)
                    .with_size(64, 32)
                    .with_extradata(self.extradata.clone()),
            );
        }
        streams
    }

    /// Audio and video units interleaved, the first video unit is a key unit.
    fn units(&self) -> VecDeque<AccessUnit> {
        let mut units = VecDeque::new();
        for i in 0..self.video_units {
            units.push_back(AccessUnit::new(AUDIO_INDEX, vec![0xff; 4]));
            let header: [u8; 4] = if self.length_prefixed {
                [0, 0, 0, 2]
            } else {
                [0, 0, 0, 1]
            };
            let mut data = header.to_vec();
            data.extend_from_slice(&[0x65, i as u8]);
            units.push_back(
                AccessUnit::new(VIDEO_INDEX, data)
                    .with_timestamps(Some(i as i64), Some(i as i64))
                    .with_key(i == 0),
            );
        }
        units
    }
}

pub(crate) struct ScriptedDemuxer {
    streams: Vec<AvStream>,
    units: VecDeque<AccessUnit>,
    reads: usize,
    fail_read_at: Option<usize>,
}

impl Demuxer for ScriptedDemuxer {
    fn streams(&self) -> &[AvStream] {
        &self.streams
    }

    fn read_access_unit(&mut self) -> anyhow::Result<Option<AccessUnit>> {
        self.reads += 1;
        if self.fail_read_at.is_some_and(|at| self.reads >= at) {
            anyhow::bail!("Input/output error");
        }
        Ok(self.units.pop_front())
    }
}

pub(crate) struct FakeBackend {
    scripts: HashMap<String, SourceScript>,
    opens: Mutex<HashMap<String, usize>>,
    decoded: Arc<Mutex<Vec<AccessUnit>>>,
    post_processor: Arc<dyn PostProcessor>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            opens: Mutex::new(HashMap::new()),
            decoded: Arc::new(Mutex::new(Vec::new())),
            post_processor: Arc::new(SemiPlanarAligner),
        }
    }

    /// Sources without explicit extradata get a distinct start-code record
    /// so decoders can be matched back to their script.
    pub fn with_source(mut self, address: &str, mut script: SourceScript) -> Self {
        if script.extradata.is_empty() {
            script.extradata = vec![0, 0, 0, 1, self.scripts.len() as u8 + 1];
        }
        self.scripts.insert(address.to_string(), script);
        self
    }

    pub fn open_count(&self, address: &str) -> usize {
        self.opens
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    /// Units handed to any decoder, in submission order.
    pub fn decoded_units(&self) -> Vec<AccessUnit> {
        self.decoded.lock().unwrap().clone()
    }

    fn script_for(&self, address: &str) -> anyhow::Result<&SourceScript> {
        self.scripts
            .get(address)
            .ok_or_else(|| anyhow::anyhow!("No such file or directory"))
    }
}

impl Backend for FakeBackend {
    fn open(&self, address: &SourceAddress) -> anyhow::Result<Box<dyn Demuxer>> {
        let script = self.script_for(address.as_str())?;
        let opened = {
            let mut opens = self.opens.lock().unwrap();
            let count = opens.entry(address.to_string()).or_default();
            *count += 1;
            *count
        };
        if script.opens_allowed.is_some_and(|allowed| opened > allowed) {
            anyhow::bail!("Connection refused");
        }
        Ok(Box::new(ScriptedDemuxer {
            streams: script.streams(),
            units: script.units(),
            reads: 0,
            fail_read_at: script.fail_read_at,
        }))
    }

    fn bitstream_filter(
        &self,
        family: crate::stream::CodecFamily,
        stream: &AvStream,
    ) -> anyhow::Result<Box<dyn BitstreamFilter>> {
        let mut filter = AnnexBFilter::new(family);
        filter.init(stream.extradata())?;
        Ok(Box::new(filter))
    }

    fn create_decoder(
        &self,
        stream: &AvStream,
        binding: CallbackBinding,
    ) -> anyhow::Result<Box<dyn HwDecoder>> {
        let script = self
            .scripts
            .values()
            .find(|s| s.extradata == stream.extradata())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no script for stream"))?;
        if script.fail_decoder_create {
            anyhow::bail!("no decoder resources left");
        }
        Ok(Box::new(FakeDecoder::spawn(
            binding,
            script.fail_submit_at,
            Arc::clone(&self.decoded),
        )))
    }

    fn post_processor(&self) -> Arc<dyn PostProcessor> {
        Arc::clone(&self.post_processor)
    }
}

/// Delivers one 64x32 NV12 frame per unit from its own thread, filled with
/// the unit's last byte.
pub(crate) struct FakeDecoder {
    tx: Option<Sender<(AccessUnit, SyncSender<()>)>>,
    worker: Option<JoinHandle<()>>,
    submitted: usize,
    fail_submit_at: Option<usize>,
}

impl FakeDecoder {
    fn spawn(
        binding: CallbackBinding,
        fail_submit_at: Option<usize>,
        decoded: Arc<Mutex<Vec<AccessUnit>>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<(AccessUnit, SyncSender<()>)>();
        let worker = std::thread::spawn(move || {
            while let Ok((unit, ack)) = rx.recv() {
                decoded.lock().unwrap().push(unit.clone());
                let fill = unit.data().last().copied().unwrap_or_default();
                let frame = RawDecodedFrame::filled_nv12(64, 32, fill);
                binding.deliver(Some(frame.with_pts(unit.pts())));
                let _ = ack.send(());
            }
        });
        Self {
            tx: Some(tx),
            worker: Some(worker),
            submitted: 0,
            fail_submit_at,
        }
    }
}

impl HwDecoder for FakeDecoder {
    fn submit(&mut self, unit: AccessUnit) -> anyhow::Result<()> {
        self.submitted += 1;
        if self.fail_submit_at == Some(self.submitted) {
            anyhow::bail!("vdec rejected unit {}", self.submitted);
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("decoder destroyed"))?;
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        tx.send((unit, ack_tx))
            .map_err(|_| anyhow::anyhow!("decoder worker stopped"))?;
        ack_rx.recv()?;
        Ok(())
    }

    fn destroy(&mut self) -> anyhow::Result<()> {
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Ok(())
    }
}

/// Records everything submitted; answers `QueueFull` for the first
/// `full_responses` submissions, or `Other` for every image when rejecting.
pub(crate) struct RecordingSink {
    rejecting: bool,
    full_responses: Mutex<u32>,
    attempts: Mutex<u32>,
    images: Mutex<Vec<Arc<ProcessedImage>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::with_full_responses(0)
    }

    pub fn with_full_responses(full_responses: u32) -> Self {
        Self {
            rejecting: false,
            full_responses: Mutex::new(full_responses),
            attempts: Mutex::new(0),
            images: Mutex::new(Vec::new()),
        }
    }

    /// Refuses every image except the finished sentinel.
    pub fn rejecting() -> Self {
        Self {
            rejecting: true,
            ..Self::new()
        }
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }

    pub fn images(&self) -> Vec<Arc<ProcessedImage>> {
        self.images.lock().unwrap().clone()
    }

    pub fn frame_ids(&self, channel: ChannelId) -> Vec<u32> {
        self.images()
            .iter()
            .filter(|image| image.channel() == Some(channel))
            .map(|image| image.frame_id())
            .collect()
    }

    pub fn finished_count(&self) -> usize {
        self.images()
            .iter()
            .filter(|image| image.is_finished())
            .count()
    }
}

impl ImageSink for RecordingSink {
    fn submit(
        &self,
        _port: u32,
        _type_tag: &str,
        image: Arc<ProcessedImage>,
    ) -> Result<(), SinkError> {
        *self.attempts.lock().unwrap() += 1;
        let mut full = self.full_responses.lock().unwrap();
        if *full > 0 {
            *full -= 1;
            return Err(SinkError::QueueFull);
        }
        if self.rejecting && !image.is_finished() {
            return Err(SinkError::Other("consumer closed".to_string()));
        }
        self.images.lock().unwrap().push(image);
        Ok(())
    }
}

/// Encodes `frames` 64x64 frames at 10 fps into an H.264 mp4 at `path`.
/// Returns false when no software H.264 encoder is built in.
pub(crate) fn write_h264_mp4(path: &Path, frames: usize) -> anyhow::Result<bool> {
    let Some(codec) = ["libx264", "libopenh264"]
        .iter()
        .find_map(|name| ffmpeg_next::encoder::find_by_name(name))
    else {
        return Ok(false);
    };
    let time_base = Rational::new(1, 10);

    let mut output = ffmpeg_next::format::output(path)?;
    let global_header = output
        .format()
        .flags()
        .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);

    let mut ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
    if global_header {
        ctx.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
    }
    let mut encoder = ctx.encoder().video()?;
    encoder.set_width(64);
    encoder.set_height(64);
    encoder.set_format(Pixel::YUV420P);
    encoder.set_time_base(time_base);
    encoder.set_frame_rate(Some(Rational::new(10, 1)));

    let mut opts = Dictionary::new();
    opts.set("preset", "ultrafast");
    opts.set("tune", "zerolatency");
    let mut encoder = encoder.open_with(opts)?;

    let mut stream = output.add_stream(codec)?;
    stream.set_time_base(time_base);
    stream.set_parameters(&encoder);
    output.write_header()?;
    let stream_time_base = output
        .stream(0)
        .map(|stream| stream.time_base())
        .ok_or_else(|| anyhow::anyhow!("output stream missing"))?;

    let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, 64, 64);
    for i in 0..frames {
        for plane in 0..3 {
            frame.data_mut(plane).fill((i * 8 + plane * 40) as u8);
        }
        frame.set_pts(Some(i as i64));
        encoder.send_frame(&frame)?;
        write_encoded(&mut encoder, &mut output, time_base, stream_time_base)?;
    }
    encoder.send_eof()?;
    write_encoded(&mut encoder, &mut output, time_base, stream_time_base)?;
    output.write_trailer()?;
    Ok(true)
}

fn write_encoded(
    encoder: &mut ffmpeg_next::encoder::Video,
    output: &mut ffmpeg_next::format::context::Output,
    from: Rational,
    to: Rational,
) -> anyhow::Result<()> {
    let mut packet = ffmpeg_next::Packet::empty();
    loop {
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {
                packet.set_stream(0);
                packet.rescale_ts(from, to);
                packet.write_interleaved(output)?;
            }
            Err(ffmpeg_next::Error::Eof) => return Ok(()),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
}
