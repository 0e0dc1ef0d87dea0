//! Hardware decode collaborator.
//!
//! [`FfmpegDecoder`] owns one FFmpeg video decoder on a dedicated worker
//! thread. Hardware decoders (CUDA/QSV/V4L2M2M) are preferred with automatic
//! fallback to the software decoder. Decoded frames reach the
//! [`FrameCallback`] on the worker thread, never on the submitting thread.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::JoinHandle;

use bytes::Bytes;
use ffmpeg_next::Rational;

use crate::{
    bsf::{annexb_extradata, needs_annexb_conversion},
    callback::ChannelContext,
    frame::RawDecodedFrame,
    packet::AccessUnit,
    scaler::{Scaler, to_semi_planar},
    stream::{AvStream, CodecParameters},
};

/// Receives decoded frames with the metadata bound at decoder creation.
pub trait FrameCallback: Send + Sync {
    fn on_frame(&self, frame: Option<RawDecodedFrame>, metadata: Option<&ChannelContext>);
}

/// Channel number, callback and metadata handed to the decoder.
#[derive(Clone)]
pub struct CallbackBinding {
    pub channel_num: u32,
    pub callback: Arc<dyn FrameCallback>,
    pub metadata: Option<Arc<ChannelContext>>,
}

impl CallbackBinding {
    pub fn new(
        channel_num: u32,
        callback: Arc<dyn FrameCallback>,
        metadata: Option<Arc<ChannelContext>>,
    ) -> Self {
        Self {
            channel_num,
            callback,
            metadata,
        }
    }

    pub fn deliver(&self, frame: Option<RawDecodedFrame>) {
        self.callback.on_frame(frame, self.metadata.as_deref());
    }
}

/// Accepts compressed access units; results arrive only through the callback.
pub trait HwDecoder: Send {
    /// Returns once the decoder has consumed `unit`.
    fn submit(&mut self, unit: AccessUnit) -> anyhow::Result<()>;

    /// Flushes frames still held by the decoder and releases it. Idempotent.
    fn destroy(&mut self) -> anyhow::Result<()>;
}

/// Hardware decoders available for `codec_id`, in preference order.
pub fn hw_decoder_candidates(codec_id: ffmpeg_next::codec::Id) -> Vec<ffmpeg_next::Codec> {
    let hw_names: &[&str] = match codec_id {
        ffmpeg_next::codec::Id::H264 => &["h264_cuvid", "h264_qsv", "h264_v4l2m2m"],
        ffmpeg_next::codec::Id::HEVC => &["hevc_cuvid", "hevc_qsv", "hevc_v4l2m2m"],
        _ => &[],
    };

    hw_names
        .iter()
        .filter_map(|name| ffmpeg_next::decoder::find_by_name(name))
        .collect()
}

/// Replaces the context extradata with a padded copy of `extradata`.
fn set_extradata(ctx: &mut ffmpeg_next::codec::Context, extradata: &[u8]) -> anyhow::Result<()> {
    let size = i32::try_from(extradata.len())?;
    unsafe {
        let ptr = ctx.as_mut_ptr();
        ffmpeg_next::ffi::av_freep(
            &mut (*ptr).extradata as *mut *mut u8 as *mut std::ffi::c_void,
        );
        (*ptr).extradata_size = 0;
        if extradata.is_empty() {
            return Ok(());
        }
        let padded = extradata.len() + ffmpeg_next::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
        let buf = ffmpeg_next::ffi::av_mallocz(padded) as *mut u8;
        if buf.is_null() {
            anyhow::bail!("allocate {} bytes of extradata failed", padded);
        }
        std::ptr::copy_nonoverlapping(extradata.as_ptr(), buf, extradata.len());
        (*ptr).extradata = buf;
        (*ptr).extradata_size = size;
    }
    Ok(())
}

/// Builds a decoder context from the stream parameters. `extradata`, when
/// given, replaces the container's configuration record.
fn decoder_context(
    parameters: &CodecParameters,
    extradata: Option<&[u8]>,
    time_base: Rational,
) -> anyhow::Result<ffmpeg_next::codec::Context> {
    let mut decoder_ctx = ffmpeg_next::codec::Context::new();
    unsafe {
        (*decoder_ctx.as_mut_ptr()).time_base = time_base.into();
    }
    decoder_ctx.set_parameters(parameters.inner().clone())?;
    if let Some(extradata) = extradata {
        set_extradata(&mut decoder_ctx, extradata)?;
    }
    Ok(decoder_ctx)
}

/// Extradata matching units that went through the Annex B filter, or None
/// when the stream's own record already fits.
pub fn decoder_extradata(stream: &AvStream) -> anyhow::Result<Option<Bytes>> {
    match stream.codec_family() {
        Some(family) if needs_annexb_conversion(stream.extradata()) => {
            Ok(Some(annexb_extradata(family, stream.extradata())?))
        }
        _ => Ok(None),
    }
}

/// Opens the first working hardware decoder, then the software one.
pub fn open_decoder(
    parameters: &CodecParameters,
    extradata: Option<&[u8]>,
    codec_id: ffmpeg_next::codec::Id,
    time_base: Rational,
) -> anyhow::Result<ffmpeg_next::decoder::Video> {
    for codec in hw_decoder_candidates(codec_id) {
        let opened = decoder_context(parameters, extradata, time_base)
            .and_then(|ctx| Ok(ctx.decoder().open_as(codec)?.video()?));
        match opened {
            Ok(decoder) => {
                log::info!("found hardware decoder: {}", codec.name());
                return Ok(decoder);
            }
            Err(e) => log::warn!("hardware decoder {} unavailable: {}", codec.name(), e),
        }
    }

    let decoder = decoder_context(parameters, extradata, time_base)?
        .decoder()
        .video()?;
    if decoder.format() == ffmpeg_next::format::Pixel::None
        || decoder.width() == 0
        || decoder.height() == 0
    {
        return Err(anyhow::anyhow!("missing codec parameters"));
    }
    log::info!("use software decoder for {:?}", codec_id);
    Ok(decoder)
}

enum DecoderCmd {
    Unit(AccessUnit, SyncSender<anyhow::Result<()>>),
    Flush(SyncSender<anyhow::Result<()>>),
}

pub struct FfmpegDecoder {
    channel_num: u32,
    tx: Option<Sender<DecoderCmd>>,
    worker: Option<JoinHandle<()>>,
}

impl FfmpegDecoder {
    pub fn create(stream: &AvStream, binding: CallbackBinding) -> anyhow::Result<Self> {
        let parameters = stream
            .parameters()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("stream {} has no codec parameters", stream.index()))?;
        let extradata = decoder_extradata(stream)?;
        let codec_id = stream.codec_id();
        let time_base = stream.time_base();
        let channel_num = binding.channel_num;

        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let worker = std::thread::Builder::new()
            .name(format!("vdec_channel{}", channel_num))
            .spawn(move || {
                let decoder = match open_decoder(
                    &parameters,
                    extradata.as_deref(),
                    codec_id,
                    time_base,
                ) {
                    Ok(decoder) => {
                        let _ = ready_tx.send(Ok(()));
                        decoder
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                decode_loop(decoder, rx, binding);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                channel_num,
                tx: Some(tx),
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(anyhow::anyhow!("decoder worker exited during setup"))
            }
        }
    }

    fn request(&self, make: impl FnOnce(SyncSender<anyhow::Result<()>>) -> DecoderCmd) -> anyhow::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("decoder {} already destroyed", self.channel_num))?;
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        tx.send(make(ack_tx))
            .map_err(|_| anyhow::anyhow!("decoder {} worker stopped", self.channel_num))?;
        ack_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("decoder {} worker stopped", self.channel_num))?
    }
}

impl HwDecoder for FfmpegDecoder {
    fn submit(&mut self, unit: AccessUnit) -> anyhow::Result<()> {
        self.request(|ack| DecoderCmd::Unit(unit, ack))
    }

    fn destroy(&mut self) -> anyhow::Result<()> {
        if self.tx.is_none() {
            return Ok(());
        }
        let flushed = self.request(DecoderCmd::Flush);
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("decoder {} worker panicked", self.channel_num);
            }
        }
        log::debug!("decoder {} destroyed", self.channel_num);
        flushed
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            log::warn!("decoder {} flush on drop failed: {}", self.channel_num, e);
        }
    }
}

fn decode_loop(
    mut decoder: ffmpeg_next::decoder::Video,
    rx: Receiver<DecoderCmd>,
    binding: CallbackBinding,
) {
    let mut scaler: Option<Scaler> = None;
    while let Ok(cmd) = rx.recv() {
        match cmd {
            DecoderCmd::Unit(unit, ack) => {
                let result = send_unit(&mut decoder, &unit)
                    .and_then(|_| receive_frames(&mut decoder, &mut scaler, &binding));
                let _ = ack.send(result);
            }
            DecoderCmd::Flush(ack) => {
                let result = decoder
                    .send_eof()
                    .map_err(anyhow::Error::from)
                    .and_then(|_| receive_frames(&mut decoder, &mut scaler, &binding));
                let _ = ack.send(result);
                break;
            }
        }
    }
    log::debug!("decoder worker for channel {} exit", binding.channel_num);
}

fn send_unit(decoder: &mut ffmpeg_next::decoder::Video, unit: &AccessUnit) -> anyhow::Result<()> {
    let mut packet = ffmpeg_next::Packet::copy(unit.data());
    packet.set_pts(unit.pts());
    packet.set_dts(unit.dts());
    if unit.is_key() {
        packet.set_flags(ffmpeg_next::packet::Flags::KEY);
    }
    decoder.send_packet(&packet)?;
    Ok(())
}

fn receive_frames(
    decoder: &mut ffmpeg_next::decoder::Video,
    scaler: &mut Option<Scaler>,
    binding: &CallbackBinding,
) -> anyhow::Result<()> {
    loop {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match decoder.receive_frame(&mut frame) {
            Ok(()) => {}
            Err(ffmpeg_next::Error::Eof) => return Ok(()),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        if frame.width() == 0 || frame.height() == 0 {
            binding.deliver(None);
            continue;
        }
        let converted = to_semi_planar(scaler, frame)
            .and_then(|frame| RawDecodedFrame::try_from(&frame));
        match converted {
            Ok(raw) => binding.deliver(Some(raw)),
            Err(e) => log::error!(
                "channel {} drop decoded frame, conversion failed: {}",
                binding.channel_num,
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::stream::MediaKind;

    struct Collect(Mutex<Vec<Option<(u32, u32)>>>);

    impl FrameCallback for Collect {
        fn on_frame(&self, frame: Option<RawDecodedFrame>, _metadata: Option<&ChannelContext>) {
            self.0
                .lock()
                .unwrap()
                .push(frame.map(|f| (f.width(), f.height())));
        }
    }

    #[test]
    fn test_candidates_only_for_supported_codecs() {
        crate::init().unwrap();
        assert!(hw_decoder_candidates(ffmpeg_next::codec::Id::MJPEG).is_empty());
        for codec in hw_decoder_candidates(ffmpeg_next::codec::Id::H264) {
            assert!(codec.name().starts_with("h264_"));
        }
    }

    #[test]
    fn test_binding_delivers_with_metadata() {
        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        let binding = CallbackBinding::new(1, collect.clone(), None);
        binding.deliver(Some(RawDecodedFrame::filled_nv12(8, 4, 0)));
        binding.deliver(None);
        assert_eq!(*collect.0.lock().unwrap(), vec![Some((8, 4)), None]);
    }

    fn context_extradata(ctx: &ffmpeg_next::codec::Context) -> Vec<u8> {
        unsafe {
            let ptr = ctx.as_ptr();
            if (*ptr).extradata.is_null() {
                return Vec::new();
            }
            std::slice::from_raw_parts((*ptr).extradata, (*ptr).extradata_size as usize).to_vec()
        }
    }

    #[test]
    fn test_set_extradata_replaces_record() {
        let mut ctx = ffmpeg_next::codec::Context::new();
        let avcc = crate::testing::avcc_record();
        set_extradata(&mut ctx, &avcc).unwrap();
        assert_eq!(context_extradata(&ctx), avcc);

        let annexb: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xce];
        set_extradata(&mut ctx, annexb).unwrap();
        assert_eq!(context_extradata(&ctx), annexb);

        set_extradata(&mut ctx, &[]).unwrap();
        assert!(context_extradata(&ctx).is_empty());
    }

    #[test]
    fn test_decoder_extradata_from_avcc() {
        use crate::testing::{PPS, SPS};

        let stream = AvStream::new(0, MediaKind::Video, ffmpeg_next::codec::Id::H264)
            .with_extradata(crate::testing::avcc_record());
        let extradata = decoder_extradata(&stream).unwrap().unwrap();
        let mut expected = Vec::new();
        for nal in [SPS, PPS] {
            expected.extend_from_slice(&[0, 0, 0, 1]);
            expected.extend_from_slice(nal);
        }
        assert_eq!(&extradata[..], &expected[..]);

        let annexb = AvStream::new(0, MediaKind::Video, ffmpeg_next::codec::Id::H264)
            .with_extradata(vec![0, 0, 0, 1, 0x67]);
        assert_eq!(decoder_extradata(&annexb).unwrap(), None);
    }

    #[test]
    fn test_create_without_parameters_fails() {
        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        let stream = AvStream::new(0, MediaKind::Video, ffmpeg_next::codec::Id::H264);
        let binding = CallbackBinding::new(2, collect, None);
        assert!(FfmpegDecoder::create(&stream, binding).is_err());
    }
}
