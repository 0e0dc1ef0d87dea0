use std::collections::VecDeque;

use anyhow::{Result, anyhow, bail};
use bytes::{Bytes, BytesMut};

use crate::packet::AccessUnit;
use crate::stream::CodecFamily;

/// Converts container-native access units into the self-contained
/// elementary stream the hardware decoder accepts.
pub trait BitstreamFilter: Send {
    fn submit(&mut self, unit: AccessUnit) -> Result<()>;

    /// Next reformatted unit, None when nothing is pending.
    fn receive(&mut self) -> Option<AccessUnit>;
}

/// Annex B start code (4-byte)
const START_CODE: &[u8] = &[0x00, 0x00, 0x00, 0x01];

/// Check if data starts with an Annex B start code.
pub fn is_annexb_packet(data: &[u8]) -> bool {
    data.starts_with(&[0x00, 0x00, 0x00, 0x01]) || data.starts_with(&[0x00, 0x00, 0x01])
}

/// Check if the codec configuration record indicates AVCC/HVCC format
/// (needs conversion to Annex B).
pub fn needs_annexb_conversion(extradata: &[u8]) -> bool {
    if extradata.len() < 4 || is_annexb_packet(extradata) {
        return false;
    }
    // avcC and hvcC both start with configurationVersion = 1
    extradata[0] == 0x01 && extradata.len() >= 7
}

/// Rewrites a codec configuration record as start-code prefixed parameter
/// sets, the form a decoder fed Annex B units expects as extradata. Empty or
/// already Annex B extradata is returned unchanged.
pub fn annexb_extradata(family: CodecFamily, extradata: &[u8]) -> Result<Bytes> {
    if !needs_annexb_conversion(extradata) {
        return Ok(Bytes::copy_from_slice(extradata));
    }
    let (_, parameter_sets) = match family {
        CodecFamily::H264 => parse_avcc(extradata)?,
        CodecFamily::Hevc => parse_hvcc(extradata)?,
    };
    Ok(parameter_sets)
}

#[derive(Debug, Clone)]
enum Mode {
    Passthrough,
    LengthPrefixed {
        nal_length_size: usize,
        parameter_sets: Bytes,
    },
}

/// Rust counterpart of `h264_mp4toannexb` / `hevc_mp4toannexb`.
///
/// Length-prefixed NAL units become start-code prefixed, and the parameter
/// sets from the configuration record are placed in front of every key unit
/// that does not already carry them.
pub struct AnnexBFilter {
    family: CodecFamily,
    mode: Option<Mode>,
    pending: VecDeque<AccessUnit>,
}

impl AnnexBFilter {
    pub fn new(family: CodecFamily) -> Self {
        Self {
            family,
            mode: None,
            pending: VecDeque::new(),
        }
    }

    pub fn init(&mut self, extradata: &[u8]) -> Result<()> {
        let mode = if !needs_annexb_conversion(extradata) {
            if !extradata.is_empty() && !is_annexb_packet(extradata) {
                bail!(
                    "{}: unrecognized codec configuration record ({} bytes)",
                    self.family.filter_name(),
                    extradata.len()
                );
            }
            Mode::Passthrough
        } else {
            let (nal_length_size, parameter_sets) = match self.family {
                CodecFamily::H264 => parse_avcc(extradata)?,
                CodecFamily::Hevc => parse_hvcc(extradata)?,
            };
            Mode::LengthPrefixed {
                nal_length_size,
                parameter_sets,
            }
        };
        log::debug!("{} initialised: {:?}", self.family.filter_name(), mode);
        self.mode = Some(mode);
        Ok(())
    }

    pub fn family(&self) -> CodecFamily {
        self.family
    }

    fn filter(&self, unit: &AccessUnit) -> Result<Bytes> {
        let Some(mode) = &self.mode else {
            bail!("{} used before init", self.family.filter_name());
        };
        let data = unit.data();
        let Mode::LengthPrefixed {
            nal_length_size,
            parameter_sets,
        } = mode
        else {
            return Ok(data.clone());
        };
        if data.is_empty() {
            return Ok(data.clone());
        }
        // A length prefix can itself read as a start code (00 00 01 xx for a
        // 256..511 byte NAL), so the length-prefixed parse always goes first.
        let prefix = if unit.is_key()
            && !parameter_sets.is_empty()
            && !has_parameter_sets(self.family, data, *nal_length_size)
        {
            Some(&parameter_sets[..])
        } else {
            None
        };
        match convert_length_prefixed(data, *nal_length_size, prefix) {
            Ok(out) => Ok(out),
            Err(e) if is_annexb_packet(data) => {
                log::debug!(
                    "{}: unit is not length-prefixed ({}), passing through",
                    self.family.filter_name(),
                    e
                );
                Ok(data.clone())
            }
            Err(e) => Err(e),
        }
    }
}

impl BitstreamFilter for AnnexBFilter {
    fn submit(&mut self, unit: AccessUnit) -> Result<()> {
        let data = self.filter(&unit)?;
        self.pending.push_back(unit.with_data(data));
        Ok(())
    }

    fn receive(&mut self) -> Option<AccessUnit> {
        self.pending.pop_front()
    }
}

fn read_length(data: &[u8], size: usize) -> usize {
    data[..size]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | usize::from(*b))
}

/// Splits length-prefixed NAL units. Errors on truncated input.
fn nal_units(data: &[u8], nal_length_size: usize) -> Result<Vec<&[u8]>> {
    let mut units = Vec::new();
    let mut i = 0;
    while i < data.len() {
        if i + nal_length_size > data.len() {
            bail!("truncated NAL length at offset {}", i);
        }
        let len = read_length(&data[i..], nal_length_size);
        i += nal_length_size;
        if len == 0 || i + len > data.len() {
            bail!("invalid NAL length {} at offset {}", len, i);
        }
        units.push(&data[i..i + len]);
        i += len;
    }
    Ok(units)
}

/// Converts length-prefixed NAL units to start-code prefixed ones.
pub fn convert_length_prefixed(
    data: &[u8],
    nal_length_size: usize,
    prefix: Option<&[u8]>,
) -> Result<Bytes> {
    let units = nal_units(data, nal_length_size)?;
    let mut out = BytesMut::with_capacity(data.len() + prefix.map_or(0, <[u8]>::len) + 4);
    if let Some(prefix) = prefix {
        out.extend_from_slice(prefix);
    }
    for nal in units {
        out.extend_from_slice(START_CODE);
        out.extend_from_slice(nal);
    }
    Ok(out.freeze())
}

fn has_parameter_sets(family: CodecFamily, data: &[u8], nal_length_size: usize) -> bool {
    let Ok(units) = nal_units(data, nal_length_size) else {
        return false;
    };
    units.iter().any(|nal| match family {
        // SPS
        CodecFamily::H264 => nal[0] & 0x1f == 7,
        // VPS / SPS / PPS
        CodecFamily::Hevc => (32..=34).contains(&((nal[0] >> 1) & 0x3f)),
    })
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| anyhow!("configuration record truncated at {}", self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from(self.u8()?) << 8 | u16::from(self.u8()?))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| anyhow!("configuration record truncated at {}", self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    /// Reads `count` u16-length-prefixed NAL units into `out` with start codes.
    fn nal_array(&mut self, count: usize, out: &mut BytesMut) -> Result<()> {
        for _ in 0..count {
            let len = usize::from(self.u16()?);
            let nal = self.bytes(len)?;
            out.extend_from_slice(START_CODE);
            out.extend_from_slice(nal);
        }
        Ok(())
    }
}

/// Parses an AVCDecoderConfigurationRecord: NAL length size and SPS/PPS.
fn parse_avcc(extradata: &[u8]) -> Result<(usize, Bytes)> {
    if extradata.len() < 7 {
        bail!("avcC too short: {} bytes", extradata.len());
    }
    let nal_length_size = usize::from(extradata[4] & 0x03) + 1;
    if nal_length_size == 3 {
        bail!("avcC has invalid NAL length size 3");
    }
    let mut reader = Reader::new(extradata, 5);
    let mut sets = BytesMut::new();
    let sps_count = usize::from(reader.u8()? & 0x1f);
    reader.nal_array(sps_count, &mut sets)?;
    let pps_count = usize::from(reader.u8()?);
    reader.nal_array(pps_count, &mut sets)?;
    Ok((nal_length_size, sets.freeze()))
}

/// Parses an HEVCDecoderConfigurationRecord: NAL length size and VPS/SPS/PPS.
fn parse_hvcc(extradata: &[u8]) -> Result<(usize, Bytes)> {
    if extradata.len() < 23 {
        bail!("hvcC too short: {} bytes", extradata.len());
    }
    let nal_length_size = usize::from(extradata[21] & 0x03) + 1;
    if nal_length_size == 3 {
        bail!("hvcC has invalid NAL length size 3");
    }
    let mut reader = Reader::new(extradata, 22);
    let mut sets = BytesMut::new();
    let arrays = reader.u8()?;
    for _ in 0..arrays {
        // array_completeness | reserved | NAL_unit_type
        reader.u8()?;
        let count = usize::from(reader.u16()?);
        reader.nal_array(count, &mut sets)?;
    }
    Ok((nal_length_size, sets.freeze()))
}
