use bytes::Bytes;

/// One demuxed compressed video frame, before or after bitstream reformatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    stream_index: usize,
    data: Bytes,
    pts: Option<i64>,
    dts: Option<i64>,
    is_key: bool,
}

impl AccessUnit {
    pub fn new(stream_index: usize, data: impl Into<Bytes>) -> Self {
        Self {
            stream_index,
            data: data.into(),
            pts: None,
            dts: None,
            is_key: false,
        }
    }

    pub fn with_timestamps(mut self, pts: Option<i64>, dts: Option<i64>) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    pub fn with_key(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    /// Same timing and stream, new payload.
    pub fn with_data(&self, data: Bytes) -> Self {
        Self {
            stream_index: self.stream_index,
            data,
            pts: self.pts,
            dts: self.dts,
            is_key: self.is_key,
        }
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn dts(&self) -> Option<i64> {
        self.dts
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl From<&ffmpeg_next::codec::packet::Packet> for AccessUnit {
    fn from(packet: &ffmpeg_next::codec::packet::Packet) -> Self {
        Self {
            stream_index: packet.stream(),
            data: packet
                .data()
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
            pts: packet.pts(),
            dts: packet.dts(),
            is_key: packet.is_key(),
        }
    }
}
