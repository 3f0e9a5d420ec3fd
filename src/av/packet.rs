use bytes::Bytes;

/// Flags attached to a buffer crossing the decoder queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags {
    pub key_frame: bool,
    pub end_of_stream: bool,
}

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags {
        key_frame: false,
        end_of_stream: false,
    };

    pub const END_OF_STREAM: BufferFlags = BufferFlags {
        key_frame: false,
        end_of_stream: true,
    };
}

/// One compressed sample read from a demuxer.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
    pub pts_us: i64,
    pub track_index: usize,
    pub is_key: bool,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts_us: 0,
            track_index: 0,
            is_key: false,
        }
    }

    pub fn with_pts_us(mut self, pts_us: i64) -> Self {
        self.pts_us = pts_us;
        self
    }

    pub fn with_track_index(mut self, index: usize) -> Self {
        self.track_index = index;
        self
    }

    pub fn with_key_flag(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn flags(&self) -> BufferFlags {
        BufferFlags {
            key_frame: self.is_key,
            end_of_stream: false,
        }
    }
}
