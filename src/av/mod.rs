//! Media description types shared by the demuxer, decoder and player.

/// Elementary stream kind, matched against a track's MIME type prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// The MIME type prefix tracks of this kind carry.
    pub fn mime_prefix(&self) -> &'static str {
        match self {
            MediaKind::Video => "video/",
            MediaKind::Audio => "audio/",
        }
    }

    /// Classifies a MIME type, `None` for anything that is neither video nor audio.
    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with(MediaKind::Video.mime_prefix()) {
            Some(MediaKind::Video)
        } else if mime.starts_with(MediaKind::Audio.mime_prefix()) {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }
}

/// Per-track format metadata as reported by a demuxer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaFormat {
    pub mime: String,
    pub frame_rate: Option<u32>,
    pub duration_us: i64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u16>,
}

impl MediaFormat {
    pub fn new(mime: &str) -> Self {
        Self {
            mime: mime.to_string(),
            ..Default::default()
        }
    }

    /// Video track format.
    pub fn video(mime: &str, width: u32, height: u32, frame_rate: u32, duration_us: i64) -> Self {
        Self::new(mime)
            .with_dimensions(width, height)
            .with_frame_rate(frame_rate)
            .with_duration_us(duration_us)
    }

    /// Audio track format.
    pub fn audio(mime: &str, sample_rate: u32, channel_count: u16, duration_us: i64) -> Self {
        Self::new(mime)
            .with_sample_rate(sample_rate)
            .with_channel_count(channel_count)
            .with_duration_us(duration_us)
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = duration_us;
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_channel_count(mut self, channel_count: u16) -> Self {
        self.channel_count = Some(channel_count);
        self
    }

    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_mime(&self.mime)
    }
}

/// Read-only view of a selected track, derived at session start.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDescriptor {
    pub index: usize,
    pub media_type: String,
    pub frame_rate: Option<u32>,
    pub duration_us: i64,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u16>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl TrackDescriptor {
    pub fn from_format(index: usize, format: &MediaFormat) -> Self {
        Self {
            index,
            media_type: format.mime.clone(),
            frame_rate: format.frame_rate,
            duration_us: format.duration_us,
            sample_rate: format.sample_rate,
            channel_count: format.channel_count,
            width: format.width,
            height: format.height,
        }
    }
}

mod packet;
pub use packet::*;
