//! PCM audio output capability.

use crate::Result;

/// Channel layout of the PCM written to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    /// Mono for a single channel, stereo for anything else.
    pub fn from_channel_count(channels: u16) -> Self {
        if channels == 1 {
            ChannelLayout::Mono
        } else {
            ChannelLayout::Stereo
        }
    }

    pub fn channels(&self) -> u16 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

/// Sample encoding of the PCM written to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmEncoding {
    Pcm16Bit,
}

impl PcmEncoding {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            PcmEncoding::Pcm16Bit => 2,
        }
    }
}

/// Parameters a sink is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSinkConfig {
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    pub encoding: PcmEncoding,
    pub buffer_size: usize,
}

impl AudioSinkConfig {
    /// Bytes of PCM per second of playback.
    pub fn byte_rate(&self) -> usize {
        self.sample_rate as usize * self.layout.channels() as usize * self.encoding.bytes_per_sample()
    }
}

/// Streaming PCM output.
#[async_trait::async_trait]
pub trait AudioSink: Send {
    /// Starts consuming written PCM.
    fn play(&mut self) -> Result<()>;

    /// Writes a PCM chunk, waiting while the sink's buffer is full. Returns
    /// the number of bytes accepted.
    async fn write(&mut self, pcm: &[u8]) -> Result<usize>;

    /// Discards PCM that has been written but not yet played.
    fn flush(&mut self);

    fn release(&mut self);
}
