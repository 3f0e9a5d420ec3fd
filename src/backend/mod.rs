//! Factories for the demuxer, decoder and audio sink instances a session uses.

use crate::audio::{AudioSink, AudioSinkConfig, ChannelLayout, PcmEncoding};
use crate::av::MediaFormat;
use crate::codec::Decoder;
use crate::format::Demuxer;
use crate::Result;
use std::path::Path;

pub mod memory;

pub use memory::{MemoryBackend, MemorySource, MemorySurface, MemoryTrack, ResourceSnapshot};

/// Source of fresh media primitives.
///
/// Every call returns a new, independent instance: the player opens two
/// demuxers on the same source so the video and audio pipelines can seek and
/// advance independently.
pub trait MediaBackend: Send + Sync + 'static {
    /// Opens a demuxer on `path`.
    fn open_demuxer(&self, path: &Path) -> Result<Box<dyn Demuxer>>;

    /// Creates an unconfigured decoder able to handle `format`.
    fn create_decoder(&self, format: &MediaFormat) -> Result<Box<dyn Decoder>>;

    /// Smallest sink buffer, in bytes, the platform accepts for this layout.
    fn min_buffer_size(&self, sample_rate: u32, layout: ChannelLayout, encoding: PcmEncoding)
        -> usize;

    /// Opens a PCM sink. The sink is created stopped; call `play` to start it.
    fn open_audio_sink(&self, config: &AudioSinkConfig) -> Result<Box<dyn AudioSink>>;
}
