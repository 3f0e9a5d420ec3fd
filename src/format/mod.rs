use crate::av::{MediaFormat, Packet};
use crate::Result;

pub mod track;

pub use track::{select_track, TrackSelection};

/// Where a seek lands relative to the requested offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Nearest sync sample at or before the offset.
    PreviousSync,
    /// Nearest sync sample at or after the offset.
    NextSync,
    /// Nearest sync sample in either direction.
    ClosestSync,
}

/// Container demuxer capability.
///
/// A demuxer is opened on one source and exposes its tracks. Samples are read
/// from the selected track under a cursor: `read_sample` returns the sample at
/// the cursor without moving it, `advance` moves the cursor forward.
#[async_trait::async_trait]
pub trait Demuxer: Send {
    /// Number of tracks in the container.
    fn track_count(&self) -> usize;

    /// Format metadata of track `index`.
    fn track_format(&self, index: usize) -> Result<MediaFormat>;

    /// Restricts sample reads to track `index`.
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// Reads the sample at the cursor, `Ok(None)` at end-of-stream.
    async fn read_sample(&mut self) -> Result<Option<Packet>>;

    /// Moves the cursor to the next sample. Returns false once no samples remain.
    fn advance(&mut self) -> bool;

    /// Repositions the cursor near `offset_us`.
    fn seek(&mut self, offset_us: i64, mode: SeekMode) -> Result<()>;

    /// Releases the underlying source. Further calls are undefined.
    fn release(&mut self);
}
