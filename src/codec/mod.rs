use crate::av::{BufferFlags, MediaFormat};
use crate::Result;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Metadata of a decoded buffer handed out by [`Decoder::dequeue_output_buffer`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBuffer {
    pub index: usize,
    pub size: usize,
    pub pts_us: i64,
    pub flags: BufferFlags,
}

impl OutputBuffer {
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.end_of_stream
    }
}

/// Result of polling the decoder's output queue.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputStatus {
    /// A decoded buffer is ready. It must be handed back with
    /// [`Decoder::release_output_buffer`].
    Buffer(OutputBuffer),
    /// Nothing became ready within the timeout.
    TryAgainLater,
    /// The output format changed; the new format is attached.
    FormatChanged(MediaFormat),
    /// The set of output buffers was reallocated.
    BuffersChanged,
}

/// A frame the decoder composited onto its surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedFrame {
    pub pts_us: i64,
    pub width: u32,
    pub height: u32,
}

/// Target a video decoder renders into when an output buffer is released
/// with `render = true`. The player never copies pixels itself.
pub trait PresentationSurface: Send + Sync {
    /// Whether the surface can still accept frames.
    fn is_valid(&self) -> bool {
        true
    }

    /// Called by decoder implementations for every rendered frame.
    fn present(&self, frame: &RenderedFrame);
}

/// Buffer-queue decoder capability.
///
/// Input side: `dequeue_input_buffer` hands out a free slot index, which is
/// filled and returned with `queue_input_buffer`. Output side:
/// `dequeue_output_buffer` reports a ready slot (or a status change), whose
/// bytes are read with `output_buffer` before `release_output_buffer` gives
/// the slot back. The waiting operations are async and must yield while they
/// wait.
#[async_trait::async_trait]
pub trait Decoder: Send {
    /// Binds the decoder to a track format and, for video, an output surface.
    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<Arc<dyn PresentationSurface>>,
    ) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Waits up to `timeout` for a free input slot.
    async fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>>;

    /// Submits a filled input slot. An empty `data` with the end-of-stream
    /// flag signals the end of input.
    fn queue_input_buffer(
        &mut self,
        index: usize,
        data: Bytes,
        pts_us: i64,
        flags: BufferFlags,
    ) -> Result<()>;

    /// Waits up to `timeout` for decoded output.
    async fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputStatus>;

    /// Bytes of a dequeued output slot. Surface-bound decoders may return
    /// `None`.
    fn output_buffer(&self, index: usize) -> Option<Bytes>;

    /// Returns an output slot, rendering it to the surface when `render` is set.
    fn release_output_buffer(&mut self, index: usize, render: bool) -> Result<()>;

    fn stop(&mut self);

    fn release(&mut self);
}
