//! One video tick: feed a sample, drain a frame, report progress.

use super::session::VideoPipeline;
use crate::av::BufferFlags;
use crate::codec::OutputStatus;
use crate::Result;
use log::{debug, trace};
use std::time::Duration;

/// What a single [`step`] did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum StepOutcome {
    /// A frame went to the surface. `progress` is `None` when the track has
    /// no usable duration.
    Rendered { progress: Option<f32> },
    /// Input was accepted but the decoder had nothing to show yet.
    NoOutput,
    /// No free input buffer within the timeout; the tick was skipped.
    InputUnavailable,
    /// The demuxer ran out of samples.
    EndOfStream,
    /// There is no open pipeline.
    Idle,
}

/// Fraction of the track covered after `frame` ticks of `interval_ms`.
///
/// Unclamped: it may run past 1.0 when the last frame overshoots the
/// declared duration.
pub(crate) fn progress_fraction(frame: u32, interval_ms: u32, duration_us: i64) -> Option<f32> {
    if duration_us <= 0 {
        return None;
    }
    let elapsed_us = (frame as u64 + 1) * interval_ms as u64 * 1000;
    Some((elapsed_us as f64 / duration_us as f64) as f32)
}

/// Advances the video pipeline by one sample.
///
/// Samples are submitted with a zero timestamp; the ticker decides when a
/// frame is shown, not the container.
pub(crate) async fn step(
    video: &mut VideoPipeline,
    frame: u32,
    interval_ms: u32,
    duration_us: i64,
    timeout: Duration,
) -> Result<StepOutcome> {
    let (Some(demuxer), Some(decoder)) = (video.demuxer.as_deref_mut(), video.decoder.as_deref_mut())
    else {
        return Ok(StepOutcome::Idle);
    };

    let Some(slot) = decoder.dequeue_input_buffer(timeout).await? else {
        trace!("frame {}: no video input buffer", frame);
        return Ok(StepOutcome::InputUnavailable);
    };

    match demuxer.read_sample().await? {
        Some(sample) => {
            let flags = BufferFlags {
                end_of_stream: false,
                key_frame: sample.is_key,
            };
            decoder.queue_input_buffer(slot, sample.data, 0, flags)?;
            demuxer.advance();
        }
        None => {
            debug!("frame {}: video input reached end-of-stream", frame);
            return Ok(StepOutcome::EndOfStream);
        }
    }

    match decoder.dequeue_output_buffer(timeout).await? {
        OutputStatus::Buffer(output) => {
            decoder.release_output_buffer(output.index, true)?;
            trace!("frame {} rendered ({} bytes)", frame, output.size);
            Ok(StepOutcome::Rendered {
                progress: progress_fraction(frame, interval_ms, duration_us),
            })
        }
        OutputStatus::FormatChanged(format) => {
            debug!("video output format changed: {:?}", format);
            Ok(StepOutcome::NoOutput)
        }
        OutputStatus::BuffersChanged | OutputStatus::TryAgainLater => Ok(StepOutcome::NoOutput),
    }
}
