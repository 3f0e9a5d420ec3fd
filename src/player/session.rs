//! Session resource management.
//!
//! A session owns one demuxer/decoder pair per pipeline plus the audio sink.
//! Every handle lives in an `Option` so `close` can run any number of times
//! from any path: after a partial open, on caller stop, or on drop.

use super::audio_loop::{AudioExit, AudioSignals};
use crate::audio::{AudioSink, AudioSinkConfig, ChannelLayout, PcmEncoding};
use crate::av::{MediaFormat, MediaKind, TrackDescriptor};
use crate::backend::MediaBackend;
use crate::codec::{Decoder, PresentationSurface};
use crate::config::EngineConfig;
use crate::format::{select_track, Demuxer, SeekMode};
use crate::{FrameStepError, Result};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// What a "begin session" command carries from the caller.
#[derive(Debug, Clone)]
pub(crate) struct SessionRequest {
    pub source: PathBuf,
    /// Caller-configured tick period; overrides the track's frame rate.
    pub frame_interval_ms: Option<u32>,
}

/// Video demuxer and decoder.
#[derive(Default)]
pub(crate) struct VideoPipeline {
    pub demuxer: Option<Box<dyn Demuxer>>,
    pub decoder: Option<Box<dyn Decoder>>,
}

impl VideoPipeline {
    pub fn close(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.stop();
            decoder.release();
        }
        if let Some(mut demuxer) = self.demuxer.take() {
            demuxer.release();
        }
    }
}

impl Drop for VideoPipeline {
    fn drop(&mut self) {
        self.close();
    }
}

/// Audio demuxer, decoder and sink, moved into the audio loop once the
/// session starts.
pub(crate) struct AudioPipeline {
    pub demuxer: Option<Box<dyn Demuxer>>,
    pub decoder: Option<Box<dyn Decoder>>,
    pub sink: Option<Box<dyn AudioSink>>,
    pub format: MediaFormat,
    pub sink_config: AudioSinkConfig,
}

impl AudioPipeline {
    fn new(demuxer: Box<dyn Demuxer>, format: MediaFormat, sink_config: AudioSinkConfig) -> Self {
        Self {
            demuxer: Some(demuxer),
            decoder: None,
            sink: None,
            format,
            sink_config,
        }
    }

    /// Creates, configures and starts the decoder and sink.
    pub fn open_output(&mut self, backend: &dyn MediaBackend) -> Result<()> {
        let decoder = self
            .decoder
            .insert(backend.create_decoder(&self.format).map_err(decoder_init)?);
        decoder.configure(&self.format, None).map_err(decoder_init)?;
        decoder.start().map_err(decoder_init)?;

        let sink = self
            .sink
            .insert(backend.open_audio_sink(&self.sink_config).map_err(decoder_init)?);
        sink.play().map_err(decoder_init)?;
        Ok(())
    }

    /// Rewinds the demuxer and builds a fresh decoder and sink.
    pub fn reopen_output(&mut self, backend: &dyn MediaBackend) -> Result<()> {
        self.release_output(false);
        if let Some(demuxer) = self.demuxer.as_deref_mut() {
            demuxer.seek(0, SeekMode::PreviousSync)?;
        }
        self.open_output(backend)
    }

    /// Releases decoder then sink, keeping the demuxer. The sink is flushed
    /// first only when `flush` is set.
    pub fn release_output(&mut self, flush: bool) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.stop();
            decoder.release();
        }
        if let Some(mut sink) = self.sink.take() {
            if flush {
                sink.flush();
            }
            sink.release();
        }
    }

    pub fn close(&mut self, flush: bool) {
        self.release_output(flush);
        if let Some(mut demuxer) = self.demuxer.take() {
            demuxer.release();
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.close(false);
    }
}

/// A spawned audio loop and the signals that steer it.
pub(crate) struct AudioTask {
    pub signals: Arc<AudioSignals>,
    pub handle: Option<JoinHandle<AudioExit>>,
}

impl AudioTask {
    /// Asks the loop to stop and waits for it to release its resources.
    pub async fn finish(&mut self) {
        self.signals.request_stop();
        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(exit) => debug!("audio loop finished: {:?}", exit),
                Err(e) => warn!("audio loop task failed: {}", e),
            }
        }
    }
}

impl Drop for AudioTask {
    fn drop(&mut self) {
        self.signals.request_stop();
    }
}

/// All resources of one playback session.
pub(crate) struct DecodeSession {
    pub generation: u64,
    pub video: VideoPipeline,
    pub video_track: TrackDescriptor,
    /// Present until the audio loop takes it over.
    pub audio: Option<AudioPipeline>,
    pub audio_track: Option<TrackDescriptor>,
    pub audio_task: Option<AudioTask>,
    pub frame_interval_ms: u32,
    pub duration_us: i64,
}

impl DecodeSession {
    /// Releases every resource, waiting for the audio loop to exit.
    pub async fn close(&mut self) {
        self.video.close();
        if let Some(mut audio) = self.audio.take() {
            audio.close(false);
        }
        if let Some(mut task) = self.audio_task.take() {
            task.finish().await;
        }
        info!("session {} closed", self.generation);
    }
}

fn decoder_init(e: FrameStepError) -> FrameStepError {
    match e {
        FrameStepError::DecoderInit(_) => e,
        other => FrameStepError::DecoderInit(other.to_string()),
    }
}

/// Tick period for a session: the caller's interval if set, else one frame
/// of the track's frame rate. Never zero.
pub(crate) fn resolve_frame_interval(configured_ms: Option<u32>, frame_rate: u32) -> u32 {
    configured_ms
        .filter(|ms| *ms > 0)
        .unwrap_or_else(|| 1000 / frame_rate.max(1))
        .max(1)
}

/// Audio sink rate for a session.
///
/// Scales the source rate by how much the tick period deviates from the
/// track's native frame period, so a slowed video slows (and lowers) the
/// audio as well. This changes pitch rather than resampling.
pub(crate) fn output_sample_rate(source_rate: u32, frame_rate: u32, frame_interval_ms: u32) -> u32 {
    let native_interval = 1000 / frame_rate.max(1);
    (source_rate as f32 * native_interval as f32 / frame_interval_ms.max(1) as f32) as u32
}

/// Builds a session for `request`. Any failure releases whatever was already
/// opened before the error is returned.
pub(crate) fn open_session(
    backend: &dyn MediaBackend,
    surface: &Arc<dyn PresentationSurface>,
    config: &EngineConfig,
    request: &SessionRequest,
    generation: u64,
) -> Result<DecodeSession> {
    let source = &request.source;
    let unreadable = |e: FrameStepError| FrameStepError::SourceUnreadable {
        path: source.clone(),
        reason: e.to_string(),
    };

    let mut video = VideoPipeline::default();
    let demuxer = video
        .demuxer
        .insert(backend.open_demuxer(source).map_err(unreadable)?);
    let selection = select_track(&**demuxer, MediaKind::Video)
        .ok_or_else(|| FrameStepError::NoVideoTrack(source.clone()))?;
    demuxer.select_track(selection.index)?;
    let (video_track, video_format) = (selection.descriptor, selection.format);

    let frame_rate = video_track
        .frame_rate
        .filter(|rate| *rate > 0)
        .unwrap_or(config.fallback_frame_rate);
    let frame_interval_ms = resolve_frame_interval(request.frame_interval_ms, frame_rate);

    let mut audio_demuxer = backend.open_demuxer(source).map_err(unreadable)?;
    let audio = match select_track(&*audio_demuxer, MediaKind::Audio) {
        Some(selection) => {
            let format = selection.format;
            let layout = ChannelLayout::from_channel_count(format.channel_count.unwrap_or(2));
            let sample_rate = output_sample_rate(
                format.sample_rate.unwrap_or(44_100),
                frame_rate,
                frame_interval_ms,
            );
            let encoding = PcmEncoding::Pcm16Bit;
            let sink_config = AudioSinkConfig {
                sample_rate,
                layout,
                encoding,
                buffer_size: backend.min_buffer_size(sample_rate, layout, encoding),
            };
            let mut pipeline = AudioPipeline::new(audio_demuxer, format, sink_config);
            pipeline.open_output(backend)?;
            if let Some(demuxer) = pipeline.demuxer.as_deref_mut() {
                demuxer.select_track(selection.index)?;
            }
            debug!(
                "audio track {} at {} Hz, sink {:?}",
                selection.index, sample_rate, sink_config
            );
            Some((pipeline, selection.descriptor))
        }
        None => {
            debug!("no audio track in {}, playing video only", source.display());
            audio_demuxer.release();
            None
        }
    };

    let decoder = video
        .decoder
        .insert(backend.create_decoder(&video_format).map_err(decoder_init)?);
    decoder
        .configure(&video_format, Some(surface.clone()))
        .map_err(decoder_init)?;
    decoder.start().map_err(decoder_init)?;

    info!(
        "session {} opened {} ({}, {} ms/frame, {} us)",
        generation,
        source.display(),
        video_track.media_type,
        frame_interval_ms,
        video_track.duration_us
    );

    let (audio, audio_track) = match audio {
        Some((pipeline, track)) => (Some(pipeline), Some(track)),
        None => (None, None),
    };
    Ok(DecodeSession {
        generation,
        duration_us: video_track.duration_us,
        video,
        video_track,
        audio,
        audio_track,
        audio_task: None,
        frame_interval_ms,
    })
}
