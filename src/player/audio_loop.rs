//! Free-running audio decode/render loop.
//!
//! The loop owns the session's audio pipeline and runs on its own task,
//! paced only by decoder and sink backpressure. The controller steers it
//! through [`AudioSignals`], which the loop polls once per iteration.

use super::session::AudioPipeline;
use super::state::{PlaybackState, StateCell};
use crate::av::BufferFlags;
use crate::backend::MediaBackend;
use crate::codec::OutputStatus;
use crate::config::EngineConfig;
use crate::format::SeekMode;
use crate::{FrameStepError, Result};
use bytes::Bytes;
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stop and seek requests shared between the controller and the audio loop.
///
/// Each signal has one writer and one reader, so plain atomics suffice.
#[derive(Debug, Default)]
pub(crate) struct AudioSignals {
    stop: AtomicBool,
    seek_pending: AtomicBool,
    seek_offset_us: AtomicI64,
    loop_forever: AtomicBool,
    finished: AtomicBool,
}

impl AudioSignals {
    pub fn new(loop_forever: bool) -> Self {
        Self {
            loop_forever: AtomicBool::new(loop_forever),
            ..Default::default()
        }
    }

    /// Set by the loop once its pipeline is released; no request is read
    /// after that.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        !self.finished.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn request_seek(&self, offset_us: i64) {
        self.seek_offset_us.store(offset_us, Ordering::SeqCst);
        self.seek_pending.store(true, Ordering::SeqCst);
    }

    pub fn clear_seek(&self) {
        self.seek_pending.store(false, Ordering::SeqCst);
        self.seek_offset_us.store(0, Ordering::SeqCst);
    }

    /// Consumes a pending seek request.
    pub fn take_seek(&self) -> Option<i64> {
        if self.seek_pending.swap(false, Ordering::SeqCst) {
            Some(self.seek_offset_us.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    pub fn set_loop_forever(&self, enabled: bool) {
        self.loop_forever.store(enabled, Ordering::SeqCst);
    }

    pub fn loop_forever(&self) -> bool {
        self.loop_forever.load(Ordering::SeqCst)
    }
}

/// Why the audio loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AudioExit {
    EndOfStream,
    Stopped,
    Stalled,
    Failed,
}

pub(crate) struct AudioLoop {
    pipeline: AudioPipeline,
    backend: Arc<dyn MediaBackend>,
    signals: Arc<AudioSignals>,
    state: Arc<StateCell>,
    codec_timeout: Duration,
    stall_limit: u32,
    pause_poll: Duration,
    wrote_audio: bool,
}

impl AudioLoop {
    pub fn new(
        pipeline: AudioPipeline,
        backend: Arc<dyn MediaBackend>,
        signals: Arc<AudioSignals>,
        state: Arc<StateCell>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            pipeline,
            backend,
            signals,
            state,
            codec_timeout: config.codec_timeout,
            stall_limit: config.audio_stall_limit.max(1),
            pause_poll: config.pause_poll_interval,
            wrote_audio: false,
        }
    }

    /// Decodes until end-of-stream, stop or stall, restarting the track when
    /// looping is enabled or when nothing was ever written. Always releases
    /// the pipeline before returning.
    pub async fn run(mut self) -> AudioExit {
        loop {
            let exit = match self.decode_pass().await {
                Ok(exit) => exit,
                Err(e) => {
                    warn!("audio decode failed: {}", e);
                    AudioExit::Failed
                }
            };

            let restart = exit == AudioExit::EndOfStream
                && !self.signals.stop_requested()
                && (self.signals.loop_forever() || !self.wrote_audio);
            if !restart {
                self.pipeline.close(!self.signals.stop_requested());
                self.signals.mark_finished();
                info!("audio loop exited: {:?}", exit);
                return exit;
            }

            debug!(
                "restarting audio track (looping: {}, wrote audio: {})",
                self.signals.loop_forever(),
                self.wrote_audio
            );
            self.pipeline.release_output(true);
            tokio::time::sleep(self.codec_timeout).await;
            if let Err(e) = self.pipeline.reopen_output(&*self.backend) {
                warn!("audio restart failed: {}", e);
                self.pipeline.close(false);
                self.signals.mark_finished();
                return AudioExit::Failed;
            }
        }
    }

    async fn decode_pass(&mut self) -> Result<AudioExit> {
        let mut input_eos = false;
        let mut idle_iterations = 0u32;

        loop {
            if self.signals.stop_requested() {
                return Ok(AudioExit::Stopped);
            }
            if idle_iterations >= self.stall_limit {
                warn!("audio decoder produced no output for {} iterations", idle_iterations);
                return Ok(AudioExit::Stalled);
            }
            if self.state.load() == PlaybackState::Paused {
                tokio::time::sleep(self.pause_poll).await;
                continue;
            }
            idle_iterations += 1;

            let AudioPipeline {
                demuxer,
                decoder,
                sink,
                ..
            } = &mut self.pipeline;
            let (Some(demuxer), Some(decoder), Some(sink)) =
                (demuxer.as_deref_mut(), decoder.as_deref_mut(), sink.as_deref_mut())
            else {
                return Err(FrameStepError::Codec("audio pipeline is not open".into()));
            };

            if !input_eos {
                if let Some(offset_us) = self.signals.take_seek() {
                    debug!("audio seek to {} us", offset_us);
                    demuxer.seek(offset_us, SeekMode::PreviousSync)?;
                }

                match decoder.dequeue_input_buffer(self.codec_timeout).await? {
                    Some(slot) => match demuxer.read_sample().await? {
                        Some(sample) => {
                            let flags = sample.flags();
                            decoder.queue_input_buffer(slot, sample.data, sample.pts_us, flags)?;
                            demuxer.advance();
                        }
                        None => {
                            decoder.queue_input_buffer(
                                slot,
                                Bytes::new(),
                                0,
                                BufferFlags::END_OF_STREAM,
                            )?;
                            input_eos = true;
                            debug!("audio input reached end-of-stream");
                        }
                    },
                    None => trace!("no audio input buffer available"),
                }
            }

            match decoder.dequeue_output_buffer(self.codec_timeout).await? {
                OutputStatus::Buffer(output) => {
                    if output.size > 0 {
                        idle_iterations = 0;
                    }
                    let chunk = decoder.output_buffer(output.index).unwrap_or_default();
                    let mut written = 0;
                    while written < chunk.len() && !self.signals.stop_requested() {
                        let accepted = sink.write(&chunk[written..]).await?;
                        if accepted == 0 {
                            break;
                        }
                        written += accepted;
                    }
                    if written > 0 {
                        self.wrote_audio = true;
                    }
                    decoder.release_output_buffer(output.index, false)?;
                    if output.is_end_of_stream() {
                        return Ok(AudioExit::EndOfStream);
                    }
                }
                OutputStatus::BuffersChanged => debug!("audio output buffers changed"),
                OutputStatus::FormatChanged(format) => {
                    debug!("audio output format changed: {:?}", format)
                }
                OutputStatus::TryAgainLater => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::MediaFormat;
    use crate::backend::memory::MemoryBackendOptions;
    use crate::backend::{MemoryBackend, MemorySource, MemorySurface, MemoryTrack};
    use crate::codec::PresentationSurface;
    use crate::player::session::{open_session, DecodeSession, SessionRequest};
    use pretty_assertions::assert_eq;

    fn backend(options: MemoryBackendOptions) -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::with_options(options));
        backend.register(
            "av.mp4",
            MemorySource::new()
                .with_track(MemoryTrack::video_frames(
                    MediaFormat::video("video/avc", 320, 240, 25, 400_000),
                    10,
                    5,
                ))
                .with_track(MemoryTrack::pcm_chunks(
                    MediaFormat::audio("audio/raw", 8_000, 1, 64_000),
                    4,
                    256,
                )),
        );
        backend
    }

    fn open_audio(
        backend: &Arc<MemoryBackend>,
        config: &EngineConfig,
    ) -> (DecodeSession, AudioPipeline) {
        let surface: Arc<dyn PresentationSurface> = Arc::new(MemorySurface::new());
        let request = SessionRequest {
            source: "av.mp4".into(),
            frame_interval_ms: None,
        };
        let mut session = open_session(&**backend, &surface, config, &request, 1).unwrap();
        let pipeline = session.audio.take().unwrap();
        (session, pipeline)
    }

    async fn run_audio(
        backend: &Arc<MemoryBackend>,
        config: &EngineConfig,
        signals: Arc<AudioSignals>,
    ) -> AudioExit {
        let (mut session, pipeline) = open_audio(backend, config);
        let state = Arc::new(StateCell::new(PlaybackState::Running));
        let exit = AudioLoop::new(pipeline, backend.clone(), signals, state, config)
            .run()
            .await;
        session.video.close();
        exit
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_track_through_format_change() {
        let backend = backend(MemoryBackendOptions {
            decoder_latency: 2,
            announce_audio_format: true,
            ..Default::default()
        });

        let exit = run_audio(&backend, &EngineConfig::default(), Arc::new(AudioSignals::new(false))).await;

        assert_eq!(exit, AudioExit::EndOfStream);
        let log = backend.audio_log();
        assert_eq!(log.bytes_written, 4 * 256);
        assert_eq!(log.flushes, 1);
        assert!(backend.resources().all_released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_decoder_ends_loop() {
        // latency above the slot count: no output is ever produced
        let backend = backend(MemoryBackendOptions {
            decoder_latency: 16,
            ..Default::default()
        });
        let config = EngineConfig {
            audio_stall_limit: 5,
            ..Default::default()
        };

        let exit = run_audio(&backend, &config, Arc::new(AudioSignals::new(true))).await;

        assert_eq!(exit, AudioExit::Stalled);
        assert_eq!(backend.audio_log().bytes_written, 0);
        assert!(backend.resources().all_released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_skips_flush() {
        let backend = backend(MemoryBackendOptions::default());
        let signals = Arc::new(AudioSignals::new(true));
        signals.request_stop();

        let exit = run_audio(&backend, &EngineConfig::default(), signals).await;

        assert_eq!(exit, AudioExit::Stopped);
        assert_eq!(backend.audio_log().flushes, 0);
        assert!(backend.resources().all_released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_seek_starts_at_previous_sync() {
        // chunks start at 0, 16, 32 and 48 ms; only the last two remain
        let backend = backend(MemoryBackendOptions::default());
        let signals = Arc::new(AudioSignals::new(false));
        signals.request_seek(32_000);

        let exit = run_audio(&backend, &EngineConfig::default(), signals.clone()).await;

        assert_eq!(exit, AudioExit::EndOfStream);
        assert_eq!(backend.audio_log().bytes_written, 2 * 256);
        assert_eq!(signals.take_seek(), None);
        assert!(backend.resources().all_released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_loop_waits_for_resume() {
        let backend = backend(MemoryBackendOptions::default());
        let config = EngineConfig {
            audio_stall_limit: 5,
            ..Default::default()
        };
        let (mut session, pipeline) = open_audio(&backend, &config);
        let state = Arc::new(StateCell::new(PlaybackState::Paused));
        let signals = Arc::new(AudioSignals::new(false));
        let handle = tokio::spawn(
            AudioLoop::new(pipeline, backend.clone(), signals.clone(), state.clone(), &config)
                .run(),
        );

        // far longer than the stall limit would allow if paused polls counted
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(backend.audio_log().bytes_written, 0);
        assert!(signals.is_running());

        state.store(PlaybackState::Running);
        assert_eq!(handle.await.unwrap(), AudioExit::EndOfStream);
        assert_eq!(backend.audio_log().bytes_written, 4 * 256);

        session.video.close();
        assert!(backend.resources().all_released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_marks_signals_finished() {
        let backend = backend(MemoryBackendOptions::default());
        let signals = Arc::new(AudioSignals::new(false));
        assert!(signals.is_running());

        let exit = run_audio(&backend, &EngineConfig::default(), signals.clone()).await;

        assert_eq!(exit, AudioExit::EndOfStream);
        assert!(!signals.is_running());
    }

    #[test]
    fn test_seek_request_is_consumed_once() {
        let signals = AudioSignals::new(false);
        assert_eq!(signals.take_seek(), None);

        signals.request_seek(1_500_000);
        assert_eq!(signals.take_seek(), Some(1_500_000));
        assert_eq!(signals.take_seek(), None);

        signals.request_seek(10);
        signals.clear_seek();
        assert_eq!(signals.take_seek(), None);
    }

    #[test]
    fn test_stop_and_loop_flags() {
        let signals = AudioSignals::new(true);
        assert!(signals.loop_forever());
        assert!(!signals.stop_requested());

        signals.request_stop();
        signals.set_loop_forever(false);
        assert!(signals.stop_requested());
        assert!(!signals.loop_forever());
    }
}
