#[cfg(test)]
mod tests {
    use framestep::av::MediaFormat;
    use framestep::backend::{MemoryBackend, MemorySource, MemorySurface, MemoryTrack};
    use framestep::config::EngineConfig;
    use framestep::{FramePlayer, FrameStepError, PlayListener, PlaybackState};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::{sleep, Duration};

    const PCM_CHUNKS: usize = 8;
    const PCM_CHUNK_BYTES: usize = 1024;

    #[derive(Default)]
    struct Recorder {
        progress: Mutex<Vec<f32>>,
        completed: AtomicUsize,
        errors: Mutex<Vec<String>>,
        progress_after_completion: AtomicUsize,
    }

    impl Recorder {
        fn progress(&self) -> Vec<f32> {
            self.progress.lock().clone()
        }

        fn completed(&self) -> usize {
            self.completed.load(Ordering::SeqCst)
        }
    }

    impl PlayListener for Recorder {
        fn on_completed(&self) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_progress(&self, fraction: f32) {
            if self.completed() > 0 {
                self.progress_after_completion.fetch_add(1, Ordering::SeqCst);
            }
            self.progress.lock().push(fraction);
        }

        fn on_error(&self, error: &FrameStepError) {
            let kind = match error {
                FrameStepError::SourceUnreadable { .. } => "unreadable",
                FrameStepError::NoVideoTrack(_) => "no-video",
                FrameStepError::DecoderInit(_) => "decoder-init",
                _ => "other",
            };
            self.errors.lock().push(kind.to_string());
        }
    }

    fn video_track(frames: usize) -> MemoryTrack {
        let duration_us = frames as i64 * 40_000;
        MemoryTrack::video_frames(
            MediaFormat::video("video/avc", 640, 360, 25, duration_us),
            frames,
            5,
        )
    }

    fn audio_track() -> MemoryTrack {
        MemoryTrack::pcm_chunks(
            MediaFormat::audio("audio/raw", 44_100, 2, 46_000),
            PCM_CHUNKS,
            PCM_CHUNK_BYTES,
        )
    }

    fn setup(source: MemorySource) -> (Arc<MemoryBackend>, Arc<MemorySurface>, Arc<Recorder>, FramePlayer) {
        let backend = Arc::new(MemoryBackend::new());
        backend.register("clip.mp4", source);
        let surface = Arc::new(MemorySurface::new());
        let recorder = Arc::new(Recorder::default());

        let mut player =
            FramePlayer::with_config(backend.clone(), surface.clone(), EngineConfig::default());
        player.set_source_file("clip.mp4");
        player.set_play_listener(recorder.clone());
        player.execute().unwrap();
        (backend, surface, recorder, player)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..1000 {
            if condition() {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_progress_then_completion() {
        let (backend, surface, recorder, player) =
            setup(MemorySource::new().with_track(video_track(25)));

        player.start().unwrap();
        assert!(wait_for(|| recorder.completed() > 0).await);

        let expected: Vec<f32> = (1..=25u64)
            .map(|i| ((i * 40_000) as f64 / 1_000_000.0) as f32)
            .collect();
        assert_eq!(recorder.progress(), expected);
        assert_eq!(recorder.progress()[0], 0.04);
        assert_eq!(recorder.progress()[24], 1.0);
        assert_eq!(surface.frames_rendered(), 25);
        assert_eq!(player.state(), PlaybackState::Stopped);

        // nothing follows completion
        sleep(Duration::from_millis(500)).await;
        assert_eq!(recorder.completed(), 1);
        assert_eq!(recorder.progress().len(), 25);
        assert_eq!(recorder.progress_after_completion.load(Ordering::SeqCst), 0);
        assert!(backend.resources().all_released());

        player.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_ticks_are_dropped() {
        let (_backend, _surface, recorder, player) =
            setup(MemorySource::new().with_track(video_track(100)));

        player.start().unwrap();
        assert!(wait_for(|| recorder.progress().len() >= 3).await);

        player.pause().unwrap();
        assert_eq!(player.state(), PlaybackState::Paused);
        sleep(Duration::from_millis(5)).await;
        let frame = player.current_frame();
        let reported = recorder.progress().len();

        // ten ticker periods
        sleep(Duration::from_millis(400)).await;
        assert_eq!(player.current_frame(), frame);
        assert_eq!(recorder.progress().len(), reported);

        player.resume().unwrap();
        assert!(wait_for(|| recorder.progress().len() > reported).await);
        // resuming continues from the next frame instead of catching up
        assert!(player.current_frame() <= frame + 2);

        player.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotonic() {
        let (_backend, _surface, recorder, player) =
            setup(MemorySource::new().with_track(video_track(40)).with_track(audio_track()));

        player.start().unwrap();
        assert!(wait_for(|| recorder.completed() > 0).await);

        let progress = recorder.progress();
        assert_eq!(progress.len(), 40);
        assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));

        player.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_only_source_never_opens_audio() {
        let (backend, _surface, recorder, player) =
            setup(MemorySource::new().with_track(video_track(10)));

        player.start().unwrap();
        assert!(wait_for(|| recorder.completed() > 0).await);

        assert_eq!(recorder.progress().len(), 10);
        assert!(recorder.errors.lock().is_empty());
        let resources = backend.resources();
        assert_eq!(resources.sinks_opened, 0);
        // one video decoder and no audio decoder
        assert_eq!(resources.decoders_created, 1);
        assert!(backend.audio_log().opened.is_empty());
        assert!(!player.request_audio_seek(0));

        player.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_source_reports_error() {
        let (backend, _surface, recorder, mut player) =
            setup(MemorySource::new().with_track(video_track(10)));
        player.set_source_file("missing.mp4");

        player.start().unwrap();
        assert!(wait_for(|| !recorder.errors.lock().is_empty()).await);

        assert_eq!(*recorder.errors.lock(), vec!["unreadable".to_string()]);
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(recorder.progress().is_empty());
        assert!(backend.resources().all_released());

        player.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_surface_fails_session() {
        let (backend, surface, recorder, player) =
            setup(MemorySource::new().with_track(video_track(10)).with_track(audio_track()));
        surface.invalidate();

        player.start().unwrap();
        assert!(wait_for(|| !recorder.errors.lock().is_empty()).await);

        assert_eq!(*recorder.errors.lock(), vec!["decoder-init".to_string()]);
        assert_eq!(player.state(), PlaybackState::Stopped);
        let resources = backend.resources();
        assert_eq!(resources.sinks_opened, 1);
        assert!(resources.all_released());

        player.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_release_every_session() {
        let (backend, _surface, recorder, player) =
            setup(MemorySource::new().with_track(video_track(100)).with_track(audio_track()));

        for _ in 0..3 {
            player.start().unwrap();
            sleep(Duration::from_millis(100)).await;
            assert_eq!(player.state(), PlaybackState::Running);
        }
        player.shutdown().await;

        let resources = backend.resources();
        assert_eq!(resources.demuxers_opened, 6);
        assert_eq!(resources.decoders_created, 6);
        assert!(resources.all_released(), "{:?}", resources);
        assert_eq!(recorder.completed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_restarts_open_one_session() {
        let (backend, _surface, recorder, player) =
            setup(MemorySource::new().with_track(video_track(100)).with_track(audio_track()));

        player.start().unwrap();
        player.start().unwrap();
        player.start().unwrap();
        assert!(wait_for(|| !recorder.progress().is_empty()).await);

        assert_eq!(backend.resources().demuxers_opened, 2);
        // frames restart from zero in the surviving session
        assert_eq!(recorder.progress()[0], 0.01);

        player.shutdown().await;
        assert!(backend.resources().all_released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_frame_steps_while_paused() {
        let (_backend, surface, recorder, player) =
            setup(MemorySource::new().with_track(video_track(100)));

        player.start().unwrap();
        player.pause().unwrap();
        player.next_frame().unwrap();
        player.next_frame().unwrap();
        player.next_frame().unwrap();

        assert!(wait_for(|| recorder.progress().len() == 3).await);
        sleep(Duration::from_millis(200)).await;

        assert_eq!(recorder.progress(), vec![0.01, 0.02, 0.03]);
        assert_eq!(surface.frames_rendered(), 3);
        assert_eq!(player.current_frame(), 3);
        assert_eq!(player.state(), PlaybackState::Paused);

        player.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_ticks_and_audio() {
        let (backend, _surface, recorder, player) =
            setup(MemorySource::new().with_track(video_track(100)).with_track(audio_track()));
        player.set_loop_audio(true);

        player.start().unwrap();
        assert!(wait_for(|| recorder.progress().len() >= 2).await);
        assert_eq!(player.video_width(), 640);
        assert_eq!(player.video_height(), 360);

        player.stop().unwrap();
        player.stop().unwrap();
        assert!(!player.is_running());
        sleep(Duration::from_millis(5)).await;
        let reported = recorder.progress().len();

        assert!(wait_for(|| backend.resources().live_sinks() == 0).await);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(recorder.progress().len(), reported);
        assert_eq!(recorder.completed(), 0);

        player.shutdown().await;
        assert!(backend.resources().all_released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_plays_once_without_looping() {
        let (backend, _surface, _recorder, player) =
            setup(MemorySource::new().with_track(video_track(100)).with_track(audio_track()));

        player.start().unwrap();
        assert!(wait_for(|| backend.resources().live_sinks() == 0
            && backend.resources().sinks_opened == 1)
        .await);

        let log = backend.audio_log();
        assert_eq!(log.opened[0].sample_rate, 44_100);
        assert_eq!(log.bytes_written, PCM_CHUNKS * PCM_CHUNK_BYTES);
        assert_eq!(log.flushes, 1);
        assert!(player.is_running());
        // the track is done, so there is nothing left to seek
        assert!(!player.request_audio_seek(0));

        player.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_loops_when_enabled() {
        let (backend, _surface, _recorder, player) =
            setup(MemorySource::new().with_track(video_track(100)).with_track(audio_track()));
        player.set_loop_audio(true);

        assert!(!player.request_audio_seek(0));
        player.start().unwrap();
        assert!(wait_for(|| backend.audio_log().bytes_written > 3 * PCM_CHUNKS * PCM_CHUNK_BYTES).await);
        assert!(backend.resources().sinks_opened > 1);
        assert!(player.request_audio_seek(20_000));

        player.shutdown().await;
        assert!(backend.resources().all_released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overridden_interval_slows_audio() {
        let (backend, _surface, recorder, mut player) =
            setup(MemorySource::new().with_track(video_track(100)).with_track(audio_track()));
        player.set_frame_interval(10).unwrap();

        player.start().unwrap();
        assert!(wait_for(|| !recorder.progress().is_empty()).await);

        // 100 ms ticks over a 40 ms native period
        assert_eq!(backend.audio_log().opened[0].sample_rate, 17_640);
        assert_eq!(recorder.progress()[0], 0.025);

        player.shutdown().await;
    }
}
