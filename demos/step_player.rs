use framestep::av::MediaFormat;
use framestep::backend::{MemoryBackend, MemorySource, MemorySurface, MemoryTrack};
use framestep::{FramePlayer, FrameStepError, PlayListener};
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

struct ConsoleListener {
    done: AtomicBool,
}

impl PlayListener for ConsoleListener {
    fn on_completed(&self) {
        println!("Playback completed");
        self.done.store(true, Ordering::SeqCst);
    }

    fn on_progress(&self, fraction: f32) {
        println!("  progress {:5.1}%", fraction.min(1.0) * 100.0);
    }

    fn on_error(&self, error: &FrameStepError) {
        println!("Playback failed: {}", error);
        self.done.store(true, Ordering::SeqCst);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Tick rate, defaults to the track's own frame rate
    let fps = std::env::args().nth(1).map(|arg| arg.parse::<u32>()).transpose()?;

    let backend = Arc::new(MemoryBackend::new());
    backend.register(
        "demo.mp4",
        MemorySource::new()
            .with_track(MemoryTrack::video_frames(
                MediaFormat::video("video/avc", 1280, 720, 25, 2_000_000),
                50,
                10,
            ))
            .with_track(MemoryTrack::pcm_chunks(
                MediaFormat::audio("audio/raw", 48_000, 2, 2_000_000),
                94,
                4096,
            )),
    );

    let surface = Arc::new(MemorySurface::new());
    let listener = Arc::new(ConsoleListener {
        done: AtomicBool::new(false),
    });

    let mut player = FramePlayer::new(backend.clone(), surface.clone());
    player.set_source_file("demo.mp4");
    if let Some(fps) = fps {
        player.set_frame_interval(fps)?;
    }
    player.set_play_listener(listener.clone());
    player.execute()?;

    println!("Stepping three frames by hand");
    player.start()?;
    player.pause()?;
    for _ in 0..3 {
        player.next_frame()?;
        sleep(Duration::from_millis(200)).await;
    }

    println!("Resuming timed playback");
    player.resume()?;
    while !listener.done.load(Ordering::SeqCst) {
        sleep(Duration::from_millis(100)).await;
    }

    println!(
        "Rendered {} frames at {}x{}",
        surface.frames_rendered(),
        player.video_width(),
        player.video_height()
    );
    let audio = backend.audio_log();
    println!(
        "Audio: {} bytes in {} writes across {} sink(s)",
        audio.bytes_written,
        audio.writes,
        audio.opened.len()
    );

    player.shutdown().await;
    println!("Released everything: {}", backend.resources().all_released());
    Ok(())
}
