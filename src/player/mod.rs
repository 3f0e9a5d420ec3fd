//! Frame-steppable playback engine.
//!
//! [`FramePlayer`] demuxes a source into a video and an optional audio
//! pipeline. Video advances one frame per tick, either from the periodic
//! ticker or from [`FramePlayer::next_frame`]; audio decodes and plays on its
//! own task, paced only by the decoder and sink.
//!
//! ```rust,no_run
//! use framestep::backend::{MemoryBackend, MemorySurface};
//! use framestep::FramePlayer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> framestep::Result<()> {
//!     let backend = Arc::new(MemoryBackend::new());
//!     let mut player = FramePlayer::new(backend, Arc::new(MemorySurface::new()));
//!     player.set_source_file("clip.mp4");
//!     player.set_frame_interval(12)?;
//!     player.execute()?;
//!     player.start()?;
//!     Ok(())
//! }
//! ```

mod audio_loop;
mod controller;
mod session;
mod state;
mod video;

pub use state::PlaybackState;

use crate::backend::MediaBackend;
use crate::codec::PresentationSurface;
use crate::config::{self, EngineConfig};
use crate::{FrameStepError, Result};
use controller::{Command, Shared, Worker};
use log::{debug, info};
use session::SessionRequest;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Callbacks from a running [`FramePlayer`].
///
/// Called from the player's worker task; implementations should return
/// quickly.
pub trait PlayListener: Send + Sync {
    /// The video track ran out of samples. Fired once per session.
    fn on_completed(&self);

    /// A frame was rendered. `fraction` is `(frame + 1) * interval / duration`
    /// and is not clamped, so it may exceed 1.0 on the last frames.
    fn on_progress(&self, fraction: f32);

    /// A session could not be opened.
    fn on_error(&self, _error: &FrameStepError) {}
}

struct Engine {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

/// Frame-stepping media player.
pub struct FramePlayer {
    shared: Arc<Shared>,
    backend: Arc<dyn MediaBackend>,
    surface: Arc<dyn PresentationSurface>,
    config: EngineConfig,
    source: Option<PathBuf>,
    frame_interval_ms: Option<u32>,
    engine: Option<Engine>,
}

impl FramePlayer {
    /// Creates a player using the process-wide configuration.
    pub fn new(backend: Arc<dyn MediaBackend>, surface: Arc<dyn PresentationSurface>) -> Self {
        Self::with_config(backend, surface, config::current())
    }

    pub fn with_config(
        backend: Arc<dyn MediaBackend>,
        surface: Arc<dyn PresentationSurface>,
        config: EngineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(config.loop_audio)),
            backend,
            surface,
            config,
            source: None,
            frame_interval_ms: None,
            engine: None,
        }
    }

    /// Sets the file played by the next [`start`](Self::start).
    pub fn set_source_file<P: AsRef<Path>>(&mut self, path: P) {
        self.source = Some(path.as_ref().to_path_buf());
    }

    /// Ticks `fps` times per second instead of at the track's frame rate.
    ///
    /// Applies from the next session. `fps` must be within `1..=100`.
    pub fn set_frame_interval(&mut self, fps: u32) -> Result<()> {
        if !(1..=100).contains(&fps) {
            return Err(FrameStepError::InvalidConfiguration(format!(
                "frame rate must be between 1 and 100, got {}",
                fps
            )));
        }
        self.frame_interval_ms = Some(1000 / fps);
        Ok(())
    }

    /// The configured tick period in milliseconds, if one was set.
    pub fn frame_interval(&self) -> Option<u32> {
        self.frame_interval_ms
    }

    pub fn set_play_listener(&self, listener: Arc<dyn PlayListener>) {
        *self.shared.listener.write() = Some(listener);
    }

    /// Restart audio from the beginning whenever it ends. Takes effect on the
    /// running session too.
    pub fn set_loop_audio(&self, enabled: bool) {
        self.shared.set_loop_audio(enabled);
    }

    /// Spawns the command worker on the current tokio runtime.
    ///
    /// Must be called once before any control call. Calling it again is a
    /// no-op.
    pub fn execute(&mut self) -> Result<()> {
        let handle = Handle::try_current().map_err(|e| {
            FrameStepError::InvalidConfiguration(format!("execute needs a tokio runtime: {}", e))
        })?;
        self.execute_on(&handle);
        Ok(())
    }

    /// Spawns the command worker on `handle`.
    pub fn execute_on(&mut self, handle: &Handle) {
        if self.engine.is_some() {
            debug!("frame player already executing");
            return;
        }
        let (commands, receiver) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let worker = Worker::new(
            self.shared.clone(),
            self.backend.clone(),
            self.surface.clone(),
            self.config.clone(),
            commands.clone(),
        );
        let worker = handle.spawn(worker.run(receiver, shutdown_rx));
        self.engine = Some(Engine {
            commands,
            shutdown: Some(shutdown),
            worker: Some(worker),
        });
    }

    fn engine(&self) -> Result<&Engine> {
        self.engine.as_ref().ok_or(FrameStepError::NotExecuting)
    }

    /// Stops any current playback and opens a new session on the source file.
    ///
    /// Session setup runs on the worker; failures are reported through
    /// [`PlayListener::on_error`] and leave the player stopped.
    pub fn start(&self) -> Result<()> {
        let engine = self.engine()?;
        let source = self.source.clone().ok_or_else(|| {
            FrameStepError::InvalidConfiguration("no source file set".into())
        })?;
        let generation = self.shared.begin();
        info!("starting session {} for {}", generation, source.display());
        engine
            .commands
            .send(Command::BeginSession {
                generation,
                request: SessionRequest {
                    source,
                    frame_interval_ms: self.frame_interval_ms,
                },
            })
            .map_err(|_| FrameStepError::NotExecuting)
    }

    /// Cancels the ticker and the audio loop. Idempotent.
    pub fn stop(&self) -> Result<()> {
        self.engine()?;
        self.shared.halt();
        debug!("playback stopped");
        Ok(())
    }

    /// Drops ticks until [`resume`](Self::resume). Only affects a running
    /// player.
    pub fn pause(&self) -> Result<()> {
        self.engine()?;
        if self.shared.state.transition(PlaybackState::Running, PlaybackState::Paused) {
            debug!("playback paused");
        }
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.engine()?;
        if self.shared.state.transition(PlaybackState::Paused, PlaybackState::Running) {
            debug!("playback resumed");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state() == PlaybackState::Running
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state.load()
    }

    /// Advances exactly one frame, whether running, paused or stopped.
    pub fn next_frame(&self) -> Result<()> {
        let engine = self.engine()?;
        let frame = self.shared.frame.fetch_add(1, Ordering::SeqCst);
        let generation = self.shared.generation.load(Ordering::SeqCst);
        engine
            .commands
            .send(Command::Advance { generation, frame })
            .map_err(|_| FrameStepError::NotExecuting)
    }

    /// Index the next tick will carry.
    pub fn current_frame(&self) -> u32 {
        self.shared.frame.load(Ordering::SeqCst)
    }

    /// Width of the current video track, 0 before the first session opens.
    pub fn video_width(&self) -> u32 {
        self.shared.video_width.load(Ordering::SeqCst)
    }

    pub fn video_height(&self) -> u32 {
        self.shared.video_height.load(Ordering::SeqCst)
    }

    /// Asks the audio loop to seek to `offset_us`. Returns `false` when no
    /// audio is playing, including after the audio track has finished. The
    /// request is applied only while audio input is still being read.
    pub fn request_audio_seek(&self, offset_us: i64) -> bool {
        self.shared.request_audio_seek(offset_us)
    }

    /// Stops playback, ends the worker and waits until every session
    /// resource has been released.
    pub async fn shutdown(mut self) {
        let Some(mut engine) = self.engine.take() else {
            return;
        };
        self.shared.halt();
        if let Some(shutdown) = engine.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(worker) = engine.worker.take() {
            if let Err(e) = worker.await {
                log::warn!("frame player worker failed: {}", e);
            }
        }
    }
}

impl Drop for FramePlayer {
    fn drop(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            self.shared.halt();
            if let Some(shutdown) = engine.shutdown.take() {
                let _ = shutdown.send(());
            }
        }
    }
}
