//! The serialized command worker and its ticker.
//!
//! Every "begin session" and "advance" command is handled by a single
//! [`Worker`] task in FIFO order, so a tick can never run against a session
//! that is being torn down or rebuilt.

use super::audio_loop::{AudioLoop, AudioSignals};
use super::session::{open_session, AudioTask, DecodeSession, SessionRequest};
use super::state::{PlaybackState, StateCell};
use super::video::{step, StepOutcome};
use super::PlayListener;
use crate::backend::MediaBackend;
use crate::codec::PresentationSurface;
use crate::config::EngineConfig;
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub(crate) enum Command {
    BeginSession {
        generation: u64,
        request: SessionRequest,
    },
    Advance {
        generation: u64,
        frame: u32,
    },
}

/// Handles that `start`/`stop` must swap atomically with the state change.
#[derive(Default)]
struct Control {
    ticker: Option<JoinHandle<()>>,
    audio: Option<Arc<AudioSignals>>,
}

impl Control {
    fn cancel(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if let Some(audio) = self.audio.take() {
            audio.request_stop();
            audio.clear_seek();
        }
    }
}

/// State shared by the caller-facing player, the worker and the ticker.
pub(crate) struct Shared {
    pub state: Arc<StateCell>,
    pub frame: AtomicU32,
    /// Bumped by every `start`; commands from older sessions are dropped.
    pub generation: AtomicU64,
    control: Mutex<Control>,
    pub listener: RwLock<Option<Arc<dyn PlayListener>>>,
    pub video_width: AtomicU32,
    pub video_height: AtomicU32,
    pub loop_audio: AtomicBool,
}

impl Shared {
    pub fn new(loop_audio: bool) -> Self {
        Self {
            state: Arc::new(StateCell::new(PlaybackState::Stopped)),
            frame: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            control: Mutex::new(Control::default()),
            listener: RwLock::new(None),
            video_width: AtomicU32::new(0),
            video_height: AtomicU32::new(0),
            loop_audio: AtomicBool::new(loop_audio),
        }
    }

    /// Stops whatever runs, resets the frame counter and enters `Running`
    /// under a fresh generation, which is returned.
    pub fn begin(&self) -> u64 {
        let mut control = self.control.lock();
        control.cancel();
        self.frame.store(0, Ordering::SeqCst);
        self.state.store(PlaybackState::Running);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn halt(&self) {
        let mut control = self.control.lock();
        control.cancel();
        self.state.store(PlaybackState::Stopped);
    }

    /// Halts only if `generation` is still the current one.
    pub fn halt_generation(&self, generation: u64) -> bool {
        let mut control = self.control.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        control.cancel();
        self.state.store(PlaybackState::Stopped);
        true
    }

    /// Forwards a seek to the live audio loop. Fails once the loop has
    /// exited, since nothing would consume the request.
    pub fn request_audio_seek(&self, offset_us: i64) -> bool {
        match &self.control.lock().audio {
            Some(signals) if signals.is_running() => {
                signals.request_seek(offset_us);
                true
            }
            _ => false,
        }
    }

    pub fn set_loop_audio(&self, enabled: bool) {
        self.loop_audio.store(enabled, Ordering::SeqCst);
        if let Some(signals) = &self.control.lock().audio {
            signals.set_loop_forever(enabled);
        }
    }

    pub fn listener(&self) -> Option<Arc<dyn PlayListener>> {
        self.listener.read().clone()
    }
}

/// Emits an "advance" for every period spent in `Running`.
///
/// The first tick fires immediately. Ticks while paused are dropped, not
/// queued, so resuming never catches up.
fn spawn_ticker(
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    generation: u64,
    interval_ms: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(interval_ms.max(1) as u64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if shared.generation.load(Ordering::SeqCst) != generation {
                break;
            }
            match shared.state.load() {
                PlaybackState::Running => {
                    let frame = shared.frame.fetch_add(1, Ordering::SeqCst);
                    if commands.send(Command::Advance { generation, frame }).is_err() {
                        break;
                    }
                }
                PlaybackState::Paused => trace!("tick dropped while paused"),
                PlaybackState::Stopped => break,
            }
        }
        debug!("ticker for session {} finished", generation);
    })
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
    backend: Arc<dyn MediaBackend>,
    surface: Arc<dyn PresentationSurface>,
    config: EngineConfig,
    commands: mpsc::UnboundedSender<Command>,
    session: Option<DecodeSession>,
}

impl Worker {
    pub fn new(
        shared: Arc<Shared>,
        backend: Arc<dyn MediaBackend>,
        surface: Arc<dyn PresentationSurface>,
        config: EngineConfig,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            shared,
            backend,
            surface,
            config,
            commands,
            session: None,
        }
    }

    /// Processes commands until `shutdown` fires or its sender is dropped,
    /// then releases the current session.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        info!("frame player worker started");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }
        self.shared.halt();
        self.close_session().await;
        info!("frame player worker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::BeginSession {
                generation,
                request,
            } => self.begin_session(generation, request).await,
            Command::Advance { generation, frame } => self.advance(generation, frame).await,
        }
    }

    async fn begin_session(&mut self, generation: u64, request: SessionRequest) {
        self.close_session().await;
        if self.shared.generation.load(Ordering::SeqCst) != generation {
            debug!("skipping superseded session {}", generation);
            return;
        }

        match open_session(
            &*self.backend,
            &self.surface,
            &self.config,
            &request,
            generation,
        ) {
            Ok(session) => self.activate(session),
            Err(e) => {
                error!("failed to open {}: {}", request.source.display(), e);
                self.shared.halt_generation(generation);
                if let Some(listener) = self.shared.listener() {
                    listener.on_error(&e);
                }
            }
        }
    }

    /// Starts the ticker and audio loop for a freshly opened session, unless
    /// the caller stopped or restarted while it was opening.
    fn activate(&mut self, mut session: DecodeSession) {
        let shared = self.shared.clone();
        let mut control = shared.control.lock();
        if shared.generation.load(Ordering::SeqCst) != session.generation
            || shared.state.load() == PlaybackState::Stopped
        {
            drop(control);
            debug!("session {} stopped before it started", session.generation);
            drop(session);
            return;
        }

        shared
            .video_width
            .store(session.video_track.width.unwrap_or(0), Ordering::SeqCst);
        shared
            .video_height
            .store(session.video_track.height.unwrap_or(0), Ordering::SeqCst);

        if let Some(pipeline) = session.audio.take() {
            if let Some(track) = &session.audio_track {
                debug!(
                    "starting audio loop for track {} ({})",
                    track.index, track.media_type
                );
            }
            let signals = Arc::new(AudioSignals::new(shared.loop_audio.load(Ordering::SeqCst)));
            let audio_loop = AudioLoop::new(
                pipeline,
                self.backend.clone(),
                signals.clone(),
                shared.state.clone(),
                &self.config,
            );
            control.audio = Some(signals.clone());
            session.audio_task = Some(AudioTask {
                signals,
                handle: Some(tokio::spawn(audio_loop.run())),
            });
        }

        control.ticker = Some(spawn_ticker(
            shared.clone(),
            self.commands.clone(),
            session.generation,
            session.frame_interval_ms,
        ));
        drop(control);

        info!(
            "session {} playing at {} ms/frame",
            session.generation, session.frame_interval_ms
        );
        self.session = Some(session);
    }

    async fn advance(&mut self, generation: u64, frame: u32) {
        let Some(session) = self.session.as_mut() else {
            trace!("frame {}: no session", frame);
            return;
        };
        if session.generation != generation {
            trace!("frame {}: stale tick for session {}", frame, generation);
            return;
        }

        let outcome = step(
            &mut session.video,
            frame,
            session.frame_interval_ms,
            session.duration_us,
            self.config.codec_timeout,
        )
        .await;

        match outcome {
            Ok(StepOutcome::Rendered { progress }) => {
                if let (Some(fraction), Some(listener)) = (progress, self.shared.listener()) {
                    listener.on_progress(fraction);
                }
            }
            Ok(StepOutcome::EndOfStream) => {
                info!("session {} reached end of video", generation);
                self.shared.halt_generation(generation);
                if let Some(listener) = self.shared.listener() {
                    listener.on_completed();
                }
                self.close_session().await;
            }
            Ok(StepOutcome::NoOutput | StepOutcome::InputUnavailable | StepOutcome::Idle) => {}
            // the next tick retries against the same session
            Err(e) => warn!("frame {}: video step failed: {}", frame, e),
        }
    }

    async fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}
