#![doc(html_root_url = "https://docs.rs/framestep/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # framestep - frame-steppable media playback
//!
//! `framestep` plays a local media file one video frame at a time. Video
//! advances on a caller-controlled tick, either a periodic ticker or manual
//! single steps, while an audio track, if present, decodes and plays on its
//! own task.
//!
//! Demuxing, decoding and audio output are capabilities supplied through a
//! [`backend::MediaBackend`]; the crate ships an in-memory backend used by
//! the tests and the demo.
//!
//! ## Features
//!
//! - Timer-driven or single-step video advancement with progress reporting
//! - Independent audio decode/render loop with optional looping
//! - Pause/resume that drops ticks instead of queueing them
//! - Deterministic teardown of every demuxer, decoder and sink
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use framestep::av::MediaFormat;
//! use framestep::backend::{MemoryBackend, MemorySource, MemorySurface, MemoryTrack};
//! use framestep::{FramePlayer, PlayListener};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl PlayListener for Printer {
//!     fn on_completed(&self) {
//!         println!("done");
//!     }
//!
//!     fn on_progress(&self, fraction: f32) {
//!         println!("{:.0}%", fraction.min(1.0) * 100.0);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> framestep::Result<()> {
//!     let backend = Arc::new(MemoryBackend::new());
//!     backend.register(
//!         "clip.mp4",
//!         MemorySource::new().with_track(MemoryTrack::video_frames(
//!             MediaFormat::video("video/avc", 640, 360, 25, 1_000_000),
//!             25,
//!             5,
//!         )),
//!     );
//!
//!     let mut player = FramePlayer::new(backend, Arc::new(MemorySurface::new()));
//!     player.set_source_file("clip.mp4");
//!     player.set_play_listener(Arc::new(Printer));
//!     player.execute()?;
//!     player.start()?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(2)).await;
//!     player.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `player`: the playback controller, session management and both pipelines
//! - `backend`: the capability factory and the in-memory implementation
//! - `format`: the demuxer capability and track selection
//! - `codec`: the decoder capability and presentation surfaces
//! - `audio`: the PCM sink capability
//! - `av`: packets, media formats and track descriptors
//! - `config`: engine tunables from environment and config files
//! - `error`: error types and the `Result` alias

/// Audio output sink capability
pub mod audio;

/// Audio/Video base types
pub mod av;

/// Media backends supplying demuxers, decoders and sinks
pub mod backend;

/// Decoder capability
pub mod codec;

/// Configuration module
pub mod config;

/// Error types and utilities
pub mod error;

/// Demuxer capability and track selection
pub mod format;

/// Frame-stepping player
pub mod player;

pub use error::{FrameStepError, Result};
pub use player::{FramePlayer, PlayListener, PlaybackState};
