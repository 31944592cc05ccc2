//! # Audio Module
//!
//! Queue and playback engine for Open Jukebox.
//!
//! This module provides the core playback functionality:
//! - Per-guild queue state with loop, autoplay, shuffle and history
//! - A playback state machine that reacts to user commands and stream completions
//! - The [`sink::Sink`] seam that streams audio (Songbird in production)
//!
//! ## Architecture
//!
//! ### [`queue`] - Session State
//! - Strongly typed per-guild record (queue, current, previous, flags, volume)
//! - Pure selection logic: loop > queue > autoplay > end of queue
//!
//! ### [`registry`] - Session Registry
//! - Concurrent map from guild to session, one lock per session
//! - Sole creation and destruction path for sessions
//!
//! ### [`player`] - Playback Engine
//! - Serializes every operation of a session behind its lock
//! - Tags each stream with a generation so stale completions are discarded
//! - Resolves autoplay tracks without holding the session lock
//!
//! ### [`sink`] / [`songbird_sink`] - Audio Output
//! - Collaborator trait plus the Songbird voice implementation
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use open_jukebox::audio::{player::PlaybackEngine, registry::SessionId};
//! use open_jukebox::sources::Requester;
//!
//! # async fn example(engine: PlaybackEngine) -> anyhow::Result<()> {
//! let guild = SessionId(123456789);
//!
//! engine.play(guild, "never gonna give you up", Requester::new(1, "ana")).await?;
//! engine.pause_resume(guild).await?;
//! engine.skip(guild).await;
//! engine.stop(guild).await?;
//! # Ok(())
//! # }
//! ```

pub mod player;
pub mod queue;
pub mod registry;
pub mod sink;
pub mod songbird_sink;

/// Volumen mínimo permitido
pub const MIN_VOLUME: f32 = 0.1;
/// Volumen máximo permitido
pub const MAX_VOLUME: f32 = 2.0;
pub const DEFAULT_VOLUME: f32 = 1.0;

/// Paso de volumen usado por los botones del panel
pub const VOLUME_STEP: f32 = 0.1;
