//! # Open Jukebox
//!
//! Per-guild music queue and playback engine with a Discord front end.
//!
//! - [`audio`]: session state, playback engine, session registry and audio sinks
//! - [`sources`]: track model, resolvers and autoplay strategies
//! - [`bot`] / [`ui`]: Serenity event handler, slash commands and the control panel
//! - [`config`]: environment based configuration

pub mod audio;
pub mod bot;
pub mod config;
pub mod sources;
pub mod ui;
