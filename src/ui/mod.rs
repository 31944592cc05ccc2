//! Embeds y botones del panel de música.

pub mod buttons;
pub mod embeds;
