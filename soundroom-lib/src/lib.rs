//! # Soundroom
//!
//! Spatial playback across several independent stereo outputs in one room.
//! Each [`scenario::Scenario`] places a moving sound source and listener in a
//! [`room::Room`]; the [`mixer::Mixer`] turns their positions into per-speaker
//! gains and mixes every active playback into the right device buffers once
//! per tick.

pub mod audio;
pub mod config;
pub mod error;
pub mod field;
pub mod mixer;
pub mod output;
pub mod room;
pub mod scenario;
pub mod tools;

pub use config::MixerConfig;
pub use error::{MixerError, MixerResult};
pub use mixer::{Mixer, MixerListener, MixerState};
