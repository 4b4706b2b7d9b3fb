//! Error types shared across the mixing engine.

use thiserror::Error;

use crate::mixer::MixerState;
use crate::room::RoomId;

/// Errors raised by mixer construction, lifecycle, and scenario handling.
#[derive(Error, Debug)]
pub enum MixerError {
    /// Invalid room, device binding, or config value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An output device could not be resolved or opened.
    #[error("audio device error: {0}")]
    Device(String),

    /// A lifecycle call was made from a state that does not allow it.
    #[error("cannot move mixer from {from:?} to {to:?}")]
    InvalidTransition { from: MixerState, to: MixerState },

    /// An operation that needs a running mixer was called in another state.
    #[error("mixer is not running (state {0:?})")]
    NotRunning(MixerState),

    /// A scenario was built for a different room than the mixer's.
    #[error("scenario room {scenario:?} does not match mixer room {mixer:?}")]
    RoomMismatch { scenario: RoomId, mixer: RoomId },

    /// Live resources cannot be rewound.
    #[error("live resource cannot be restarted")]
    LiveRestart,

    /// A byte count that is not a whole number of frames.
    #[error("{bytes} bytes is not a multiple of the {frame_size}-byte frame")]
    Misaligned { bytes: usize, frame_size: usize },

    /// A read was attempted without enough buffered data.
    #[error("requested {requested} bytes but only {available} are buffered")]
    Underflow { requested: usize, available: usize },

    /// Draining was requested while the source can still deliver data.
    #[error("input source is still open")]
    SourceOpen,

    /// Unsupported or mismatched audio format.
    #[error("unsupported audio format: {0}")]
    Format(String),

    /// Decoding a media resource failed.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for mixer operations.
pub type MixerResult<T> = Result<T, MixerError>;
