//! PCM formats, audio sources and the per-playback input buffer.

pub mod convert;
pub mod decode;
pub mod format;
pub mod input_buffer;
pub mod resource;
