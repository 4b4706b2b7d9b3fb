use std::time::Instant;

use crate::audio::format::AudioFormat;
use crate::error::{MixerError, MixerResult};

/// A hardware (or virtual) output that accepts interleaved PCM bytes.
pub trait AudioLine: Send {
    /// Prepare the line for `format` with roughly `buffer_bytes` of device
    /// buffering. Drivers may reject a size; callers retry with larger ones.
    fn open(&mut self, format: &AudioFormat, buffer_bytes: usize) -> MixerResult<()>;

    /// Begin physical playback of queued bytes.
    fn start(&mut self) -> MixerResult<()>;

    fn stop(&mut self);

    /// Queue whole frames. Must not block for longer than the device takes
    /// to accept them.
    fn write(&mut self, bytes: &[u8]) -> MixerResult<()>;

    /// Frames played by the device since it was opened.
    fn frame_position(&self) -> u64;

    fn close(&mut self);

    /// Label used in log lines.
    fn describe(&self) -> String;
}

/// Resolves output identifiers to concrete lines.
pub trait DeviceResolver {
    fn resolve(&self, name: &str) -> MixerResult<Box<dyn AudioLine>>;
}

/// Virtual line that consumes frames at the sample rate and discards them.
///
/// Used for warmup and headless runs.
#[derive(Debug, Default)]
pub struct NullLine {
    name: String,
    format: Option<AudioFormat>,
    started: Option<Instant>,
    frames_written: u64,
}

impl NullLine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl AudioLine for NullLine {
    fn open(&mut self, format: &AudioFormat, _buffer_bytes: usize) -> MixerResult<()> {
        self.format = Some(*format);
        self.frames_written = 0;
        self.started = None;
        Ok(())
    }

    fn start(&mut self) -> MixerResult<()> {
        if self.format.is_none() {
            return Err(MixerError::Device(format!("{} is not open", self.name)));
        }
        self.started.get_or_insert_with(Instant::now);
        Ok(())
    }

    fn stop(&mut self) {
        self.started = None;
    }

    fn write(&mut self, bytes: &[u8]) -> MixerResult<()> {
        let format = self
            .format
            .ok_or_else(|| MixerError::Device(format!("{} is not open", self.name)))?;
        format.check_aligned(bytes.len())?;
        self.frames_written += (bytes.len() / format.frame_size()) as u64;
        Ok(())
    }

    fn frame_position(&self) -> u64 {
        match (self.format, self.started) {
            (Some(format), Some(started)) => {
                let played = started.elapsed().as_secs_f64() * format.sample_rate as f64;
                (played as u64).min(self.frames_written)
            }
            _ => 0,
        }
    }

    fn close(&mut self) {
        self.format = None;
        self.started = None;
    }

    fn describe(&self) -> String {
        format!("null:{}", self.name)
    }
}
