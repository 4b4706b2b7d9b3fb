//! Mixer configuration.

use serde::{Deserialize, Serialize};

use crate::audio::format::{AudioFormat, SampleWidth};
use crate::error::{MixerError, MixerResult};

/// Settings fixed for the lifetime of a mixer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Output and internal sample rate in Hz. Sources must match it.
    pub sample_rate: u32,
    /// Bytes per sample: 1 or 2.
    pub sample_width: usize,
    pub big_endian: bool,
    /// Worker loop period.
    pub tick_ms: u64,
    /// Audio each device should have queued at the end of a tick.
    pub target_buffer_ms: u64,
    /// Decoded audio staged per playback.
    pub input_buffer_ms: u64,
    pub device_open_retries: usize,
    /// Device buffer growth between rejected open attempts.
    pub device_buffer_step_ms: u64,
    /// Threads refilling non-live input buffers.
    pub fill_threads: usize,
    /// Exercise the mixing paths on virtual outputs before going live.
    pub warmup: bool,
    /// Length of each synthetic warmup clip.
    pub warmup_clip_ms: u64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            sample_width: 2,
            big_endian: false,
            tick_ms: 10,
            target_buffer_ms: 30,
            input_buffer_ms: 500,
            device_open_retries: 5,
            device_buffer_step_ms: 10,
            fill_threads: 2,
            warmup: true,
            warmup_clip_ms: 40,
        }
    }
}

impl MixerConfig {
    pub fn validate(&self) -> MixerResult<()> {
        if self.sample_rate == 0 {
            return Err(MixerError::Config("sample_rate must be positive".to_string()));
        }
        SampleWidth::from_bytes(self.sample_width)
            .map_err(|err| MixerError::Config(err.to_string()))?;
        if self.tick_ms == 0 {
            return Err(MixerError::Config("tick_ms must be positive".to_string()));
        }
        if self.target_buffer_ms == 0 {
            return Err(MixerError::Config(
                "target_buffer_ms must be positive".to_string(),
            ));
        }
        if self.input_buffer_ms < self.target_buffer_ms * 2 {
            return Err(MixerError::Config(format!(
                "input_buffer_ms ({}) must be at least twice target_buffer_ms ({})",
                self.input_buffer_ms, self.target_buffer_ms
            )));
        }
        if self.fill_threads == 0 {
            return Err(MixerError::Config("fill_threads must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Mono layout every scenario is converted to.
    pub fn internal_format(&self) -> MixerResult<AudioFormat> {
        Ok(AudioFormat::new(
            self.sample_rate,
            SampleWidth::from_bytes(self.sample_width)?,
            1,
            self.big_endian,
        ))
    }

    /// Stereo layout written to every device.
    pub fn output_format(&self) -> MixerResult<AudioFormat> {
        Ok(self.internal_format()?.stereo())
    }
}
