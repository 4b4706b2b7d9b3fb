//! PCM format description and sample (de)serialization.

use serde::{Deserialize, Serialize};

use crate::error::{MixerError, MixerResult};

/// Width of one signed PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleWidth {
    /// One signed byte per sample.
    Eight,
    /// Two bytes per sample, byte order given by the format.
    Sixteen,
}

impl SampleWidth {
    /// Build a width from a byte count (`1` or `2`).
    pub fn from_bytes(bytes: usize) -> MixerResult<Self> {
        match bytes {
            1 => Ok(Self::Eight),
            2 => Ok(Self::Sixteen),
            other => Err(MixerError::Format(format!(
                "{} byte samples are not supported",
                other
            ))),
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            Self::Eight => 1,
            Self::Sixteen => 2,
        }
    }

    /// Smallest representable sample value.
    pub fn min_value(self) -> i32 {
        match self {
            Self::Eight => i8::MIN as i32,
            Self::Sixteen => i16::MIN as i32,
        }
    }

    /// Largest representable sample value.
    pub fn max_value(self) -> i32 {
        match self {
            Self::Eight => i8::MAX as i32,
            Self::Sixteen => i16::MAX as i32,
        }
    }
}

/// Signed PCM stream layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub width: SampleWidth,
    pub channels: u16,
    pub big_endian: bool,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, width: SampleWidth, channels: u16, big_endian: bool) -> Self {
        Self {
            sample_rate,
            width,
            channels,
            big_endian,
        }
    }

    /// Same layout with a single channel.
    pub fn mono(&self) -> Self {
        Self { channels: 1, ..*self }
    }

    /// Same layout with two interleaved channels.
    pub fn stereo(&self) -> Self {
        Self { channels: 2, ..*self }
    }

    /// Bytes per frame (one sample for every channel).
    pub fn frame_size(&self) -> usize {
        self.width.bytes() * self.channels.max(1) as usize
    }

    /// Number of whole frames covering `ms` milliseconds.
    pub fn frames_for_ms(&self, ms: u64) -> usize {
        ((self.sample_rate as u64 * ms) / 1000) as usize
    }

    pub fn bytes_for_frames(&self, frames: usize) -> usize {
        frames * self.frame_size()
    }

    /// Reject byte counts that would split a frame.
    pub fn check_aligned(&self, bytes: usize) -> MixerResult<()> {
        let frame_size = self.frame_size();
        if bytes % frame_size != 0 {
            return Err(MixerError::Misaligned { bytes, frame_size });
        }
        Ok(())
    }

    /// Round `bytes` up to the next whole frame.
    pub fn round_up_to_frame(&self, bytes: usize) -> usize {
        let frame_size = self.frame_size();
        bytes.div_ceil(frame_size) * frame_size
    }
}

/// Read one sample starting at `bytes[0]`.
pub fn read_sample(bytes: &[u8], width: SampleWidth, big_endian: bool) -> i32 {
    match width {
        SampleWidth::Eight => bytes[0] as i8 as i32,
        SampleWidth::Sixteen => {
            let pair = [bytes[0], bytes[1]];
            if big_endian {
                i16::from_be_bytes(pair) as i32
            } else {
                i16::from_le_bytes(pair) as i32
            }
        }
    }
}

/// Write one sample into `out[..width.bytes()]`.
///
/// The value must already be inside the width's range.
pub fn write_sample(value: i32, out: &mut [u8], width: SampleWidth, big_endian: bool) {
    match width {
        SampleWidth::Eight => out[0] = value as i8 as u8,
        SampleWidth::Sixteen => {
            let encoded = if big_endian {
                (value as i16).to_be_bytes()
            } else {
                (value as i16).to_le_bytes()
            };
            out[..2].copy_from_slice(&encoded);
        }
    }
}

/// Decode every sample in `bytes` (all channels, interleaved order).
pub fn decode_samples(bytes: &[u8], format: &AudioFormat) -> Vec<i32> {
    let width = format.width.bytes();
    bytes
        .chunks_exact(width)
        .map(|chunk| read_sample(chunk, format.width, format.big_endian))
        .collect()
}

/// Encode samples into `out`, replacing its contents.
pub fn encode_samples(samples: &[i32], format: &AudioFormat, out: &mut Vec<u8>) {
    let width = format.width.bytes();
    out.clear();
    out.resize(samples.len() * width, 0);
    for (sample, slot) in samples.iter().zip(out.chunks_exact_mut(width)) {
        write_sample(*sample, slot, format.width, format.big_endian);
    }
}

/// Clamp a wide accumulator into the sample range of `width`.
pub fn clip(value: i64, width: SampleWidth) -> i32 {
    value.clamp(width.min_value() as i64, width.max_value() as i64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_survive_a_byte_round_trip_in_every_layout() {
        for (width, big_endian) in [
            (SampleWidth::Eight, false),
            (SampleWidth::Sixteen, false),
            (SampleWidth::Sixteen, true),
        ] {
            let mut bytes = [0_u8; 2];
            for value in width.min_value()..=width.max_value() {
                write_sample(value, &mut bytes, width, big_endian);
                let decoded = read_sample(&bytes, width, big_endian);
                assert_eq!(decoded, value);

                let mut again = [0_u8; 2];
                write_sample(decoded, &mut again, width, big_endian);
                assert_eq!(again[..width.bytes()], bytes[..width.bytes()]);
            }
        }
    }

    #[test]
    fn sixteen_bit_byte_order_is_respected() {
        let mut bytes = [0_u8; 2];
        write_sample(0x0102, &mut bytes, SampleWidth::Sixteen, true);
        assert_eq!(bytes, [0x01, 0x02]);
        write_sample(0x0102, &mut bytes, SampleWidth::Sixteen, false);
        assert_eq!(bytes, [0x02, 0x01]);
    }

    #[test]
    fn clip_saturates_instead_of_wrapping() {
        assert_eq!(clip(70_000, SampleWidth::Sixteen), i16::MAX as i32);
        assert_eq!(clip(-70_000, SampleWidth::Sixteen), i16::MIN as i32);
        assert_eq!(clip(200, SampleWidth::Eight), 127);
        assert_eq!(clip(-5, SampleWidth::Eight), -5);
    }

    #[test]
    fn alignment_checks_use_the_frame_size() {
        let format = AudioFormat::new(44_100, SampleWidth::Sixteen, 2, false);
        assert_eq!(format.frame_size(), 4);
        assert!(format.check_aligned(8).is_ok());
        assert!(matches!(
            format.check_aligned(6),
            Err(MixerError::Misaligned {
                bytes: 6,
                frame_size: 4
            })
        ));
        assert_eq!(format.round_up_to_frame(5), 8);
        assert_eq!(format.frames_for_ms(10), 441);
    }
}
