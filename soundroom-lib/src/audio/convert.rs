//! Conversion of arbitrary PCM sources into the mixer's internal mono layout.

use std::io;

use crate::error::{MixerError, MixerResult};

use super::format::{read_sample, write_sample, AudioFormat, SampleWidth};
use super::resource::AudioSource;

/// Wrap `source` so it yields `target` (mono) bytes.
///
/// Sources already in the target layout are returned untouched. Channels are
/// averaged, widths are rescaled, byte order is rewritten. The sample rate is
/// never changed: a mismatch is an error.
pub fn to_mono(
    source: Box<dyn AudioSource>,
    target: AudioFormat,
) -> MixerResult<Box<dyn AudioSource>> {
    let input = source.format();
    if target.channels != 1 {
        return Err(MixerError::Format(format!(
            "conversion target must be mono, got {} channels",
            target.channels
        )));
    }
    if input.sample_rate != target.sample_rate {
        return Err(MixerError::Format(format!(
            "source sample rate {}Hz does not match mixer rate {}Hz",
            input.sample_rate, target.sample_rate
        )));
    }
    if input.channels == 0 {
        return Err(MixerError::Format("source has no channels".to_string()));
    }
    if input == target {
        return Ok(source);
    }
    Ok(Box::new(MonoConverter {
        inner: source,
        input,
        target,
        pending: Vec::new(),
        scratch: Vec::new(),
    }))
}

struct MonoConverter {
    inner: Box<dyn AudioSource>,
    input: AudioFormat,
    target: AudioFormat,
    /// Partial input frame carried over from the previous read.
    pending: Vec<u8>,
    scratch: Vec<u8>,
}

impl MonoConverter {
    fn convert_frame(&self, frame: &[u8]) -> i32 {
        let width = self.input.width;
        let channels = self.input.channels as i64;
        let sum: i64 = frame
            .chunks_exact(width.bytes())
            .map(|sample| read_sample(sample, width, self.input.big_endian) as i64)
            .sum();
        rescale((sum / channels) as i32, width, self.target.width)
    }
}

impl AudioSource for MonoConverter {
    fn format(&self) -> AudioFormat {
        self.target
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let out_width = self.target.width.bytes();
        let in_frame = self.input.frame_size();
        let frames_wanted = buf.len() / out_width;
        if frames_wanted == 0 {
            return Ok(0);
        }

        // Keep pulling until at least one whole input frame is available, so
        // that a short upstream read is never mistaken for the end of data.
        loop {
            let wanted_bytes = (frames_wanted * in_frame).saturating_sub(self.pending.len());
            if self.pending.len() >= in_frame || wanted_bytes == 0 {
                break;
            }
            self.scratch.resize(wanted_bytes, 0);
            let count = self.inner.read(&mut self.scratch)?;
            if count == 0 {
                self.pending.clear();
                return Ok(0);
            }
            self.pending.extend_from_slice(&self.scratch[..count]);
        }

        let frames = (self.pending.len() / in_frame).min(frames_wanted);
        for index in 0..frames {
            let frame = &self.pending[index * in_frame..(index + 1) * in_frame];
            let value = self.convert_frame(frame);
            write_sample(
                value,
                &mut buf[index * out_width..],
                self.target.width,
                self.target.big_endian,
            );
        }
        self.pending.drain(..frames * in_frame);
        Ok(frames * out_width)
    }
}

/// Move a sample between widths, keeping its relative level.
fn rescale(value: i32, from: SampleWidth, to: SampleWidth) -> i32 {
    match (from, to) {
        (SampleWidth::Eight, SampleWidth::Sixteen) => value << 8,
        (SampleWidth::Sixteen, SampleWidth::Eight) => value >> 8,
        _ => value,
    }
}
