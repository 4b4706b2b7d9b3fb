use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audio::format::AudioFormat;
use crate::error::{MixerError, MixerResult};
use crate::room::{Room, SpeakerId};

use super::line::AudioLine;

/// Which room speakers a stereo device drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub left: SpeakerId,
    pub right: SpeakerId,
    #[serde(default)]
    pub mute_left: bool,
    #[serde(default)]
    pub mute_right: bool,
}

impl DeviceBinding {
    pub fn new(left: SpeakerId, right: SpeakerId) -> Self {
        Self {
            left,
            right,
            mute_left: false,
            mute_right: false,
        }
    }

    /// Check both channels point at speakers in `room`.
    pub fn validate(&self, room: &Room) -> MixerResult<()> {
        for id in [self.left, self.right] {
            if !room.contains(id) {
                return Err(MixerError::Config(format!(
                    "device bound to unknown speaker {}",
                    id
                )));
            }
        }
        Ok(())
    }
}

/// An output line together with the speakers it drives.
pub struct OutputDevice {
    pub binding: DeviceBinding,
    pub line: Box<dyn AudioLine>,
}

impl OutputDevice {
    pub fn new(binding: DeviceBinding, line: Box<dyn AudioLine>) -> Self {
        Self { binding, line }
    }
}

impl fmt::Debug for OutputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputDevice")
            .field("binding", &self.binding)
            .field("line", &self.line.describe())
            .finish()
    }
}

/// Frame-paced writer for one output device.
pub struct SoundCardStream {
    line: Box<dyn AudioLine>,
    binding: DeviceBinding,
    format: AudioFormat,
    target_frames: u64,
    frames_written: u64,
    open: bool,
}

impl SoundCardStream {
    /// # Arguments
    ///
    /// * `format` - stereo output format.
    /// * `target_frames` - buffer depth to keep queued on the device.
    pub fn new(device: OutputDevice, format: AudioFormat, target_frames: usize) -> Self {
        Self {
            line: device.line,
            binding: device.binding,
            format,
            target_frames: target_frames as u64,
            frames_written: 0,
            open: false,
        }
    }

    pub fn binding(&self) -> &DeviceBinding {
        &self.binding
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn describe(&self) -> String {
        self.line.describe()
    }

    pub fn set_muted(&mut self, left: bool, right: bool) {
        self.binding.mute_left = left;
        self.binding.mute_right = right;
    }

    /// Open the line, growing the device buffer by `step_bytes` after each
    /// rejected attempt.
    pub fn open(
        &mut self,
        buffer_bytes: usize,
        step_bytes: usize,
        attempts: usize,
    ) -> MixerResult<()> {
        let attempts = attempts.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            let size = self
                .format
                .round_up_to_frame(buffer_bytes + step_bytes * attempt);
            match self.line.open(&self.format, size) {
                Ok(()) => {
                    info!("opened {} with {} byte buffer", self.describe(), size);
                    self.frames_written = 0;
                    self.open = true;
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        "open {} attempt {}/{} ({} bytes) failed: {}",
                        self.describe(),
                        attempt + 1,
                        attempts,
                        size,
                        err
                    );
                    last_error = Some(err);
                }
            }
        }
        Err(MixerError::Device(format!(
            "could not open {} after {} attempts: {}",
            self.describe(),
            attempts,
            last_error.map(|err| err.to_string()).unwrap_or_default()
        )))
    }

    /// Frames to write now to restore the target depth. Never negative.
    pub fn frames_needed(&self) -> usize {
        let position = self.line.frame_position();
        let queued = self.frames_written.saturating_sub(position);
        self.target_frames.saturating_sub(queued) as usize
    }

    /// Zero the muted channels of an interleaved stereo buffer.
    pub fn apply_mute(&self, bytes: &mut [u8]) {
        if !self.binding.mute_left && !self.binding.mute_right {
            return;
        }
        let width = self.format.width.bytes();
        for frame in bytes.chunks_exact_mut(self.format.frame_size()) {
            let (left, right) = frame.split_at_mut(width);
            if self.binding.mute_left {
                left.fill(0);
            }
            if self.binding.mute_right {
                right[..width].fill(0);
            }
        }
    }

    /// Mute and queue `bytes` on the device.
    pub fn write(&mut self, bytes: &mut [u8]) -> MixerResult<()> {
        self.format.check_aligned(bytes.len())?;
        if bytes.is_empty() {
            return Ok(());
        }
        self.apply_mute(bytes);
        self.line.write(bytes)?;
        self.frames_written += (bytes.len() / self.format.frame_size()) as u64;
        Ok(())
    }

    pub fn start(&mut self) -> MixerResult<()> {
        self.line.start()
    }

    pub fn stop(&mut self) {
        if self.open {
            self.line.stop();
        }
    }

    pub fn close(&mut self) {
        if self.open {
            self.line.stop();
            self.line.close();
            self.open = false;
        }
    }
}

impl Drop for SoundCardStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleWidth;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedLine {
        rejections: usize,
        opened_with: Arc<AtomicUsize>,
        position: Arc<AtomicU64>,
    }

    impl AudioLine for ScriptedLine {
        fn open(&mut self, _format: &AudioFormat, buffer_bytes: usize) -> MixerResult<()> {
            if self.rejections > 0 {
                self.rejections -= 1;
                return Err(MixerError::Device("buffer size rejected".to_string()));
            }
            self.opened_with.store(buffer_bytes, Ordering::SeqCst);
            Ok(())
        }
        fn start(&mut self) -> MixerResult<()> {
            Ok(())
        }
        fn stop(&mut self) {}
        fn write(&mut self, _bytes: &[u8]) -> MixerResult<()> {
            Ok(())
        }
        fn frame_position(&self) -> u64 {
            self.position.load(Ordering::SeqCst)
        }
        fn close(&mut self) {}
        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn stereo() -> AudioFormat {
        AudioFormat::new(8_000, SampleWidth::Sixteen, 2, false)
    }

    fn scripted_stream(rejections: usize) -> (SoundCardStream, Arc<AtomicUsize>, Arc<AtomicU64>) {
        let opened_with = Arc::new(AtomicUsize::new(0));
        let position = Arc::new(AtomicU64::new(0));
        let line = ScriptedLine {
            rejections,
            opened_with: Arc::clone(&opened_with),
            position: Arc::clone(&position),
        };
        let device = OutputDevice::new(DeviceBinding::new(1, 2), Box::new(line));
        (SoundCardStream::new(device, stereo(), 100), opened_with, position)
    }

    #[test]
    fn open_retries_with_larger_buffers() {
        let (mut stream, opened_with, _) = scripted_stream(2);
        stream.open(400, 100, 5).unwrap();
        assert_eq!(opened_with.load(Ordering::SeqCst), 600);

        let (mut stubborn, _, _) = scripted_stream(10);
        assert!(matches!(stubborn.open(400, 100, 3), Err(MixerError::Device(_))));
    }

    #[test]
    fn frames_needed_tracks_the_device_cursor() {
        let (mut stream, _, position) = scripted_stream(0);
        stream.open(400, 0, 1).unwrap();
        assert_eq!(stream.frames_needed(), 100);

        stream.write(&mut vec![0; 60 * 4]).unwrap();
        assert_eq!(stream.frames_needed(), 40);

        position.store(50, Ordering::SeqCst);
        assert_eq!(stream.frames_needed(), 90);

        stream.write(&mut vec![0; 200 * 4]).unwrap();
        assert_eq!(stream.frames_needed(), 0);

        // A cursor reported past what was written never goes negative.
        position.store(10_000, Ordering::SeqCst);
        assert_eq!(stream.frames_needed(), 100);
    }

    #[test]
    fn mute_zeroes_only_the_muted_channel() {
        let (mut stream, _, _) = scripted_stream(0);
        stream.set_muted(false, true);
        let mut bytes = vec![1, 2, 3, 4, 5, 6, 7, 8];
        stream.apply_mute(&mut bytes);
        assert_eq!(bytes, vec![1, 2, 0, 0, 5, 6, 0, 0]);

        stream.set_muted(true, false);
        let mut bytes = vec![1, 2, 3, 4];
        stream.apply_mute(&mut bytes);
        assert_eq!(bytes, vec![0, 0, 3, 4]);
    }
}
