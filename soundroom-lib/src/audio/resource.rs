//! Audio resource providers.
//!
//! A resource is a reusable recipe for a byte stream; every `open` returns a
//! fresh [`AudioSource`] positioned at the start. Live resources are the
//! exception: they can be opened once and deliver audio at real-time rate in
//! source-defined chunks.

use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;
use std::io;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use crate::error::{MixerError, MixerResult};

use super::format::{write_sample, AudioFormat};

/// An open PCM byte stream.
pub trait AudioSource: Send {
    /// Layout of the bytes returned by [`AudioSource::read`].
    fn format(&self) -> AudioFormat;

    /// Read up to `buf.len()` bytes.
    ///
    /// `Ok(0)` means the stream is exhausted. A short read is not the end of
    /// the stream. Live sources return at most one chunk per call.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Factory for [`AudioSource`] streams.
pub trait AudioResource: Send + Sync {
    /// Open a new stream from the beginning of the resource.
    fn open(&self) -> MixerResult<Box<dyn AudioSource>>;

    /// True for real-time feeds that cannot be rewound.
    fn is_live(&self) -> bool {
        false
    }

    /// Short label used in log lines.
    fn describe(&self) -> String;
}

/// PCM bytes held in memory.
#[derive(Debug, Clone)]
pub struct MemoryResource {
    data: Arc<Vec<u8>>,
    format: AudioFormat,
}

impl MemoryResource {
    pub fn new(data: Vec<u8>, format: AudioFormat) -> Self {
        Self {
            data: Arc::new(data),
            format,
        }
    }
}

impl AudioResource for MemoryResource {
    fn open(&self) -> MixerResult<Box<dyn AudioSource>> {
        Ok(Box::new(MemorySource {
            data: self.data.clone(),
            position: 0,
            format: self.format,
        }))
    }

    fn describe(&self) -> String {
        format!("memory ({} bytes)", self.data.len())
    }
}

struct MemorySource {
    data: Arc<Vec<u8>>,
    position: usize,
    format: AudioFormat,
}

impl AudioSource for MemorySource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.position..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.position += count;
        Ok(count)
    }
}

/// Synthetic sine tone.
#[derive(Debug, Clone)]
pub struct ToneResource {
    pub frequency: f64,
    pub duration_ms: u64,
    /// Peak level as a fraction of full scale.
    pub amplitude: f64,
    pub format: AudioFormat,
}

impl ToneResource {
    pub fn new(frequency: f64, duration_ms: u64, format: AudioFormat) -> Self {
        Self {
            frequency,
            duration_ms,
            amplitude: 0.5,
            format,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }
}

impl AudioResource for ToneResource {
    fn open(&self) -> MixerResult<Box<dyn AudioSource>> {
        let peak = self.format.width.max_value() as f64 * self.amplitude;
        let step = TAU * self.frequency / self.format.sample_rate.max(1) as f64;
        Ok(Box::new(GeneratedSource::new(
            self.format,
            self.format.frames_for_ms(self.duration_ms),
            move |frame| (peak * (step * frame as f64).sin()).round() as i32,
        )))
    }

    fn describe(&self) -> String {
        format!("tone {:.1}Hz/{}ms", self.frequency, self.duration_ms)
    }
}

/// White noise, optionally seeded for reproducible output.
#[derive(Debug, Clone)]
pub struct NoiseResource {
    pub duration_ms: u64,
    pub amplitude: f64,
    pub seed: Option<u64>,
    pub format: AudioFormat,
}

impl NoiseResource {
    pub fn new(duration_ms: u64, format: AudioFormat) -> Self {
        Self {
            duration_ms,
            amplitude: 0.25,
            seed: None,
            format,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl AudioResource for NoiseResource {
    fn open(&self) -> MixerResult<Box<dyn AudioSource>> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let peak = (self.format.width.max_value() as f64 * self.amplitude.clamp(0.0, 1.0)) as i32;
        Ok(Box::new(GeneratedSource::new(
            self.format,
            self.format.frames_for_ms(self.duration_ms),
            move |_| {
                if peak == 0 {
                    0
                } else {
                    rng.gen_range(-peak..=peak)
                }
            },
        )))
    }

    fn describe(&self) -> String {
        format!("noise {}ms", self.duration_ms)
    }
}

/// Source producing `total_frames` frames from a per-frame generator. Every
/// channel carries the same sample.
struct GeneratedSource<F> {
    format: AudioFormat,
    total_frames: usize,
    frame: usize,
    generate: F,
}

impl<F> GeneratedSource<F>
where
    F: FnMut(usize) -> i32 + Send,
{
    fn new(format: AudioFormat, total_frames: usize, generate: F) -> Self {
        Self {
            format,
            total_frames,
            frame: 0,
            generate,
        }
    }
}

impl<F> AudioSource for GeneratedSource<F>
where
    F: FnMut(usize) -> i32 + Send,
{
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let frame_size = self.format.frame_size();
        let width = self.format.width;
        let frames = (buf.len() / frame_size).min(self.total_frames - self.frame);
        for out in buf.chunks_exact_mut(frame_size).take(frames) {
            let value = (self.generate)(self.frame);
            for slot in out.chunks_exact_mut(width.bytes()) {
                write_sample(value, slot, width, self.format.big_endian);
            }
            self.frame += 1;
        }
        Ok(frames * frame_size)
    }
}

/// Real-time feed delivered as chunks over a channel.
///
/// The resource can be opened once. The stream ends when every sender has
/// been dropped.
pub struct LiveResource {
    chunks: Mutex<Option<Receiver<Vec<u8>>>>,
    format: AudioFormat,
}

impl LiveResource {
    pub fn new(chunks: Receiver<Vec<u8>>, format: AudioFormat) -> Self {
        Self {
            chunks: Mutex::new(Some(chunks)),
            format,
        }
    }
}

impl AudioResource for LiveResource {
    fn open(&self) -> MixerResult<Box<dyn AudioSource>> {
        let receiver = self
            .chunks
            .lock()
            .unwrap()
            .take()
            .ok_or(MixerError::LiveRestart)?;
        Ok(Box::new(LiveSource {
            receiver,
            format: self.format,
        }))
    }

    fn is_live(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "live feed".to_string()
    }
}

struct LiveSource {
    receiver: Receiver<Vec<u8>>,
    format: AudioFormat,
}

impl AudioSource for LiveSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let chunk = match self.receiver.recv() {
                Ok(chunk) => chunk,
                Err(_) => return Ok(0),
            };
            if chunk.is_empty() {
                continue;
            }
            if chunk.len() > buf.len() {
                warn!(
                    "dropping {} byte live chunk, larger than the {} byte buffer",
                    chunk.len(),
                    buf.len()
                );
                continue;
            }
            buf[..chunk.len()].copy_from_slice(&chunk);
            return Ok(chunk.len());
        }
    }
}
