//! Real output devices through rodio.
//!
//! rodio's `OutputStream` is owned by a holder thread for the lifetime of the
//! line. The mixer side pushes converted samples into a shared ring buffer
//! that a custom [`Source`] drains on the audio callback, counting frames as
//! it goes so the mixer can pace its writes.

use dasp_ring_buffer::Bounded;
use log::{debug, info, warn};
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::cpal::{self, BufferSize};
use rodio::{ChannelCount, OutputStreamBuilder, SampleRate, Source};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::format::{decode_samples, AudioFormat};
use crate::error::{MixerError, MixerResult};

use super::line::{AudioLine, DeviceResolver};

const HOLDER_POLL_MS: u64 = 50;
const FEED_CHUNK_FRAMES: usize = 256;
/// Ring capacity as a multiple of the requested device buffer.
const RING_HEADROOM: usize = 4;

struct Feed {
    ring: Mutex<Bounded<Vec<f32>>>,
    played_frames: AtomicU64,
    playing: AtomicBool,
    shutdown: AtomicBool,
    channels: u16,
}

struct FeedSource {
    feed: Arc<Feed>,
    sample_rate: u32,
    chunk: Vec<f32>,
    cursor: usize,
}

impl FeedSource {
    fn refill(&mut self) {
        self.chunk.clear();
        self.cursor = 0;
        let channels = self.feed.channels as usize;
        if self.feed.playing.load(Ordering::Relaxed) {
            let mut ring = self.feed.ring.lock().unwrap();
            let frames = (ring.len() / channels).min(FEED_CHUNK_FRAMES);
            for _ in 0..frames * channels {
                if let Some(sample) = ring.pop() {
                    self.chunk.push(sample);
                }
            }
            drop(ring);
            self.feed
                .played_frames
                .fetch_add(frames as u64, Ordering::Relaxed);
        }
        if self.chunk.is_empty() {
            // Underrun or paused: one frame of silence keeps channels aligned.
            self.chunk.resize(channels, 0.0);
        }
    }
}

impl Iterator for FeedSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.feed.shutdown.load(Ordering::Relaxed) {
            return None;
        }
        if self.cursor >= self.chunk.len() {
            self.refill();
        }
        let sample = self.chunk[self.cursor];
        self.cursor += 1;
        Some(sample)
    }
}

impl Source for FeedSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> ChannelCount {
        self.feed.channels
    }

    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// An output device driven through rodio.
pub struct RodioLine {
    name: String,
    device: cpal::Device,
    format: Option<AudioFormat>,
    feed: Option<Arc<Feed>>,
    holder: Option<JoinHandle<()>>,
}

impl RodioLine {
    pub fn new(name: impl Into<String>, device: cpal::Device) -> Self {
        Self {
            name: name.into(),
            device,
            format: None,
            feed: None,
            holder: None,
        }
    }

    fn feed(&self) -> MixerResult<&Arc<Feed>> {
        self.feed
            .as_ref()
            .ok_or_else(|| MixerError::Device(format!("{} is not open", self.name)))
    }
}

impl AudioLine for RodioLine {
    fn open(&mut self, format: &AudioFormat, buffer_bytes: usize) -> MixerResult<()> {
        self.close();
        let frames = (buffer_bytes / format.frame_size()).max(1);
        let samples = frames * RING_HEADROOM * format.channels as usize;
        let feed = Arc::new(Feed {
            ring: Mutex::new(Bounded::from(vec![0.0; samples])),
            played_frames: AtomicU64::new(0),
            playing: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            channels: format.channels,
        });

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let device = self.device.clone();
        let holder_feed = Arc::clone(&feed);
        let sample_rate = format.sample_rate;
        let channels = format.channels;
        let holder = thread::Builder::new()
            .name(format!("soundroom-out-{}", self.name))
            .spawn(move || {
                let stream = OutputStreamBuilder::from_device(device).and_then(|builder| {
                    builder
                        .with_sample_rate(sample_rate)
                        .with_channels(channels)
                        .with_buffer_size(BufferSize::Fixed(frames as u32))
                        .open_stream()
                });
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return;
                    }
                };
                stream.mixer().add(FeedSource {
                    feed: Arc::clone(&holder_feed),
                    sample_rate,
                    chunk: Vec::with_capacity(FEED_CHUNK_FRAMES * channels as usize),
                    cursor: 0,
                });
                let _ = ready_tx.send(Ok(()));

                while !holder_feed.shutdown.load(Ordering::Relaxed) {
                    thread::park_timeout(Duration::from_millis(HOLDER_POLL_MS));
                }
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!("{} streaming with {} frame device buffer", self.name, frames);
                self.format = Some(*format);
                self.feed = Some(feed);
                self.holder = Some(holder);
                Ok(())
            }
            Ok(Err(message)) => {
                let _ = holder.join();
                Err(MixerError::Device(format!("{}: {}", self.name, message)))
            }
            Err(_) => {
                let _ = holder.join();
                Err(MixerError::Device(format!(
                    "{}: output thread exited during open",
                    self.name
                )))
            }
        }
    }

    fn start(&mut self) -> MixerResult<()> {
        self.feed()?.playing.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(feed) = &self.feed {
            feed.playing.store(false, Ordering::Relaxed);
        }
    }

    fn write(&mut self, bytes: &[u8]) -> MixerResult<()> {
        let format = self
            .format
            .ok_or_else(|| MixerError::Device(format!("{} is not open", self.name)))?;
        format.check_aligned(bytes.len())?;
        let scale = (format.width.max_value() + 1) as f32;
        let samples = decode_samples(bytes, &format);

        let feed = self.feed()?;
        let mut ring = feed.ring.lock().unwrap();
        let free = ring.max_len() - ring.len();
        let count = samples.len().min(free - free % format.channels as usize);
        for sample in &samples[..count] {
            let _ = ring.push(*sample as f32 / scale);
        }
        drop(ring);
        if count < samples.len() {
            warn!(
                "{} ring full, dropped {} samples",
                self.name,
                samples.len() - count
            );
        }
        Ok(())
    }

    fn frame_position(&self) -> u64 {
        self.feed
            .as_ref()
            .map(|feed| feed.played_frames.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn close(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.playing.store(false, Ordering::Relaxed);
            feed.shutdown.store(true, Ordering::Relaxed);
        }
        if let Some(holder) = self.holder.take() {
            holder.thread().unpark();
            if holder.join().is_err() {
                warn!("output thread for {} panicked during join", self.name);
            }
        }
        self.format = None;
    }

    fn describe(&self) -> String {
        format!("rodio:{}", self.name)
    }
}

impl Drop for RodioLine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Names of the output devices on the default host.
pub fn list_output_devices() -> MixerResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|err| MixerError::Device(err.to_string()))?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

/// Looks up rodio output devices by name. `"default"` selects the host's
/// default output.
#[derive(Debug, Default, Clone, Copy)]
pub struct RodioResolver;

impl DeviceResolver for RodioResolver {
    fn resolve(&self, name: &str) -> MixerResult<Box<dyn AudioLine>> {
        let host = cpal::default_host();
        let device = if name == "default" {
            host.default_output_device()
        } else {
            host.output_devices()
                .map_err(|err| MixerError::Device(err.to_string()))?
                .find(|device| device.name().ok().as_deref() == Some(name))
        };
        let device =
            device.ok_or_else(|| MixerError::Device(format!("no output device named {}", name)))?;
        info!("resolved output device {}", name);
        Ok(Box::new(RodioLine::new(name, device)))
    }
}
