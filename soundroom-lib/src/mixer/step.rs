//! One tick of mixing.
//!
//! Reads a tick's worth of mono audio from every active playback, turns
//! positions into per-speaker volumes, spreads each playback over the stereo
//! devices bound to those speakers, sums, clips and serializes. Nothing is
//! kept between ticks: playbacks that should loop or end are reported back
//! to the caller instead of being handled here.

use log::{trace, warn};
use rayon::ThreadPool;
use std::time::Instant;

use crate::audio::format::{clip, decode_samples, encode_samples, AudioFormat};
use crate::field::VolumeMap;
use crate::output::{DeviceBinding, SoundCardStream};
use crate::room::Room;
use crate::scenario::{ActiveScenario, PlaybackId};

/// Result of a tick.
#[derive(Debug, Default)]
pub struct MixOutcome {
    /// Frames in every buffer.
    pub frames: usize,
    /// Serialized stereo audio, one buffer per device in device order.
    pub buffers: Vec<Vec<u8>>,
    /// Playbacks that reached the end of their input and loop again.
    pub restart: Vec<PlaybackId>,
    /// Playbacks that finished, were stopped, or failed.
    pub remove: Vec<PlaybackId>,
    /// Playbacks whose audio went into this tick's buffers.
    pub audible: Vec<PlaybackId>,
}

enum ReadOutcome {
    Full(Vec<i32>),
    EndOfStream(Vec<i32>),
    Underrun,
    Failed,
}

/// Mixing parameters for one tick.
pub struct MixerStep<'a> {
    room: &'a Room,
    output: AudioFormat,
    fill_pool: Option<&'a ThreadPool>,
}

impl<'a> MixerStep<'a> {
    /// # Arguments
    ///
    /// * `output` - stereo device format. Playbacks are read in its mono twin.
    /// * `fill_pool` - where non-live input buffers are refilled after a read.
    pub fn new(room: &'a Room, output: AudioFormat, fill_pool: Option<&'a ThreadPool>) -> Self {
        Self {
            room,
            output,
            fill_pool,
        }
    }

    /// Frames needed to bring the hungriest device back to its target depth.
    pub fn tick_frames(streams: &[SoundCardStream]) -> usize {
        streams
            .iter()
            .map(SoundCardStream::frames_needed)
            .max()
            .unwrap_or(0)
    }

    /// Mix one tick sized for `streams`.
    pub fn mix(
        &self,
        scenarios: &mut [ActiveScenario],
        streams: &[SoundCardStream],
        now: Instant,
    ) -> MixOutcome {
        let bindings: Vec<DeviceBinding> =
            streams.iter().map(|stream| *stream.binding()).collect();
        self.mix_frames(scenarios, &bindings, Self::tick_frames(streams), now)
    }

    /// Mix `frames` frames for devices bound as `bindings`.
    pub fn mix_frames(
        &self,
        scenarios: &mut [ActiveScenario],
        bindings: &[DeviceBinding],
        frames: usize,
        now: Instant,
    ) -> MixOutcome {
        let mut outcome = MixOutcome {
            frames,
            ..MixOutcome::default()
        };

        let mut contributions: Vec<(Vec<i32>, VolumeMap)> =
            Vec::with_capacity(scenarios.len());
        for scenario in scenarios.iter_mut() {
            if scenario.should_stop(now) {
                trace!("playback {} asked to stop", scenario.id());
                outcome.remove.push(scenario.id());
                continue;
            }
            if frames == 0 {
                continue;
            }

            let samples = match self.read_input(scenario, frames) {
                ReadOutcome::Full(samples) => samples,
                ReadOutcome::EndOfStream(samples) => {
                    if scenario.end_of_stream() {
                        outcome.restart.push(scenario.id());
                    } else {
                        outcome.remove.push(scenario.id());
                    }
                    samples
                }
                ReadOutcome::Underrun => {
                    trace!("playback {} underrun, substituting silence", scenario.id());
                    continue;
                }
                ReadOutcome::Failed => {
                    outcome.remove.push(scenario.id());
                    continue;
                }
            };
            let volumes = scenario.volumes(self.room, now);
            outcome.audible.push(scenario.id());
            contributions.push((samples, volumes));
        }

        outcome.buffers = bindings
            .iter()
            .map(|binding| self.render_device(binding, &contributions, frames))
            .collect();
        outcome
    }

    fn read_input(&self, scenario: &ActiveScenario, frames: usize) -> ReadOutcome {
        let input = self.output.mono();
        let bytes = input.bytes_for_frames(frames);
        let buffer = scenario.buffer();
        let mut data = vec![0; bytes];

        if buffer.can_read(bytes) {
            if let Err(err) = buffer.read(&mut data) {
                warn!("playback {} read failed: {}", scenario.id(), err);
                return ReadOutcome::Failed;
            }
            if let Some(pool) = self.fill_pool {
                buffer.schedule_fill(pool);
            }
            return ReadOutcome::Full(decode_samples(&data, &input));
        }

        if !buffer.is_closed() {
            if let Some(pool) = self.fill_pool {
                buffer.schedule_fill(pool);
            }
            return ReadOutcome::Underrun;
        }

        match buffer.read_remaining(&mut data) {
            // Closed between the checks with a full tick still buffered.
            Ok(count) if count == bytes => ReadOutcome::Full(decode_samples(&data, &input)),
            Ok(_) => ReadOutcome::EndOfStream(decode_samples(&data, &input)),
            Err(err) => {
                warn!("playback {} read failed: {}", scenario.id(), err);
                ReadOutcome::Failed
            }
        }
    }

    fn render_device(
        &self,
        binding: &DeviceBinding,
        contributions: &[(Vec<i32>, VolumeMap)],
        frames: usize,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        if contributions.is_empty() {
            out.resize(self.output.bytes_for_frames(frames), 0);
            return out;
        }

        let mut mixed = vec![0_i64; frames * 2];
        for (samples, volumes) in contributions {
            let left = volumes.get(&binding.left).copied().unwrap_or(0.0);
            let right = volumes.get(&binding.right).copied().unwrap_or(0.0);
            for (frame, sample) in mixed.chunks_exact_mut(2).zip(samples) {
                frame[0] += scale(*sample, left);
                frame[1] += scale(*sample, right);
            }
        }

        let width = self.output.width;
        let clipped: Vec<i32> = mixed.into_iter().map(|value| clip(value, width)).collect();
        encode_samples(&clipped, &self.output, &mut out);
        out
    }
}

fn scale(sample: i32, volume: f64) -> i64 {
    if volume == 1.0 {
        sample as i64
    } else {
        (sample as f64 * volume).round() as i64
    }
}
