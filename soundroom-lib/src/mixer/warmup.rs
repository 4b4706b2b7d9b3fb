//! Warmup battery run on a disposable child mixer before going live.
//!
//! The child writes to virtual, muted devices and plays one short synthetic
//! clip for every combination of ratio algorithm, normalization and input
//! sample layout, so the first real playback does not pay for cold code
//! paths and lazily allocated buffers.

use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::format::{AudioFormat, SampleWidth};
use crate::audio::resource::{AudioResource, NoiseResource, ToneResource};
use crate::config::MixerConfig;
use crate::error::MixerResult;
use crate::field::{Normalize, VolumeMap, VolumeRatio};
use crate::output::{DeviceBinding, NullLine, OutputDevice};
use crate::room::{LocationSpec, Point3, Room};
use crate::scenario::{PlaybackSpec, Scenario};
use crate::tools::timer::Timer;

use super::Mixer;

const WAIT_POLL_MS: u64 = 20;

pub(super) fn run(config: &MixerConfig, room: &Arc<Room>, abort: &AtomicBool) -> MixerResult<()> {
    let mut timer = Timer::new();
    timer.start();
    let mut child_config = config.clone();
    child_config.warmup = false;
    child_config.fill_threads = 1;

    let child = Mixer::build(child_config, Arc::clone(room), virtual_devices(room), true)?;
    child.initialize()?;
    child.start()?;

    let scenarios = battery(config, room);
    for scenario in &scenarios {
        child.play_scenario(scenario)?;
    }
    debug!("warmup playing {} scenarios", scenarios.len());

    let budget = Duration::from_millis(config.warmup_clip_ms * 4 + 2_000);
    while !abort.load(Ordering::SeqCst) && timer.get_time() < budget {
        if child.wait_for_idle(Duration::from_millis(WAIT_POLL_MS)) {
            break;
        }
    }
    child.stop()?;
    info!("warmup finished in {:?}", timer.get_time());
    Ok(())
}

/// One muted virtual stereo device per neighbouring speaker pair.
fn virtual_devices(room: &Room) -> Vec<OutputDevice> {
    let speakers = room.speakers();
    speakers
        .windows(2)
        .enumerate()
        .map(|(index, pair)| {
            OutputDevice::new(
                DeviceBinding::new(pair[0].id, pair[1].id),
                Box::new(NullLine::new(format!("warmup-{}", index))),
            )
        })
        .collect()
}

fn battery(config: &MixerConfig, room: &Arc<Room>) -> Vec<Scenario> {
    let speakers = room.speakers();
    let count = speakers.len() as f64;
    let centre = speakers
        .iter()
        .fold(Point3::ORIGIN, |sum, speaker| sum.add(speaker.position))
        .scale(1.0 / count);

    let all_on: VolumeMap = speakers.iter().map(|speaker| (speaker.id, 1.0)).collect();
    let ratios = [
        VolumeRatio::FieldOfHearing { cutoff_angle: 90.0 },
        VolumeRatio::OnlyClosest,
        VolumeRatio::Fixed { ratios: all_on },
    ];
    let normalizers = [Normalize::Fractional, Normalize::MaxSum { sum: 1.0 }];
    let rate = config.sample_rate;
    let layouts = [
        AudioFormat::new(rate, SampleWidth::Eight, 1, false),
        AudioFormat::new(rate, SampleWidth::Sixteen, 1, false),
        AudioFormat::new(rate, SampleWidth::Sixteen, 1, true),
        AudioFormat::new(rate, SampleWidth::Sixteen, 2, false),
    ];

    let mut scenarios = Vec::new();
    for ratio in &ratios {
        for normalize in &normalizers {
            for (index, layout) in layouts.iter().enumerate() {
                let resource: Arc<dyn AudioResource> = if index % 2 == 0 {
                    Arc::new(ToneResource::new(440.0, config.warmup_clip_ms, *layout))
                } else {
                    Arc::new(NoiseResource::new(config.warmup_clip_ms, *layout))
                };
                let source = LocationSpec::Orbit {
                    center: centre,
                    radius: 1.0,
                    period_ms: config.warmup_clip_ms.max(1),
                    phase_degrees: 90.0 * index as f64,
                };
                scenarios.push(
                    Scenario::new(Arc::clone(room), resource)
                        .with_source(source)
                        .with_listener(LocationSpec::fixed(centre))
                        .with_ratio(ratio.clone())
                        .with_normalize(*normalize)
                        .with_playback(PlaybackSpec::LoopCount { count: 1 }),
                );
            }
        }
    }
    scenarios
}
