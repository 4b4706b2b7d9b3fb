use log::{debug, error, warn};
#[cfg(feature = "debug")]
use log::info;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::output::SoundCardStream;
use crate::scenario::{ActiveScenario, PlaybackId};

use super::listener::MixerEvent;
use super::state::MixerState;
use super::step::{MixOutcome, MixerStep};
use super::Shared;

/// Rolling tick timings, reported once per second.
#[cfg(feature = "debug")]
struct TickStats {
    avg_ms: f64,
    min_ms: f64,
    max_ms: f64,
    overruns: u64,
    last_report: Instant,
}

#[cfg(feature = "debug")]
impl TickStats {
    const ALPHA: f64 = 0.1;

    fn new() -> Self {
        Self {
            avg_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
            overruns: 0,
            last_report: Instant::now(),
        }
    }

    fn record(&mut self, elapsed: Duration, overrun: bool) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.avg_ms = self.avg_ms * (1.0 - Self::ALPHA) + ms * Self::ALPHA;
        self.min_ms = self.min_ms.min(ms);
        self.max_ms = self.max_ms.max(ms);
        if overrun {
            self.overruns += 1;
        }
        if self.last_report.elapsed() >= Duration::from_secs(1) {
            info!(
                "tick avg {:.3}ms min {:.3}ms max {:.3}ms overruns {}",
                self.avg_ms, self.min_ms, self.max_ms, self.overruns
            );
            self.min_ms = f64::INFINITY;
            self.max_ms = 0.0;
            self.last_report = Instant::now();
        }
    }
}

/// Worker loop. Runs until the mixer is stopping or dropped and hands the
/// device streams back.
pub(super) fn run(shared: Arc<Shared>, mut streams: Vec<SoundCardStream>) -> Vec<SoundCardStream> {
    let pace = Duration::from_millis(shared.config.tick_ms);
    let mut active: Vec<ActiveScenario> = Vec::new();
    let mut devices_started = false;
    #[cfg(feature = "debug")]
    let mut stats = TickStats::new();
    debug!("mixer worker running with {:?} ticks", pace);

    while !shared.should_exit() {
        let tick_start = Instant::now();

        {
            let mut pending = shared.pending.lock().unwrap();
            active.extend(pending.drain(..));
        }

        let step = MixerStep::new(&shared.room, shared.output, Some(&shared.fill_pool));
        let now = Instant::now();
        let mut outcome = step.mix(&mut active, &streams, now);

        mark_started(&shared, &mut active, &outcome, now);

        for (stream, buffer) in streams.iter_mut().zip(outcome.buffers.iter_mut()) {
            if let Err(err) = stream.write(buffer) {
                warn!("write to {} failed: {}", stream.describe(), err);
            }
        }

        if !devices_started && outcome.frames > 0 {
            for stream in streams.iter_mut() {
                if let Err(err) = stream.start() {
                    error!("failed to start {}: {}", stream.describe(), err);
                }
            }
            devices_started = true;
            if let Err(err) = shared.advance(MixerState::Started) {
                warn!("mixer could not enter Started: {}", err);
            }
        }

        apply_side_effects(&shared, &mut active, outcome);

        let elapsed = tick_start.elapsed();
        let overrun = elapsed >= pace;
        #[cfg(feature = "debug")]
        stats.record(elapsed, overrun);
        if overrun {
            warn!("mixer tick took {:?}, longer than the {:?} pace", elapsed, pace);
        } else {
            thread::sleep(pace - elapsed);
        }
    }

    for stream in streams.iter_mut() {
        stream.stop();
    }
    debug!("mixer worker exiting with {} active playbacks", active.len());
    streams
}

/// Flag playbacks whose first audio of this loop is about to be queued.
///
/// Playbacks that underran this tick stay unstarted until real audio flows.
fn mark_started(
    shared: &Shared,
    active: &mut [ActiveScenario],
    outcome: &MixOutcome,
    now: Instant,
) {
    for scenario in active.iter_mut() {
        if scenario.is_started() || !outcome.audible.contains(&scenario.id()) {
            continue;
        }
        scenario.mark_started(now);
        if scenario.playback().loops_completed() == 0 {
            shared
                .listeners
                .emit(MixerEvent::ScenarioStarted(scenario.id()));
        }
    }
}

fn take_scenario(active: &mut Vec<ActiveScenario>, id: PlaybackId) -> Option<ActiveScenario> {
    let index = active.iter().position(|scenario| scenario.id() == id)?;
    Some(active.swap_remove(index))
}

fn apply_side_effects(shared: &Arc<Shared>, active: &mut Vec<ActiveScenario>, outcome: MixOutcome) {
    for id in outcome.remove {
        if let Some(scenario) = take_scenario(active, id) {
            drop(scenario);
            shared.finish_playback(id);
        }
    }
    for id in outcome.restart {
        if let Some(scenario) = take_scenario(active, id) {
            let shared_for_task = Arc::clone(shared);
            shared
                .fill_pool
                .spawn(move || shared_for_task.restart(scenario));
        }
    }
}
