use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::tools::timer::Timer;

/// When a playback ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackSpec {
    /// Loop until stopped from outside.
    Forever,
    /// Play the resource `count` times in total.
    LoopCount { count: u32 },
    /// Loop until `duration_ms` have passed since the audio first started.
    Timer { duration_ms: u64 },
}

impl Default for PlaybackSpec {
    fn default() -> Self {
        Self::LoopCount { count: 1 }
    }
}

impl PlaybackSpec {
    pub fn instantiate(&self) -> Playback {
        Playback {
            spec: *self,
            loops_completed: 0,
            timer: Timer::new(),
        }
    }
}

/// Continuation state for one playback. Survives loop restarts.
#[derive(Debug, Clone)]
pub struct Playback {
    spec: PlaybackSpec,
    loops_completed: u32,
    timer: Timer,
}

impl Playback {
    pub fn spec(&self) -> PlaybackSpec {
        self.spec
    }

    pub fn loops_completed(&self) -> u32 {
        self.loops_completed
    }

    /// Called once at the start of every loop.
    pub fn audio_started(&mut self, now: Instant) {
        self.timer.start_at(now);
    }

    /// Polled every tick, before any audio is read.
    pub fn should_stop(&self, now: Instant) -> bool {
        match self.spec {
            PlaybackSpec::Timer { duration_ms } => {
                self.timer.is_started()
                    && self.timer.get_time_at(now) > Duration::from_millis(duration_ms)
            }
            PlaybackSpec::Forever | PlaybackSpec::LoopCount { .. } => false,
        }
    }

    /// Called when the input is exhausted. Returns true to loop again.
    pub fn end_of_stream(&mut self) -> bool {
        self.loops_completed = self.loops_completed.saturating_add(1);
        match self.spec {
            PlaybackSpec::Forever | PlaybackSpec::Timer { .. } => true,
            PlaybackSpec::LoopCount { count } => self.loops_completed < count,
        }
    }
}
