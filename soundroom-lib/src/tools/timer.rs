use std::time::{Duration, Instant};

/// Wall-clock stopwatch that only starts once.
///
/// Later calls to [`Timer::start`] keep the original start so the elapsed
/// time spans every loop of a playback.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    start_time: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self { start_time: None }
    }

    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    /// Start as of `now` unless already running.
    pub fn start_at(&mut self, now: Instant) {
        if self.start_time.is_none() {
            self.start_time = Some(now);
        }
    }

    pub fn is_started(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn get_time(&self) -> Duration {
        self.get_time_at(Instant::now())
    }

    /// Time elapsed between the start and `now`; zero if never started.
    pub fn get_time_at(&self, now: Instant) -> Duration {
        match self.start_time {
            Some(start) => now.saturating_duration_since(start),
            None => Duration::ZERO,
        }
    }
}
