use log::{debug, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crate::audio::convert::to_mono;
use crate::audio::format::AudioFormat;
use crate::audio::input_buffer::AudioInputBuffer;
use crate::error::{MixerError, MixerResult};
use crate::field::{self, Normalize, Snapshot, VolumeMap, VolumeRatio};
use crate::room::{Location, Room};

use super::{Playback, Scenario};

/// Identity of one play of a scenario, stable across loop restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(u64);

static NEXT_PLAYBACK_ID: AtomicU64 = AtomicU64::new(1);

impl PlaybackId {
    pub fn next() -> Self {
        Self(NEXT_PLAYBACK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Runtime state of one playback.
pub struct ActiveScenario {
    id: PlaybackId,
    scenario: Arc<Scenario>,
    format: AudioFormat,
    buffer_bytes: usize,
    source: Location,
    listener: Location,
    ratio: VolumeRatio,
    normalize: Normalize,
    playback: Playback,
    buffer: Arc<AudioInputBuffer>,
    started_at: Option<Instant>,
    live_reader: Option<JoinHandle<()>>,
}

impl ActiveScenario {
    /// Open the scenario's resource and prime its input buffer.
    ///
    /// # Arguments
    ///
    /// * `format` - the mixer's internal mono format.
    /// * `buffer_bytes` - requested input buffer size, rounded up to whole frames.
    pub fn new(
        id: PlaybackId,
        scenario: Arc<Scenario>,
        format: AudioFormat,
        buffer_bytes: usize,
    ) -> MixerResult<Self> {
        let playback = scenario.playback().instantiate();
        Self::build(id, scenario, format, buffer_bytes, playback)
    }

    fn build(
        id: PlaybackId,
        scenario: Arc<Scenario>,
        format: AudioFormat,
        buffer_bytes: usize,
        playback: Playback,
    ) -> MixerResult<Self> {
        let resource = scenario.resource();
        let live = resource.is_live();
        let source = to_mono(resource.open()?, format)?;
        let buffer = Arc::new(AudioInputBuffer::new(source, live, buffer_bytes));

        let live_reader = if live {
            Some(buffer.spawn_live_reader(format!("soundroom-live-{}", id.value()))?)
        } else {
            buffer.fill()?;
            None
        };
        debug!(
            "playback {} opened {} ({} byte buffer)",
            id,
            resource.describe(),
            buffer.capacity()
        );

        Ok(Self {
            id,
            source: scenario.source().instantiate(),
            listener: scenario.listener().instantiate(),
            ratio: scenario.ratio().clone(),
            normalize: scenario.normalize(),
            scenario,
            format,
            buffer_bytes,
            playback,
            buffer,
            started_at: None,
            live_reader,
        })
    }

    pub fn id(&self) -> PlaybackId {
        self.id
    }

    pub fn scenario(&self) -> &Arc<Scenario> {
        &self.scenario
    }

    pub fn is_live(&self) -> bool {
        self.buffer.is_live()
    }

    pub fn buffer(&self) -> &Arc<AudioInputBuffer> {
        &self.buffer
    }

    pub fn playback(&self) -> &Playback {
        &self.playback
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Record the moment this loop's first audio is queued.
    pub fn mark_started(&mut self, now: Instant) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
            self.playback.audio_started(now);
        }
    }

    /// Milliseconds since this loop started, or 0 before the first tick.
    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        self.started_at
            .map(|start| now.saturating_duration_since(start).as_millis() as u64)
            .unwrap_or(0)
    }

    pub fn should_stop(&self, now: Instant) -> bool {
        self.playback.should_stop(now)
    }

    /// Report the end of the input. Returns true when the playback loops.
    pub fn end_of_stream(&mut self) -> bool {
        self.playback.end_of_stream()
    }

    /// Current volume for every speaker in `room`.
    pub fn volumes(&mut self, room: &Room, now: Instant) -> VolumeMap {
        let elapsed = self.elapsed_ms(now);
        let snapshot = Snapshot::new(self.source.at(elapsed), self.listener.at(elapsed), room);
        field::volumes(&snapshot, &self.ratio, &self.normalize)
    }

    /// Rebuild this playback for its next loop.
    ///
    /// The id and [`Playback`] carry over; locations, algorithms and the input
    /// buffer are recreated from the template. Live resources cannot loop.
    pub fn restart(mut self) -> MixerResult<ActiveScenario> {
        if self.is_live() {
            self.close();
            return Err(MixerError::LiveRestart);
        }
        self.close();
        let playback = self.playback.clone();
        Self::build(
            self.id,
            Arc::clone(&self.scenario),
            self.format,
            self.buffer_bytes,
            playback,
        )
    }

    /// Stop feeding the input buffer.
    ///
    /// A live reader blocked on its feed exits after its next chunk; it is
    /// not joined here.
    pub fn close(&mut self) {
        self.buffer.cancel();
        if let Some(handle) = self.live_reader.take() {
            if handle.is_finished() && handle.join().is_err() {
                warn!("live reader for playback {} panicked", self.id);
            }
        }
    }
}

impl Drop for ActiveScenario {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ActiveScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveScenario")
            .field("id", &self.id)
            .field("playback", &self.playback)
            .field("started_at", &self.started_at)
            .field("buffered", &self.buffer.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleWidth;
    use crate::audio::resource::{LiveResource, MemoryResource};
    use crate::room::{LocationSpec, Point3, Speaker};
    use crate::scenario::PlaybackSpec;
    use std::sync::mpsc;
    use std::time::Duration;

    fn room() -> Arc<Room> {
        Arc::new(
            Room::new(vec![
                Speaker::new(1, Point3::ORIGIN),
                Speaker::new(2, Point3::new(10.0, 0.0, 0.0)),
            ])
            .unwrap(),
        )
    }

    fn mono() -> AudioFormat {
        AudioFormat::new(8_000, SampleWidth::Sixteen, 1, false)
    }

    #[test]
    fn new_scenarios_are_primed_and_unstarted() {
        let resource = Arc::new(MemoryResource::new(vec![1; 64], mono()));
        let scenario = Arc::new(Scenario::new(room(), resource));
        let active = ActiveScenario::new(PlaybackId::next(), scenario, mono(), 1_024).unwrap();
        assert_eq!(active.buffer().available(), 64);
        assert!(active.buffer().is_closed());
        assert!(!active.is_started());
        assert_eq!(active.elapsed_ms(Instant::now()), 0);
    }

    #[test]
    fn restart_keeps_the_id_and_loop_count() {
        let resource = Arc::new(MemoryResource::new(vec![7; 32], mono()));
        let scenario = Arc::new(
            Scenario::new(room(), resource).with_playback(PlaybackSpec::LoopCount { count: 3 }),
        );
        let id = PlaybackId::next();
        let mut active = ActiveScenario::new(id, scenario, mono(), 64).unwrap();
        let origin = Instant::now();
        active.mark_started(origin);
        assert_eq!(active.elapsed_ms(origin + Duration::from_millis(40)), 40);

        let mut drained = vec![0; 32];
        active.buffer().read(&mut drained).unwrap();
        assert!(active.end_of_stream());

        let restarted = active.restart().unwrap();
        assert_eq!(restarted.id(), id);
        assert_eq!(restarted.playback().loops_completed(), 1);
        assert!(!restarted.is_started());
        assert_eq!(restarted.buffer().available(), 32);
    }

    #[test]
    fn live_scenarios_cannot_restart() {
        let (tx, rx) = mpsc::channel();
        let resource = Arc::new(LiveResource::new(rx, mono()));
        let scenario = Arc::new(Scenario::new(room(), resource));
        let active = ActiveScenario::new(PlaybackId::next(), scenario, mono(), 64).unwrap();
        assert!(active.is_live());
        drop(tx);
        assert!(matches!(active.restart(), Err(MixerError::LiveRestart)));
    }

    #[test]
    fn volumes_follow_the_source_over_time() {
        let resource = Arc::new(MemoryResource::new(vec![0; 16], mono()));
        let scenario = Arc::new(
            Scenario::new(room(), resource)
                .with_listener(LocationSpec::fixed(Point3::new(5.0, -5.0, 0.0)))
                .with_source(LocationSpec::Linear {
                    from: Point3::new(-5.0, 0.0, 0.0),
                    to: Point3::new(15.0, 0.0, 0.0),
                    duration_ms: 1_000,
                }),
        );
        let room = Arc::clone(scenario.room());
        let mut active = ActiveScenario::new(PlaybackId::next(), scenario, mono(), 64).unwrap();
        let origin = Instant::now();

        let before = active.volumes(&room, origin);
        assert_eq!(before[&1], 1.0);
        assert_eq!(before[&2], 0.0);

        active.mark_started(origin);
        let after = active.volumes(&room, origin + Duration::from_millis(900));
        assert_eq!(after[&1], 0.0);
        assert_eq!(after[&2], 1.0);
    }
}
