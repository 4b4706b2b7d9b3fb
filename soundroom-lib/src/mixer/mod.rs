//! The mixer: lifecycle, scenario hand-off and the worker that drives the
//! devices.
//!
//! A [`Mixer`] owns a set of [`SoundCardStream`]s bound to speakers of one
//! [`Room`]. Once initialized it accepts [`Scenario`]s; a single worker
//! thread mixes every active playback into each device once per tick.

mod listener;
mod registry;
mod state;
mod step;
mod warmup;
mod worker;

pub use listener::MixerListener;
pub use state::MixerState;
pub use step::{MixOutcome, MixerStep};

use log::{error, info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::format::AudioFormat;
use crate::config::MixerConfig;
use crate::error::{MixerError, MixerResult};
use crate::output::{OutputDevice, SoundCardStream};
use crate::room::Room;
use crate::scenario::{ActiveScenario, PlaybackId, Scenario};

use listener::{Listeners, MixerEvent};
use registry::PlaybackRegistry;
use state::StateCell;

/// State shared between the control surface, the worker and background
/// tasks.
struct Shared {
    config: MixerConfig,
    room: Arc<Room>,
    internal: AudioFormat,
    output: AudioFormat,
    input_buffer_bytes: usize,
    warmup_mode: bool,
    state: StateCell,
    listeners: Listeners,
    registry: PlaybackRegistry,
    /// Playbacks waiting for the worker to pick them up.
    pending: Mutex<Vec<ActiveScenario>>,
    fill_pool: ThreadPool,
    abort: AtomicBool,
}

impl Shared {
    fn advance(&self, next: MixerState) -> MixerResult<()> {
        let from = self.state.advance(next)?;
        if !self.warmup_mode {
            info!("mixer {:?} -> {:?}", from, next);
        }
        self.listeners
            .emit(MixerEvent::StateChanged { from, to: next });
        Ok(())
    }

    fn should_exit(&self) -> bool {
        self.abort.load(Ordering::SeqCst) || self.state.get() == MixerState::Stopping
    }

    /// Queue a playback for the worker unless the mixer stopped running.
    fn enqueue(&self, scenario: ActiveScenario) -> MixerResult<()> {
        let mut pending = self.pending.lock().unwrap();
        let state = self.state.get();
        if !state.is_running() {
            return Err(MixerError::NotRunning(state));
        }
        pending.push(scenario);
        Ok(())
    }

    fn finish_playback(&self, id: PlaybackId) {
        if self.registry.remove(id) {
            self.listeners.emit(MixerEvent::ScenarioStopped(id));
        }
    }

    /// Rebuild a playback for its next loop and hand it back to the worker.
    fn restart(&self, scenario: ActiveScenario) {
        let id = scenario.id();
        let restarted = match scenario.restart() {
            Ok(restarted) => restarted,
            Err(err) => {
                warn!("playback {} cannot loop: {}", id, err);
                self.finish_playback(id);
                return;
            }
        };
        match self.enqueue(restarted) {
            Ok(()) => self.listeners.emit(MixerEvent::ScenarioRestarted(id)),
            Err(_) => self.finish_playback(id),
        }
    }
}

/// Multi-device spatial mixer.
///
/// All methods take `&self`; wrap the mixer in an `Arc` to share it between
/// threads.
pub struct Mixer {
    shared: Arc<Shared>,
    /// Device streams while the worker is not running.
    streams: Mutex<Vec<SoundCardStream>>,
    worker: Mutex<Option<JoinHandle<Vec<SoundCardStream>>>>,
    warmup: Mutex<Option<JoinHandle<()>>>,
}

impl Mixer {
    /// Create a mixer for `room` writing to `devices`.
    ///
    /// # Arguments
    ///
    /// * `config` - validated here; invalid settings are rejected.
    /// * `room` - every scenario played must use this same room.
    /// * `devices` - at least one, each bound to speakers of `room`.
    pub fn new(
        config: MixerConfig,
        room: Arc<Room>,
        devices: Vec<OutputDevice>,
    ) -> MixerResult<Self> {
        Self::build(config, room, devices, false)
    }

    fn build(
        config: MixerConfig,
        room: Arc<Room>,
        devices: Vec<OutputDevice>,
        warmup_mode: bool,
    ) -> MixerResult<Self> {
        config.validate()?;
        if devices.is_empty() {
            return Err(MixerError::Config("no output devices".to_string()));
        }
        for device in &devices {
            device.binding.validate(&room)?;
        }

        let internal = config.internal_format()?;
        let output = config.output_format()?;
        let target_frames = output.frames_for_ms(config.target_buffer_ms);
        let input_buffer_bytes =
            internal.bytes_for_frames(internal.frames_for_ms(config.input_buffer_ms));
        let pool_prefix = if warmup_mode { "soundroom-warmup-fill" } else { "soundroom-fill" };
        let fill_pool = ThreadPoolBuilder::new()
            .num_threads(config.fill_threads)
            .thread_name(move |index| format!("{}-{}", pool_prefix, index))
            .build()
            .map_err(|err| MixerError::Config(format!("fill pool: {}", err)))?;

        let streams = devices
            .into_iter()
            .map(|device| SoundCardStream::new(device, output, target_frames))
            .collect();

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                room,
                internal,
                output,
                input_buffer_bytes,
                warmup_mode,
                state: StateCell::new(),
                listeners: Listeners::default(),
                registry: PlaybackRegistry::default(),
                pending: Mutex::new(Vec::new()),
                fill_pool,
                abort: AtomicBool::new(false),
            }),
            streams: Mutex::new(streams),
            worker: Mutex::new(None),
            warmup: Mutex::new(None),
        })
    }

    pub fn state(&self) -> MixerState {
        self.shared.state.get()
    }

    pub fn config(&self) -> &MixerConfig {
        &self.shared.config
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.shared.room
    }

    pub fn add_listener(&self, listener: Arc<dyn MixerListener>) {
        self.shared.listeners.add(listener);
    }

    /// Open every device and warm up the mixing paths.
    ///
    /// Any device failure is fatal: devices opened so far are closed again and
    /// the mixer stays [`MixerState::New`]. Returns once the mixer is in
    /// [`MixerState::Warmup`]; it becomes [`MixerState::Initialized`] when the
    /// warmup battery finishes.
    pub fn initialize(&self) -> MixerResult<()> {
        let state = self.state();
        if state != MixerState::New {
            return Err(MixerError::InvalidTransition {
                from: state,
                to: MixerState::Warmup,
            });
        }

        let config = &self.shared.config;
        let output = self.shared.output;
        let buffer_bytes = output.bytes_for_frames(output.frames_for_ms(config.target_buffer_ms));
        let step_bytes =
            output.bytes_for_frames(output.frames_for_ms(config.device_buffer_step_ms));
        {
            let mut streams = self.streams.lock().unwrap();
            for index in 0..streams.len() {
                if let Err(err) =
                    streams[index].open(buffer_bytes, step_bytes, config.device_open_retries)
                {
                    error!("failed to open output devices: {}", err);
                    for opened in &mut streams[..index] {
                        opened.close();
                    }
                    return Err(err);
                }
            }
            if self.shared.warmup_mode {
                for stream in streams.iter_mut() {
                    stream.set_muted(true, true);
                }
            }
        }

        self.shared.advance(MixerState::Warmup)?;
        if self.shared.warmup_mode || !config.warmup {
            return self.shared.advance(MixerState::Initialized);
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("soundroom-warmup".to_string())
            .spawn(move || {
                if let Err(err) = warmup::run(&shared.config, &shared.room, &shared.abort) {
                    warn!("warmup failed, continuing cold: {}", err);
                }
                if let Err(err) = shared.advance(MixerState::Initialized) {
                    error!("could not leave warmup: {}", err);
                }
            })?;
        *self.warmup.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Spawn the worker. Blocks while warmup is still running.
    ///
    /// Devices start playing once the first tick has been queued, at which
    /// point the mixer moves to [`MixerState::Started`].
    pub fn start(&self) -> MixerResult<()> {
        let state = self
            .shared
            .state
            .wait_while(|state| state == MixerState::Warmup);
        let mut worker = self.worker.lock().unwrap();
        if state != MixerState::Initialized || worker.is_some() {
            return Err(MixerError::InvalidTransition {
                from: state,
                to: MixerState::Started,
            });
        }
        self.join_warmup();

        let streams = std::mem::take(&mut *self.streams.lock().unwrap());
        let shared = Arc::clone(&self.shared);
        let name = if self.shared.warmup_mode {
            "soundroom-warmup-mixer"
        } else {
            "soundroom-mixer"
        };
        *worker = Some(
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || worker::run(shared, streams))?,
        );
        Ok(())
    }

    /// Submit a playback of `scenario`.
    ///
    /// The returned id identifies this play across loops. Mixing starts on a
    /// later tick.
    pub fn play_scenario(&self, scenario: &Scenario) -> MixerResult<PlaybackId> {
        let state = self.state();
        if !state.is_running() {
            return Err(MixerError::NotRunning(state));
        }
        let mixer_room = self.shared.room.id();
        if scenario.room().id() != mixer_room {
            return Err(MixerError::RoomMismatch {
                scenario: scenario.room().id(),
                mixer: mixer_room,
            });
        }

        let id = PlaybackId::next();
        let active = ActiveScenario::new(
            id,
            Arc::new(scenario.clone()),
            self.shared.internal,
            self.shared.input_buffer_bytes,
        )?;
        self.shared.registry.insert(id);
        if let Err(err) = self.shared.enqueue(active) {
            self.shared.registry.remove(id);
            return Err(err);
        }
        Ok(id)
    }

    /// True until the playback finishes or the mixer stops.
    pub fn is_active(&self, id: PlaybackId) -> bool {
        self.shared.registry.contains(id)
    }

    /// Number of unfinished playbacks.
    pub fn active_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Wait up to `timeout` for a playback to finish. Returns true if it did.
    pub fn wait_for_completion(&self, id: PlaybackId, timeout: Duration) -> bool {
        self.shared.registry.wait_for(id, timeout)
    }

    /// Wait up to `timeout` for every playback to finish.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        self.shared.registry.wait_for_all(timeout)
    }

    /// Stop the worker after its current tick and release every device and
    /// playback.
    ///
    /// Only legal once started. A stop issued before the first tick waits for
    /// it. Stopping twice is an error.
    pub fn stop(&self) -> MixerResult<()> {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            self.shared
                .state
                .wait_while(|state| state == MixerState::Initialized);
        }
        self.shared.advance(MixerState::Stopping)?;

        if let Some(handle) = worker.take() {
            match handle.join() {
                Ok(streams) => *self.streams.lock().unwrap() = streams,
                Err(_) => error!("mixer worker panicked"),
            }
        }
        drop(worker);
        self.release();
        self.shared.advance(MixerState::Stopped)
    }

    fn release(&self) {
        for mut stream in self.streams.lock().unwrap().drain(..) {
            stream.close();
        }
        let pending: Vec<ActiveScenario> = self.shared.pending.lock().unwrap().drain(..).collect();
        drop(pending);
        for id in self.shared.registry.clear() {
            self.shared.listeners.emit(MixerEvent::ScenarioStopped(id));
        }
    }

    fn join_warmup(&self) {
        if let Some(handle) = self.warmup.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("warmup thread panicked");
            }
        }
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.shared.abort.store(true, Ordering::SeqCst);
        self.join_warmup();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            match handle.join() {
                Ok(streams) => *self.streams.lock().unwrap() = streams,
                Err(_) => warn!("mixer worker panicked during join"),
            }
        }
        self.release();
    }
}
