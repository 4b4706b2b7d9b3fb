use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use soundroom_lib::audio::format::{decode_samples, AudioFormat, SampleWidth};
use soundroom_lib::audio::resource::{AudioResource, LiveResource, MemoryResource, ToneResource};
use soundroom_lib::field::{VolumeMap, VolumeRatio};
use soundroom_lib::mixer::MixerListener;
use soundroom_lib::output::{AudioLine, DeviceBinding, OutputDevice};
use soundroom_lib::room::{Point3, Room, Speaker};
use soundroom_lib::scenario::{PlaybackId, PlaybackSpec, Scenario};
use soundroom_lib::{Mixer, MixerConfig, MixerError, MixerResult, MixerState};

const WAIT: Duration = Duration::from_secs(10);

/// Device double that plays everything it is given as soon as it starts.
#[derive(Clone, Default)]
struct CaptureLine {
    written: Arc<Mutex<Vec<u8>>>,
    started: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    reject_open: bool,
}

impl AudioLine for CaptureLine {
    fn open(&mut self, _format: &AudioFormat, _buffer_bytes: usize) -> MixerResult<()> {
        if self.reject_open {
            return Err(MixerError::Device("unplugged".to_string()));
        }
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn start(&mut self) -> MixerResult<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.started.store(false, Ordering::SeqCst);
    }

    fn write(&mut self, bytes: &[u8]) -> MixerResult<()> {
        self.written.lock().unwrap().extend_from_slice(bytes);
        self.frames.fetch_add((bytes.len() / 4) as u64, Ordering::SeqCst);
        Ok(())
    }

    fn frame_position(&self) -> u64 {
        if self.started.load(Ordering::SeqCst) {
            self.frames.load(Ordering::SeqCst)
        } else {
            0
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        "capture".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    State(MixerState),
    Started(PlaybackId),
    Restarted(PlaybackId),
    Stopped(PlaybackId),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl MixerListener for Recorder {
    fn state_changed(&self, _from: MixerState, to: MixerState) {
        self.events.lock().unwrap().push(Event::State(to));
    }
    fn scenario_started(&self, id: PlaybackId) {
        self.events.lock().unwrap().push(Event::Started(id));
    }
    fn scenario_restarted(&self, id: PlaybackId) {
        self.events.lock().unwrap().push(Event::Restarted(id));
    }
    fn scenario_stopped(&self, id: PlaybackId) {
        self.events.lock().unwrap().push(Event::Stopped(id));
    }
}

fn config() -> MixerConfig {
    MixerConfig {
        sample_rate: 8_000,
        tick_ms: 5,
        warmup: false,
        ..MixerConfig::default()
    }
}

fn room() -> Arc<Room> {
    Arc::new(
        Room::new(vec![
            Speaker::new(1, Point3::ORIGIN),
            Speaker::new(2, Point3::new(10.0, 0.0, 0.0)),
        ])
        .unwrap(),
    )
}

fn mixer_with(
    line: CaptureLine,
    binding: DeviceBinding,
    config: MixerConfig,
) -> (Mixer, Arc<Room>) {
    let room = room();
    let device = OutputDevice::new(binding, Box::new(line));
    let mixer = Mixer::new(config, Arc::clone(&room), vec![device]).unwrap();
    (mixer, room)
}

fn running_mixer(line: CaptureLine) -> (Mixer, Arc<Room>) {
    let (mixer, room) = mixer_with(line, DeviceBinding::new(1, 2), config());
    mixer.initialize().unwrap();
    mixer.start().unwrap();
    (mixer, room)
}

fn constant(room: &Arc<Room>, value: i16, frames: usize) -> Scenario {
    let format = AudioFormat::new(8_000, SampleWidth::Sixteen, 1, false);
    let bytes: Vec<u8> = (0..frames).flat_map(|_| value.to_le_bytes()).collect();
    let resource: Arc<dyn AudioResource> = Arc::new(MemoryResource::new(bytes, format));
    Scenario::new(Arc::clone(room), resource).with_ratio(VolumeRatio::Fixed {
        ratios: VolumeMap::from([(1, 1.0), (2, 1.0)]),
    })
}

#[test]
fn lifecycle_calls_out_of_order_are_rejected() {
    let (mixer, room) = mixer_with(CaptureLine::default(), DeviceBinding::new(1, 2), config());
    assert!(matches!(
        mixer.start(),
        Err(MixerError::InvalidTransition {
            from: MixerState::New,
            ..
        })
    ));
    assert!(matches!(
        mixer.play_scenario(&constant(&room, 1, 8)),
        Err(MixerError::NotRunning(MixerState::New))
    ));
    assert!(mixer.stop().is_err());
    assert_eq!(mixer.state(), MixerState::New);

    mixer.initialize().unwrap();
    assert_eq!(mixer.state(), MixerState::Initialized);
    assert!(mixer.initialize().is_err());
    assert_eq!(mixer.state(), MixerState::Initialized);
}

#[test]
fn stop_is_not_idempotent_and_blocks_new_playbacks() {
    let (mixer, room) = running_mixer(CaptureLine::default());
    mixer.stop().unwrap();
    assert_eq!(mixer.state(), MixerState::Stopped);

    assert!(matches!(
        mixer.stop(),
        Err(MixerError::InvalidTransition {
            from: MixerState::Stopped,
            to: MixerState::Stopping
        })
    ));
    assert!(matches!(
        mixer.play_scenario(&constant(&room, 1, 8)),
        Err(MixerError::NotRunning(MixerState::Stopped))
    ));
}

#[test]
fn scenarios_from_another_room_are_rejected() {
    let (mixer, _room) = running_mixer(CaptureLine::default());
    let other = room();
    assert!(matches!(
        mixer.play_scenario(&constant(&other, 1, 8)),
        Err(MixerError::RoomMismatch { .. })
    ));
    mixer.stop().unwrap();
}

#[test]
fn a_playback_is_mixed_then_reported_finished() {
    let line = CaptureLine::default();
    let (mixer, room) = running_mixer(line.clone());
    let recorder = Arc::new(Recorder::default());
    mixer.add_listener(recorder.clone());

    let id = mixer.play_scenario(&constant(&room, 1_234, 400)).unwrap();
    assert!(mixer.wait_for_completion(id, WAIT));
    assert!(!mixer.is_active(id));
    mixer.stop().unwrap();

    let samples = decode_samples(
        &line.written.lock().unwrap(),
        &AudioFormat::new(8_000, SampleWidth::Sixteen, 2, false),
    );
    assert_eq!(samples.iter().filter(|sample| **sample == 1_234).count(), 800);
    assert!(samples.iter().all(|sample| *sample == 0 || *sample == 1_234));
    assert!(line.closed.load(Ordering::SeqCst));

    let events = recorder.events();
    let started = events.iter().position(|event| *event == Event::Started(id));
    let stopped = events.iter().position(|event| *event == Event::Stopped(id));
    assert!(started.is_some());
    assert!(started < stopped);
    assert_eq!(events.last(), Some(&Event::State(MixerState::Stopped)));
}

#[test]
fn looping_playbacks_keep_their_id() {
    let (mixer, room) = running_mixer(CaptureLine::default());
    let recorder = Arc::new(Recorder::default());
    mixer.add_listener(recorder.clone());

    let scenario = constant(&room, 50, 40).with_playback(PlaybackSpec::LoopCount { count: 3 });
    let id = mixer.play_scenario(&scenario).unwrap();
    assert!(mixer.wait_for_completion(id, WAIT));
    mixer.stop().unwrap();

    let events = recorder.events();
    let restarts = events
        .iter()
        .filter(|event| **event == Event::Restarted(id))
        .count();
    let starts = events
        .iter()
        .filter(|event| **event == Event::Started(id))
        .count();
    assert_eq!(restarts, 2);
    assert_eq!(starts, 1);
}

#[test]
fn timed_playbacks_end_on_their_own() {
    let (mixer, room) = running_mixer(CaptureLine::default());
    let format = AudioFormat::new(8_000, SampleWidth::Sixteen, 1, false);
    let tone: Arc<dyn AudioResource> = Arc::new(ToneResource::new(200.0, 20, format));
    let scenario = Scenario::new(Arc::clone(&room), tone)
        .with_playback(PlaybackSpec::Timer { duration_ms: 60 });
    let id = mixer.play_scenario(&scenario).unwrap();
    assert!(mixer.is_active(id));
    assert!(mixer.wait_for_completion(id, WAIT));
    mixer.stop().unwrap();
}

#[test]
fn stop_releases_unfinished_playbacks() {
    let (mixer, room) = running_mixer(CaptureLine::default());
    let recorder = Arc::new(Recorder::default());
    mixer.add_listener(recorder.clone());

    let id = mixer
        .play_scenario(&constant(&room, 9, 16).with_playback(PlaybackSpec::Forever))
        .unwrap();
    assert!(!mixer.wait_for_completion(id, Duration::from_millis(50)));
    mixer.stop().unwrap();

    assert!(!mixer.is_active(id));
    assert!(recorder.events().contains(&Event::Stopped(id)));
}

#[test]
fn muted_channels_stay_silent() {
    let line = CaptureLine::default();
    let mut binding = DeviceBinding::new(1, 2);
    binding.mute_right = true;
    let (mixer, room) = mixer_with(line.clone(), binding, config());
    mixer.initialize().unwrap();
    mixer.start().unwrap();

    let id = mixer.play_scenario(&constant(&room, 777, 200)).unwrap();
    assert!(mixer.wait_for_completion(id, WAIT));
    mixer.stop().unwrap();

    let samples = decode_samples(
        &line.written.lock().unwrap(),
        &AudioFormat::new(8_000, SampleWidth::Sixteen, 2, false),
    );
    let (left, right): (Vec<i32>, Vec<i32>) = samples
        .chunks_exact(2)
        .map(|frame| (frame[0], frame[1]))
        .unzip();
    assert_eq!(left.iter().filter(|sample| **sample == 777).count(), 200);
    assert!(right.iter().all(|sample| *sample == 0));
}

#[test]
fn device_failures_are_fatal_and_leave_the_mixer_new() {
    let good = CaptureLine::default();
    let bad = CaptureLine {
        reject_open: true,
        ..CaptureLine::default()
    };
    let room = room();
    let devices = vec![
        OutputDevice::new(DeviceBinding::new(1, 2), Box::new(good.clone())),
        OutputDevice::new(DeviceBinding::new(2, 1), Box::new(bad)),
    ];
    let mixer = Mixer::new(config(), room, devices).unwrap();
    assert!(matches!(mixer.initialize(), Err(MixerError::Device(_))));
    assert_eq!(mixer.state(), MixerState::New);
    assert!(good.closed.load(Ordering::SeqCst));
}

#[test]
fn warmup_runs_before_the_mixer_initializes() {
    let config = MixerConfig {
        warmup: true,
        warmup_clip_ms: 20,
        ..config()
    };
    let (mixer, room) = mixer_with(CaptureLine::default(), DeviceBinding::new(1, 2), config);
    let recorder = Arc::new(Recorder::default());
    mixer.add_listener(recorder.clone());
    mixer.initialize().unwrap();
    mixer.start().unwrap();
    assert!(mixer.state().is_running());

    let id = mixer.play_scenario(&constant(&room, 3, 40)).unwrap();
    assert!(mixer.wait_for_completion(id, WAIT));
    mixer.stop().unwrap();

    let states: Vec<Event> = recorder
        .events()
        .into_iter()
        .filter(|event| matches!(event, Event::State(_)))
        .collect();
    assert_eq!(
        states,
        vec![
            Event::State(MixerState::Warmup),
            Event::State(MixerState::Initialized),
            Event::State(MixerState::Started),
            Event::State(MixerState::Stopping),
            Event::State(MixerState::Stopped),
        ]
    );
}

#[test]
fn invalid_rooms_and_bindings_are_rejected_up_front() {
    assert!(Room::new(vec![Speaker::new(1, Point3::ORIGIN)]).is_err());

    let device = OutputDevice::new(DeviceBinding::new(1, 9), Box::new(CaptureLine::default()));
    assert!(matches!(
        Mixer::new(config(), room(), vec![device]),
        Err(MixerError::Config(_))
    ));
    assert!(matches!(
        Mixer::new(config(), room(), Vec::new()),
        Err(MixerError::Config(_))
    ));
}

#[test]
fn starved_live_feeds_start_when_audio_arrives() {
    let (mixer, room) = running_mixer(CaptureLine::default());
    let recorder = Arc::new(Recorder::default());
    mixer.add_listener(recorder.clone());

    let (sender, chunks) = mpsc::channel();
    let format = AudioFormat::new(8_000, SampleWidth::Sixteen, 1, false);
    let feed: Arc<dyn AudioResource> = Arc::new(LiveResource::new(chunks, format));
    let id = mixer
        .play_scenario(&Scenario::new(Arc::clone(&room), feed))
        .unwrap();

    thread::sleep(Duration::from_millis(60));
    assert!(mixer.is_active(id));
    assert!(!recorder.events().contains(&Event::Started(id)));

    sender.send(vec![0; 2_000]).unwrap();
    let deadline = Instant::now() + WAIT;
    while !recorder.events().contains(&Event::Started(id)) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(recorder.events().contains(&Event::Started(id)));

    drop(sender);
    assert!(mixer.wait_for_completion(id, WAIT));
    mixer.stop().unwrap();
}
