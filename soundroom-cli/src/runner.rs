use clap::ArgMatches;
use log::info;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use soundroom_lib::mixer::MixerListener;
use soundroom_lib::output::{
    list_output_devices, AudioLine, DeviceResolver, NullLine, OutputDevice, RodioResolver,
};
use soundroom_lib::scenario::PlaybackId;
use soundroom_lib::{Mixer, MixerConfig, MixerError, MixerResult, MixerState};

use crate::session::Session;

const IDLE_POLL: Duration = Duration::from_millis(250);

/// Logs playback lifecycle events.
struct LogListener;

impl MixerListener for LogListener {
    fn state_changed(&self, from: MixerState, to: MixerState) {
        info!("mixer {:?} -> {:?}", from, to);
    }

    fn scenario_started(&self, id: PlaybackId) {
        info!("playback {} started", id);
    }

    fn scenario_restarted(&self, id: PlaybackId) {
        info!("playback {} looped", id);
    }

    fn scenario_stopped(&self, id: PlaybackId) {
        info!("playback {} finished", id);
    }
}

pub fn run(args: &ArgMatches) -> MixerResult<i32> {
    match args.subcommand() {
        Some(("devices", _)) => {
            for name in list_output_devices()? {
                println!("{}", name);
            }
            Ok(0)
        }
        Some(("config", _)) => {
            let json = serde_json::to_string_pretty(&MixerConfig::default())
                .map_err(|err| MixerError::Config(err.to_string()))?;
            println!("{}", json);
            Ok(0)
        }
        Some(("play", play_args)) => play(play_args),
        _ => Ok(-1),
    }
}

fn play(args: &ArgMatches) -> MixerResult<i32> {
    let path = args
        .get_one::<String>("SESSION")
        .ok_or_else(|| MixerError::Config("missing session path".to_string()))?;
    let path = Path::new(path);
    let mut session = Session::load(path)?;
    if args.get_flag("no-warmup") {
        session.config.warmup = false;
    }
    if let Some(tick_ms) = args.get_one::<u64>("tick-ms") {
        session.config.tick_ms = *tick_ms;
    }
    let headless = args.get_flag("headless");
    let limit = args.get_one::<f64>("seconds").copied();

    let room = session.room()?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let scenarios = session.scenarios(&room, base)?;

    let resolver = RodioResolver;
    let mut devices = Vec::with_capacity(session.outputs.len());
    for output in &session.outputs {
        let line: Box<dyn AudioLine> = if headless {
            Box::new(NullLine::new(output.device.clone()))
        } else {
            resolver.resolve(&output.device)?
        };
        devices.push(OutputDevice::new(output.binding, line));
    }

    let mixer = Mixer::new(session.config.clone(), room, devices)?;
    mixer.add_listener(Arc::new(LogListener));
    mixer.initialize()?;
    mixer.start()?;

    let started = Instant::now();
    for scenario in &scenarios {
        mixer.play_scenario(scenario)?;
    }

    loop {
        if mixer.wait_for_idle(IDLE_POLL) {
            break;
        }
        if let Some(limit) = limit {
            if started.elapsed().as_secs_f64() >= limit {
                info!("time limit reached with {} playbacks active", mixer.active_count());
                break;
            }
        }
    }

    mixer.stop()?;
    println!(
        "played {} scenario(s) in {:.2}s",
        scenarios.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(0)
}
