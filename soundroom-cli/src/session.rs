//! JSON session files: a room, its outputs, mixer settings and the
//! scenarios to play.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use soundroom_lib::audio::decode::FileResource;
use soundroom_lib::audio::resource::{AudioResource, NoiseResource, ToneResource};
use soundroom_lib::field::{Normalize, VolumeRatio};
use soundroom_lib::output::DeviceBinding;
use soundroom_lib::room::{LocationSpec, Point3, Room, Speaker};
use soundroom_lib::scenario::{PlaybackSpec, Scenario};
use soundroom_lib::{MixerConfig, MixerError, MixerResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub config: MixerConfig,
    pub speakers: Vec<Speaker>,
    pub outputs: Vec<OutputSpec>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Output device name, or `default`.
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(flatten)]
    pub binding: DeviceBinding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioSpec {
    /// Media file; relative paths resolve against the session file.
    File { path: PathBuf },
    Tone {
        frequency: f64,
        duration_ms: u64,
        #[serde(default = "default_amplitude")]
        amplitude: f64,
    },
    Noise {
        duration_ms: u64,
        #[serde(default)]
        seed: Option<u64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub audio: AudioSpec,
    #[serde(default = "origin")]
    pub source: LocationSpec,
    #[serde(default = "origin")]
    pub listener: LocationSpec,
    #[serde(default = "default_ratio")]
    pub ratio: VolumeRatio,
    #[serde(default = "default_normalize")]
    pub normalize: Normalize,
    #[serde(default)]
    pub playback: PlaybackSpec,
}

fn default_device() -> String {
    "default".to_string()
}

fn default_amplitude() -> f64 {
    0.5
}

fn origin() -> LocationSpec {
    LocationSpec::fixed(Point3::ORIGIN)
}

fn default_ratio() -> VolumeRatio {
    VolumeRatio::FieldOfHearing { cutoff_angle: 90.0 }
}

fn default_normalize() -> Normalize {
    Normalize::Fractional
}

impl Session {
    pub fn load(path: &Path) -> MixerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|err| MixerError::Config(format!("{}: {}", path.display(), err)))
    }

    pub fn room(&self) -> MixerResult<Arc<Room>> {
        Ok(Arc::new(Room::new(self.speakers.clone())?))
    }

    /// Build every scenario for `room`.
    ///
    /// # Arguments
    ///
    /// * `base` - directory that relative file paths are resolved against.
    pub fn scenarios(&self, room: &Arc<Room>, base: &Path) -> MixerResult<Vec<Scenario>> {
        let format = self.config.internal_format()?;
        self.scenarios
            .iter()
            .map(|spec| {
                let resource: Arc<dyn AudioResource> = match &spec.audio {
                    AudioSpec::File { path } => Arc::new(FileResource::new(base.join(path))?),
                    AudioSpec::Tone {
                        frequency,
                        duration_ms,
                        amplitude,
                    } => Arc::new(
                        ToneResource::new(*frequency, *duration_ms, format)
                            .with_amplitude(*amplitude),
                    ),
                    AudioSpec::Noise { duration_ms, seed } => {
                        let noise = NoiseResource::new(*duration_ms, format);
                        Arc::new(match seed {
                            Some(seed) => noise.with_seed(*seed),
                            None => noise,
                        })
                    }
                };
                Ok(Scenario::new(Arc::clone(room), resource)
                    .with_source(spec.source.clone())
                    .with_listener(spec.listener.clone())
                    .with_ratio(spec.ratio.clone())
                    .with_normalize(spec.normalize)
                    .with_playback(spec.playback))
            })
            .collect()
    }
}
