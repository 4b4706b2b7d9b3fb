//! Playback templates and their running instances.
//!
//! A [`Scenario`] is an immutable recipe that can be played any number of
//! times, concurrently. Each play produces an [`ActiveScenario`] owning its
//! own locations, input buffer and [`Playback`] state.

mod active;
mod playback;

pub use active::{ActiveScenario, PlaybackId};
pub use playback::{Playback, PlaybackSpec};

use std::fmt;
use std::sync::Arc;

use crate::audio::resource::AudioResource;
use crate::field::{Normalize, VolumeRatio};
use crate::room::{LocationSpec, Point3, Room};

/// Reusable description of something to play in a room.
#[derive(Clone)]
pub struct Scenario {
    room: Arc<Room>,
    resource: Arc<dyn AudioResource>,
    source: LocationSpec,
    listener: LocationSpec,
    ratio: VolumeRatio,
    normalize: Normalize,
    playback: PlaybackSpec,
}

impl Scenario {
    /// A single play of `resource` from the room origin, heard from the
    /// origin, through the closest speaker.
    pub fn new(room: Arc<Room>, resource: Arc<dyn AudioResource>) -> Self {
        Self {
            room,
            resource,
            source: LocationSpec::fixed(Point3::ORIGIN),
            listener: LocationSpec::fixed(Point3::ORIGIN),
            ratio: VolumeRatio::OnlyClosest,
            normalize: Normalize::Fractional,
            playback: PlaybackSpec::default(),
        }
    }

    pub fn with_source(mut self, source: LocationSpec) -> Self {
        self.source = source;
        self
    }

    pub fn with_listener(mut self, listener: LocationSpec) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_ratio(mut self, ratio: VolumeRatio) -> Self {
        self.ratio = ratio;
        self
    }

    pub fn with_normalize(mut self, normalize: Normalize) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_playback(mut self, playback: PlaybackSpec) -> Self {
        self.playback = playback;
        self
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    pub fn resource(&self) -> &Arc<dyn AudioResource> {
        &self.resource
    }

    pub fn source(&self) -> &LocationSpec {
        &self.source
    }

    pub fn listener(&self) -> &LocationSpec {
        &self.listener
    }

    pub fn ratio(&self) -> &VolumeRatio {
        &self.ratio
    }

    pub fn normalize(&self) -> Normalize {
        self.normalize
    }

    pub fn playback(&self) -> PlaybackSpec {
        self.playback
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("room", &self.room.id())
            .field("resource", &self.resource.describe())
            .field("source", &self.source)
            .field("listener", &self.listener)
            .field("ratio", &self.ratio)
            .field("normalize", &self.normalize)
            .field("playback", &self.playback)
            .finish()
    }
}
