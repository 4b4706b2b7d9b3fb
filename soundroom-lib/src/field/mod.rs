//! Per-speaker gain computation.
//!
//! A [`VolumeRatio`] turns the current source and listener positions into a
//! relative, non-negative weight per speaker. A [`Normalize`] algorithm then
//! maps those weights onto the `[0, 1]` volumes the mixer applies. Both are
//! pure functions of their inputs.

mod normalize;
mod ratio;

pub use normalize::Normalize;
pub use ratio::{angle_between, VolumeRatio};

use std::collections::HashMap;

use crate::room::{Point3, Room, SpeakerId};

/// Ratio or volume keyed by speaker id.
pub type VolumeMap = HashMap<SpeakerId, f64>;

/// Positions sampled for one tick.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub source: Point3,
    pub listener: Point3,
    pub room: &'a Room,
}

impl<'a> Snapshot<'a> {
    pub fn new(source: Point3, listener: Point3, room: &'a Room) -> Self {
        Self {
            source,
            listener,
            room,
        }
    }
}

/// Run `ratio` then `normalize` for one snapshot.
pub fn volumes(snapshot: &Snapshot<'_>, ratio: &VolumeRatio, normalize: &Normalize) -> VolumeMap {
    normalize.apply(&ratio.compute(snapshot))
}
