//! Physical room model: speakers and their positions.

mod location;

pub use location::{Location, LocationSpec};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{MixerError, MixerResult};

/// Identifier of a speaker, unique within its room.
pub type SpeakerId = u32;

/// A position in room coordinates (metres).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const ORIGIN: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn scale(self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn dot(self, other: Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction. A zero vector yields NaN components.
    pub fn normalized(self) -> Self {
        self.scale(1.0 / self.length())
    }

    /// Point `t` of the way from `self` to `other`.
    pub fn lerp(self, other: Self, t: f64) -> Self {
        self.add(other.sub(self).scale(t))
    }
}

/// A loudspeaker placed in the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speaker {
    pub id: SpeakerId,
    pub position: Point3,
    /// Per-speaker level trim. Carried through but not applied by any
    /// volume algorithm.
    #[serde(default)]
    pub multiplier: Option<f64>,
}

impl Speaker {
    pub fn new(id: SpeakerId, position: Point3) -> Self {
        Self {
            id,
            position,
            multiplier: None,
        }
    }
}

/// Process-unique identity of a [`Room`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId(u64);

static NEXT_ROOM_ID: AtomicU64 = AtomicU64::new(1);

/// Immutable set of speakers shared by the mixer and every scenario.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    speakers: Vec<Speaker>,
}

impl Room {
    /// Build a room, rejecting duplicate speaker ids and rooms with fewer
    /// than two speakers.
    pub fn new(speakers: Vec<Speaker>) -> MixerResult<Self> {
        if speakers.len() < 2 {
            return Err(MixerError::Config(format!(
                "a room needs at least 2 speakers, got {}",
                speakers.len()
            )));
        }
        let mut seen = HashSet::new();
        for speaker in &speakers {
            if !seen.insert(speaker.id) {
                return Err(MixerError::Config(format!(
                    "duplicate speaker id {}",
                    speaker.id
                )));
            }
        }
        Ok(Self {
            id: RoomId(NEXT_ROOM_ID.fetch_add(1, Ordering::Relaxed)),
            speakers,
        })
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Speakers in declaration order.
    pub fn speakers(&self) -> &[Speaker] {
        &self.speakers
    }

    pub fn speaker(&self, id: SpeakerId) -> Option<&Speaker> {
        self.speakers.iter().find(|speaker| speaker.id == id)
    }

    pub fn contains(&self, id: SpeakerId) -> bool {
        self.speaker(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> Vec<Speaker> {
        vec![
            Speaker::new(1, Point3::ORIGIN),
            Speaker::new(2, Point3::new(10.0, 0.0, 0.0)),
        ]
    }

    #[test]
    fn rooms_get_distinct_ids() {
        let a = Room::new(pair()).unwrap();
        let b = Room::new(pair()).unwrap();
        assert_ne!(a.id(), b.id());
        assert!(a.contains(2));
        assert!(!a.contains(3));
    }

    #[test]
    fn small_or_duplicate_rooms_are_rejected() {
        assert!(Room::new(vec![Speaker::new(1, Point3::ORIGIN)]).is_err());
        let mut speakers = pair();
        speakers[1].id = 1;
        assert!(matches!(Room::new(speakers), Err(MixerError::Config(_))));
    }
}
