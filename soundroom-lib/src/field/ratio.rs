use serde::{Deserialize, Serialize};

use crate::room::Point3;

use super::{Snapshot, VolumeMap};

/// Relative loudness algorithms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VolumeRatio {
    /// Weight falls off linearly with the angle between the source and the
    /// speaker as seen from the listener, reaching zero at `cutoff_angle`
    /// degrees.
    FieldOfHearing { cutoff_angle: f64 },
    /// Only the speaker closest in angle to the source plays. When every
    /// speaker sits at the same angle they all play.
    OnlyClosest,
    /// Constant weights regardless of position. Speakers not listed get 0.
    Fixed { ratios: VolumeMap },
}

impl VolumeRatio {
    /// Weight for every speaker in the snapshot's room.
    pub fn compute(&self, snapshot: &Snapshot<'_>) -> VolumeMap {
        match self {
            Self::FieldOfHearing { cutoff_angle } => snapshot
                .room
                .speakers()
                .iter()
                .map(|speaker| {
                    let angle = speaker_angle(snapshot, speaker.position);
                    (speaker.id, (cutoff_angle - angle).max(0.0))
                })
                .collect(),
            Self::OnlyClosest => only_closest(snapshot),
            Self::Fixed { ratios } => snapshot
                .room
                .speakers()
                .iter()
                .map(|speaker| {
                    let ratio = ratios.get(&speaker.id).copied().unwrap_or(0.0);
                    (speaker.id, ratio.max(0.0))
                })
                .collect(),
        }
    }
}

fn only_closest(snapshot: &Snapshot<'_>) -> VolumeMap {
    let speakers = snapshot.room.speakers();
    let angles: Vec<f64> = speakers
        .iter()
        .map(|speaker| speaker_angle(snapshot, speaker.position))
        .collect();

    let mut closest: Option<usize> = None;
    let mut widest = f64::MIN;
    for (index, angle) in angles.iter().enumerate() {
        // NaN never compares less, so an undefined angle is never picked.
        if closest.map_or(!angle.is_nan(), |best| *angle < angles[best]) {
            closest = Some(index);
        }
        widest = widest.max(*angle);
    }

    let spread = closest.map(|best| widest - angles[best]);
    speakers
        .iter()
        .enumerate()
        .map(|(index, speaker)| {
            let ratio = match spread {
                Some(diff) if diff == 0.0 => 1.0,
                _ if closest == Some(index) => 1.0,
                _ => 0.0,
            };
            (speaker.id, ratio)
        })
        .collect()
}

fn speaker_angle(snapshot: &Snapshot<'_>, speaker: Point3) -> f64 {
    angle_between(
        snapshot.source.sub(snapshot.listener),
        speaker.sub(snapshot.listener),
    )
}

/// Angle in degrees between two direction vectors.
///
/// The dot product is clamped to `[-1, 1]` before `acos` to absorb rounding
/// drift. A zero-length vector yields NaN.
pub fn angle_between(a: Point3, b: Point3) -> f64 {
    let cos = a.normalized().dot(b.normalized()).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}
