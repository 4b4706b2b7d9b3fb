//! Time-dependent positions for sound sources and listeners.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use super::Point3;

/// Template describing how a position moves over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocationSpec {
    /// Never moves.
    Fixed { position: Point3 },
    /// Travels from `from` to `to` over `duration_ms`, then stays at `to`.
    Linear {
        from: Point3,
        to: Point3,
        duration_ms: u64,
    },
    /// Circles `center` in the horizontal plane once every `period_ms`.
    Orbit {
        center: Point3,
        radius: f64,
        period_ms: u64,
        #[serde(default)]
        phase_degrees: f64,
    },
    /// Visits `points` in order, `segment_ms` per leg.
    Waypoints {
        points: Vec<Point3>,
        segment_ms: u64,
        #[serde(default)]
        looped: bool,
    },
}

impl LocationSpec {
    pub fn fixed(position: Point3) -> Self {
        Self::Fixed { position }
    }

    /// Build an evaluator for one playback.
    pub fn instantiate(&self) -> Location {
        Location { spec: self.clone() }
    }
}

/// Evaluator for a [`LocationSpec`], owned by one playback.
#[derive(Debug, Clone)]
pub struct Location {
    spec: LocationSpec,
}

impl Location {
    /// Position `elapsed_ms` after the playback started.
    pub fn at(&mut self, elapsed_ms: u64) -> Point3 {
        match &self.spec {
            LocationSpec::Fixed { position } => *position,
            LocationSpec::Linear {
                from,
                to,
                duration_ms,
            } => {
                if *duration_ms == 0 || elapsed_ms >= *duration_ms {
                    *to
                } else {
                    from.lerp(*to, elapsed_ms as f64 / *duration_ms as f64)
                }
            }
            LocationSpec::Orbit {
                center,
                radius,
                period_ms,
                phase_degrees,
            } => {
                let turns = if *period_ms == 0 {
                    0.0
                } else {
                    (elapsed_ms % period_ms) as f64 / *period_ms as f64
                };
                let angle = turns * TAU + phase_degrees.to_radians();
                center.add(Point3::new(radius * angle.cos(), radius * angle.sin(), 0.0))
            }
            LocationSpec::Waypoints {
                points,
                segment_ms,
                looped,
            } => waypoint_at(points, *segment_ms, *looped, elapsed_ms),
        }
    }
}

fn waypoint_at(
    points: &[Point3],
    segment_ms: u64,
    looped: bool,
    elapsed_ms: u64,
) -> Point3 {
    match points.len() {
        0 => return Point3::ORIGIN,
        1 => return points[0],
        _ => {}
    }
    if segment_ms == 0 {
        return points[points.len() - 1];
    }
    let legs = if looped { points.len() } else { points.len() - 1 };
    let total_ms = segment_ms * legs as u64;
    let t = if looped {
        elapsed_ms % total_ms
    } else if elapsed_ms >= total_ms {
        return points[points.len() - 1];
    } else {
        elapsed_ms
    };

    let leg = (t / segment_ms) as usize;
    let from = points[leg];
    let to = points[(leg + 1) % points.len()];
    let within = (t % segment_ms) as f64 / segment_ms as f64;
    from.lerp(to, within)
}
