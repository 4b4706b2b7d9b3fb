use serde::{Deserialize, Serialize};

use super::VolumeMap;

/// Maps relative ratios onto `[0, 1]` volumes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Normalize {
    /// Linear rescale: the smallest ratio becomes 0 and the largest 1. If all
    /// ratios are equal every speaker gets 1.
    Fractional,
    /// Scale so the volumes add up to `sum`, then cap each at 1.
    MaxSum { sum: f64 },
}

impl Normalize {
    pub fn apply(&self, ratios: &VolumeMap) -> VolumeMap {
        match *self {
            Self::Fractional => fractional(ratios),
            Self::MaxSum { sum } => max_sum(ratios, sum),
        }
    }
}

fn fractional(ratios: &VolumeMap) -> VolumeMap {
    let min = ratios.values().copied().fold(f64::INFINITY, f64::min);
    let max = ratios.values().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    ratios
        .iter()
        .map(|(id, ratio)| {
            let volume = if range == 0.0 {
                1.0
            } else if *ratio == max {
                1.0
            } else {
                (ratio - min) / range
            };
            (*id, volume)
        })
        .collect()
}

fn max_sum(ratios: &VolumeMap, sum: f64) -> VolumeMap {
    let total: f64 = ratios.values().sum();
    if total <= 0.0 || sum <= 0.0 {
        return ratios.keys().map(|id| (*id, 0.0)).collect();
    }
    let divisor = total / sum;
    ratios
        .iter()
        .map(|(id, ratio)| (*id, (ratio / divisor).min(1.0)))
        .collect()
}
