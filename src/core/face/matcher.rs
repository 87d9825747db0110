// src/core/face/matcher.rs
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::utils::error::{NodeError, Result};
use super::types::{Descriptor, FaceMatch, LabeledDescriptorSet, UNKNOWN_LABEL};

/// Distance metric used to compare descriptors. Each metric is scaled and
/// rounded to an integer; match thresholds are calibrated against these scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Metric {
    /// L2 distance, x10,000.
    Euclidean,
    /// L1 distance, x1,000.
    Manhattan,
    /// L-infinity distance, x100,000.
    Chebyshev,
    /// Mean of squared component differences, x1,000,000.
    #[default]
    #[serde(rename = "Mean Squared Error", alias = "MeanSquaredError")]
    MeanSquaredError,
}

impl Metric {
    pub fn distance(&self, known: &Descriptor, unknown: &Descriptor) -> u64 {
        let diffs = known
            .as_slice()
            .iter()
            .zip(unknown.as_slice())
            .map(|(a, b)| *a as f64 - *b as f64);

        let (raw, scale) = match self {
            Metric::Euclidean => (diffs.map(|d| d * d).sum::<f64>().sqrt(), 10_000.0),
            Metric::Manhattan => (diffs.map(f64::abs).sum::<f64>(), 1_000.0),
            Metric::Chebyshev => (diffs.map(f64::abs).fold(0.0, f64::max), 100_000.0),
            Metric::MeanSquaredError => {
                let len = known.as_slice().len() as f64;
                (diffs.map(|d| d * d).sum::<f64>() / len, 1_000_000.0)
            }
        };

        (raw * scale).round() as u64
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Euclidean => write!(f, "Euclidean"),
            Metric::Manhattan => write!(f, "Manhattan"),
            Metric::Chebyshev => write!(f, "Chebyshev"),
            Metric::MeanSquaredError => write!(f, "Mean Squared Error"),
        }
    }
}

/// Closest distance between `unknown` and any descriptor enrolled in `set`.
pub fn nearest_distance(
    metric: Metric,
    set: &LabeledDescriptorSet,
    unknown: &Descriptor,
) -> Result<u64> {
    set.descriptors
        .iter()
        .map(|known| metric.distance(known, unknown))
        .min()
        .ok_or_else(|| NodeError::EmptyDescriptorSet(set.label.clone()))
}

/// Nearest-neighbour match across every labelled set. The first set wins on
/// equal distances. The label is reported only when the distance is strictly
/// below `threshold`, otherwise it is [`UNKNOWN_LABEL`]. Returns `None` when no
/// set has any descriptors.
pub fn best_match(
    metric: Metric,
    sets: &[LabeledDescriptorSet],
    unknown: &Descriptor,
    threshold: f64,
) -> Option<FaceMatch> {
    let mut best: Option<(&str, u64)> = None;

    for set in sets {
        let distance = match nearest_distance(metric, set, unknown) {
            Ok(distance) => distance,
            Err(e) => {
                warn!("Skipping comparison set: {}", e);
                continue;
            }
        };

        if best.map_or(true, |(_, current)| distance < current) {
            best = Some((set.label.as_str(), distance));
        }
    }

    best.map(|(label, distance)| FaceMatch {
        label: if (distance as f64) < threshold {
            label.to_string()
        } else {
            UNKNOWN_LABEL.to_string()
        },
        distance,
    })
}
