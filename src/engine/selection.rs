use serde::{Deserialize, Serialize};

use crate::models::assignment::ScoreBreakdown;
use crate::models::driver::DriverCandidate;

/// Relative weight of proximity versus historical rating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SelectionWeights {
    pub distance: f64,
    pub rating: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            distance: 0.7,
            rating: 0.3,
        }
    }
}

pub fn score(candidate: &DriverCandidate, weights: &SelectionWeights) -> ScoreBreakdown {
    let distance_score = distance_score(candidate.distance_km);
    let rating_score = rating_score(candidate.rating);

    ScoreBreakdown {
        distance_score,
        rating_score,
        total: weights.distance * distance_score + weights.rating * rating_score,
    }
}

/// Highest-scoring candidate; ties go to the earliest one in the list.
pub fn select_best<'a>(
    candidates: &'a [DriverCandidate],
    weights: &SelectionWeights,
) -> Option<(&'a DriverCandidate, ScoreBreakdown)> {
    let mut best: Option<(&DriverCandidate, ScoreBreakdown)> = None;

    for candidate in candidates {
        let breakdown = score(candidate, weights);
        let better = match &best {
            Some((_, current)) => breakdown.total > current.total,
            None => true,
        };
        if better {
            best = Some((candidate, breakdown));
        }
    }

    best
}

fn distance_score(distance_km: f64) -> f64 {
    1.0 / (1.0 + distance_km.max(0.0))
}

fn rating_score(rating: f64) -> f64 {
    (rating / 5.0).clamp(0.0, 1.0)
}
