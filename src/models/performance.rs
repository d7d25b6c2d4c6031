use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Derived per-driver aggregate; always rebuilt from the full history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverPerformance {
    pub driver_id: Uuid,
    pub total_deliveries: u64,
    pub completed_deliveries: u64,
    pub cancelled_deliveries: u64,
    pub average_rating: f64,
    pub rating_count: u64,
    pub average_delivery_minutes: f64,
    pub on_time_rate: f64,
    pub acceptance_rate: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RankingMetric {
    #[default]
    Rating,
    Completed,
    OnTime,
    Acceptance,
}

impl FromStr for RankingMetric {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "rating" => Ok(RankingMetric::Rating),
            "completed" => Ok(RankingMetric::Completed),
            "on_time" => Ok(RankingMetric::OnTime),
            "acceptance" => Ok(RankingMetric::Acceptance),
            other => Err(AppError::BadRequest(format!(
                "unknown ranking metric: {other}, expected rating/completed/on_time/acceptance"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverRanking {
    pub rank: usize,
    pub driver_id: Uuid,
    pub value: f64,
    pub performance: DriverPerformance,
}
