//! Read-only ranking views over the performance store.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::AppResult;
use crate::models::performance::{DriverPerformance, DriverRanking, RankingMetric};
use crate::store::PerformanceStore;

#[derive(Clone)]
pub struct Reporting {
    performance: Arc<dyn PerformanceStore>,
}

impl Reporting {
    pub fn new(performance: Arc<dyn PerformanceStore>) -> Self {
        Self { performance }
    }

    /// Best-rated drivers, busier drivers first among equal ratings.
    pub async fn top_drivers(&self, limit: usize) -> AppResult<Vec<DriverPerformance>> {
        let mut rows = self.performance.list_performance().await?;
        rows.sort_by(|a, b| {
            b.average_rating
                .total_cmp(&a.average_rating)
                .then(b.completed_deliveries.cmp(&a.completed_deliveries))
                .then(a.driver_id.cmp(&b.driver_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    pub async fn rankings(
        &self,
        metric: RankingMetric,
        limit: usize,
    ) -> AppResult<Vec<DriverRanking>> {
        let mut rows = self.performance.list_performance().await?;
        rows.sort_by(|a, b| compare(metric, a, b));

        Ok(rows
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(index, performance)| DriverRanking {
                rank: index + 1,
                driver_id: performance.driver_id,
                value: metric_value(metric, &performance),
                performance,
            })
            .collect())
    }
}

fn metric_value(metric: RankingMetric, performance: &DriverPerformance) -> f64 {
    match metric {
        RankingMetric::Rating => performance.average_rating,
        RankingMetric::Completed => performance.completed_deliveries as f64,
        RankingMetric::OnTime => performance.on_time_rate,
        RankingMetric::Acceptance => performance.acceptance_rate,
    }
}

fn compare(metric: RankingMetric, a: &DriverPerformance, b: &DriverPerformance) -> Ordering {
    metric_value(metric, b)
        .total_cmp(&metric_value(metric, a))
        .then(b.completed_deliveries.cmp(&a.completed_deliveries))
        .then(a.driver_id.cmp(&b.driver_id))
}
