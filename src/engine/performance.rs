use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::performance::DriverPerformance;
use crate::store::{AssignmentStore, DeliveryStore, PerformanceStore};

/// Rebuilds a driver's aggregate from the complete delivery and offer history.
///
/// Every delivery the driver ever held counts towards `total_deliveries`.
/// Outcomes (completion, cancellation, rating) only count for the driver the
/// delivery ended with. `updated_at` is the newest timestamp found in that
/// history, so running it twice over the same history yields the same row.
pub fn compute_performance(
    driver_id: Uuid,
    deliveries: &[Delivery],
    assignments: &[Assignment],
    on_time_factor: f64,
) -> DriverPerformance {
    let kept: Vec<&Delivery> = deliveries
        .iter()
        .filter(|delivery| delivery.driver_id == Some(driver_id))
        .collect();

    let completed: Vec<&Delivery> = kept
        .iter()
        .copied()
        .filter(|delivery| delivery.status == DeliveryStatus::Delivered)
        .collect();
    let cancelled = kept
        .iter()
        .filter(|delivery| delivery.status == DeliveryStatus::Cancelled)
        .count();

    let timed: Vec<(f64, &Delivery)> = completed
        .iter()
        .filter_map(|delivery| delivery.elapsed_minutes().map(|minutes| (minutes, *delivery)))
        .collect();

    let average_delivery_minutes = mean(timed.iter().map(|(minutes, _)| *minutes));
    let on_time = timed
        .iter()
        .filter(|(minutes, delivery)| *minutes <= delivery.estimated_minutes as f64 * on_time_factor)
        .count();
    let on_time_rate = percentage(on_time, completed.len());

    let ratings: Vec<f64> = kept
        .iter()
        .filter_map(|delivery| delivery.customer_rating.map(f64::from))
        .collect();

    let accepted = count_status(assignments, AssignmentStatus::Accepted);
    // Withdrawn offers are the dispatcher's doing, not the driver's.
    let declined = count_status(assignments, AssignmentStatus::Rejected)
        + assignments.iter().filter(|assignment| assignment.lapsed()).count();

    let updated_at = deliveries
        .iter()
        .map(|delivery| delivery.updated_at)
        .chain(assignments.iter().map(|assignment| {
            assignment
                .response
                .as_ref()
                .map(|response| response.responded_at)
                .unwrap_or(assignment.offered_at)
        }))
        .max()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    DriverPerformance {
        driver_id,
        total_deliveries: deliveries.len() as u64,
        completed_deliveries: completed.len() as u64,
        cancelled_deliveries: cancelled as u64,
        average_rating: mean(ratings.iter().copied()),
        rating_count: ratings.len() as u64,
        average_delivery_minutes,
        on_time_rate,
        acceptance_rate: percentage(accepted, accepted + declined),
        updated_at,
    }
}

fn count_status(assignments: &[Assignment], status: AssignmentStatus) -> usize {
    assignments
        .iter()
        .filter(|assignment| assignment.status == status)
        .count()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[derive(Clone)]
pub struct PerformanceAggregator {
    deliveries: Arc<dyn DeliveryStore>,
    assignments: Arc<dyn AssignmentStore>,
    performance: Arc<dyn PerformanceStore>,
    on_time_factor: f64,
}

impl PerformanceAggregator {
    pub fn new(
        deliveries: Arc<dyn DeliveryStore>,
        assignments: Arc<dyn AssignmentStore>,
        performance: Arc<dyn PerformanceStore>,
        on_time_factor: f64,
    ) -> Self {
        Self {
            deliveries,
            assignments,
            performance,
            on_time_factor,
        }
    }

    pub async fn recompute(&self, driver_id: Uuid) -> AppResult<DriverPerformance> {
        let deliveries = self.deliveries.deliveries_for_driver(driver_id).await?;
        let assignments = self.assignments.assignments_for_driver(driver_id).await?;

        let performance =
            compute_performance(driver_id, &deliveries, &assignments, self.on_time_factor);
        self.performance.replace_performance(performance.clone()).await?;

        info!(
            driver_id = %driver_id,
            total = performance.total_deliveries,
            completed = performance.completed_deliveries,
            on_time_rate = performance.on_time_rate,
            "driver performance recomputed"
        );

        Ok(performance)
    }

    pub async fn get(&self, driver_id: Uuid) -> AppResult<Option<DriverPerformance>> {
        self.performance.get_performance(driver_id).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::compute_performance;
    use crate::models::assignment::{Assignment, AssignmentResponse, AssignmentStatus};
    use crate::models::delivery::{
        Address, AssignmentType, CreateDeliveryRequest, Delivery, DeliveryStatus,
    };
    use crate::models::driver::GeoPoint;

    fn delivery(driver_id: Uuid, status: DeliveryStatus, estimated: u32) -> Delivery {
        let address = Address {
            line: "Somewhere 1".to_string(),
            location: GeoPoint { lat: 0.0, lng: 0.0 },
        };
        let mut delivery = Delivery::new(
            CreateDeliveryRequest {
                order_id: Uuid::new_v4(),
                pickup: address.clone(),
                dropoff: address,
                estimated_minutes: estimated,
                distance_km: 2.0,
                delivery_fee: 3.0,
                priority: Default::default(),
                notes: None,
            },
            Utc::now(),
        )
        .unwrap();
        delivery.driver_id = Some(driver_id);
        delivery.status = status;
        delivery
    }

    fn delivered_in(driver_id: Uuid, estimated: u32, minutes: i64) -> Delivery {
        let mut delivery = delivery(driver_id, DeliveryStatus::Delivered, estimated);
        let picked_up = Utc::now() - Duration::hours(2);
        delivery.picked_up_at = Some(picked_up);
        delivery.delivered_at = Some(picked_up + Duration::minutes(minutes));
        delivery
    }

    fn assignment(driver_id: Uuid, status: AssignmentStatus) -> Assignment {
        let mut assignment = Assignment::offer(
            Uuid::new_v4(),
            driver_id,
            AssignmentType::Auto,
            Utc::now(),
            Duration::minutes(5),
        );
        assignment.status = status;
        assignment
    }

    #[test]
    fn counts_and_rates_follow_history() {
        let driver_id = Uuid::new_v4();
        let deliveries = vec![
            delivered_in(driver_id, 20, 20),
            delivered_in(driver_id, 20, 22),
            delivered_in(driver_id, 20, 30),
            delivery(driver_id, DeliveryStatus::Cancelled, 20),
            delivery(driver_id, DeliveryStatus::InTransit, 20),
        ];
        let assignments = vec![
            assignment(driver_id, AssignmentStatus::Accepted),
            assignment(driver_id, AssignmentStatus::Accepted),
            assignment(driver_id, AssignmentStatus::Accepted),
            assignment(driver_id, AssignmentStatus::Rejected),
            assignment(driver_id, AssignmentStatus::Expired),
            assignment(driver_id, AssignmentStatus::Pending),
        ];

        let performance = compute_performance(driver_id, &deliveries, &assignments, 1.1);

        assert_eq!(performance.total_deliveries, 5);
        assert_eq!(performance.completed_deliveries, 3);
        assert_eq!(performance.cancelled_deliveries, 1);
        assert!((performance.average_delivery_minutes - 24.0).abs() < 1e-9);
        // 20 and 22 minutes are within 110% of 20; 30 is not.
        assert!((performance.on_time_rate - 200.0 / 3.0).abs() < 1e-9);
        assert!((performance.acceptance_rate - 60.0).abs() < 1e-9);
    }

    #[test]
    fn empty_history_yields_zero_rates() {
        let driver_id = Uuid::new_v4();
        let performance = compute_performance(driver_id, &[], &[], 1.1);

        assert_eq!(performance.total_deliveries, 0);
        assert_eq!(performance.on_time_rate, 0.0);
        assert_eq!(performance.acceptance_rate, 0.0);
        assert_eq!(performance.average_delivery_minutes, 0.0);
        assert_eq!(performance.average_rating, 0.0);
    }

    #[test]
    fn ratings_average_over_rated_deliveries_only() {
        let driver_id = Uuid::new_v4();
        let mut rated_high = delivered_in(driver_id, 30, 25);
        rated_high.customer_rating = Some(5);
        let mut rated_low = delivered_in(driver_id, 30, 25);
        rated_low.customer_rating = Some(2);
        let unrated = delivered_in(driver_id, 30, 25);

        let performance =
            compute_performance(driver_id, &[rated_high, rated_low, unrated], &[], 1.1);

        assert_eq!(performance.rating_count, 2);
        assert!((performance.average_rating - 3.5).abs() < 1e-9);
        assert_eq!(performance.on_time_rate, 100.0);
    }

    #[test]
    fn completed_without_timestamps_counts_against_on_time_rate() {
        let driver_id = Uuid::new_v4();
        let untimed = delivery(driver_id, DeliveryStatus::Delivered, 20);
        let timed = delivered_in(driver_id, 20, 10);

        let performance = compute_performance(driver_id, &[untimed, timed], &[], 1.1);

        assert_eq!(performance.completed_deliveries, 2);
        assert!((performance.average_delivery_minutes - 10.0).abs() < 1e-9);
        assert_eq!(performance.on_time_rate, 50.0);
    }

    #[test]
    fn withdrawn_offers_do_not_hurt_acceptance() {
        let driver_id = Uuid::new_v4();
        let mut withdrawn = assignment(driver_id, AssignmentStatus::Expired);
        withdrawn.withdrawn = true;
        // A lapsed offer with a stray response still counts against the driver.
        let mut lapsed = assignment(driver_id, AssignmentStatus::Expired);
        lapsed.response = Some(AssignmentResponse {
            responded_at: Utc::now(),
            reason: None,
        });
        let assignments = vec![
            assignment(driver_id, AssignmentStatus::Accepted),
            withdrawn,
            lapsed,
        ];

        let performance = compute_performance(driver_id, &[], &assignments, 1.1);

        assert_eq!(performance.acceptance_rate, 50.0);
    }

    #[test]
    fn handed_off_delivery_counts_only_towards_total() {
        let driver_id = Uuid::new_v4();
        let mut handed_off = delivered_in(Uuid::new_v4(), 20, 15);
        handed_off.customer_rating = Some(1);
        let own = delivered_in(driver_id, 20, 15);

        let performance = compute_performance(driver_id, &[handed_off, own], &[], 1.1);

        assert_eq!(performance.total_deliveries, 2);
        assert_eq!(performance.completed_deliveries, 1);
        assert_eq!(performance.rating_count, 0);
        assert_eq!(performance.on_time_rate, 100.0);
    }

    #[test]
    fn recomputing_same_history_is_identical() {
        let driver_id = Uuid::new_v4();
        let deliveries = vec![delivered_in(driver_id, 15, 12)];
        let assignments = vec![assignment(driver_id, AssignmentStatus::Accepted)];

        let first = compute_performance(driver_id, &deliveries, &assignments, 1.1);
        let second = compute_performance(driver_id, &deliveries, &assignments, 1.1);

        assert_eq!(first, second);
    }
}
