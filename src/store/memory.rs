use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::delivery::{Delivery, DeliveryQuery};
use crate::models::performance::DriverPerformance;
use crate::store::{AggregateChange, AssignmentStore, DeliveryStore, PerformanceStore};

/// Process-local store backed by `DashMap`s.
///
/// Lock order is `active_orders -> deliveries -> assignments`; `commit` never
/// touches `active_orders`, stale entries there are replaced lazily on insert.
#[derive(Default)]
pub struct MemoryStore {
    deliveries: DashMap<Uuid, Delivery>,
    active_orders: DashMap<Uuid, Uuid>,
    assignments: DashMap<Uuid, Assignment>,
    performance: DashMap<Uuid, DriverPerformance>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.len()
    }

    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }

    fn is_active(&self, delivery_id: &Uuid) -> bool {
        self.deliveries
            .get(delivery_id)
            .map(|delivery| delivery.is_active())
            .unwrap_or(false)
    }

    fn collect_assignments<F>(&self, keep: F) -> Vec<Assignment>
    where
        F: Fn(&Assignment) -> bool,
    {
        let mut assignments: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        assignments.sort_by_key(|assignment| assignment.offered_at);
        assignments
    }
}

#[async_trait]
impl DeliveryStore for MemoryStore {
    async fn insert_delivery(&self, delivery: Delivery) -> AppResult<Delivery> {
        match self.active_orders.entry(delivery.order_id) {
            Entry::Occupied(mut entry) => {
                if self.is_active(entry.get()) {
                    return Err(AppError::DuplicateDelivery {
                        order_id: delivery.order_id,
                    });
                }
                entry.insert(delivery.id);
            }
            Entry::Vacant(entry) => {
                entry.insert(delivery.id);
            }
        }

        self.deliveries.insert(delivery.id, delivery.clone());
        Ok(delivery)
    }

    async fn get_delivery(&self, id: Uuid) -> AppResult<Option<Delivery>> {
        Ok(self.deliveries.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_active_by_order(&self, order_id: Uuid) -> AppResult<Option<Delivery>> {
        let Some(delivery_id) = self.active_orders.get(&order_id).map(|entry| *entry.value())
        else {
            return Ok(None);
        };

        Ok(self
            .deliveries
            .get(&delivery_id)
            .filter(|delivery| delivery.is_active())
            .map(|delivery| delivery.value().clone()))
    }

    async fn search_deliveries(&self, query: &DeliveryQuery) -> AppResult<Vec<Delivery>> {
        let mut deliveries: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(deliveries
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn deliveries_for_driver(&self, driver_id: Uuid) -> AppResult<Vec<Delivery>> {
        let accepted: HashSet<Uuid> = self
            .assignments
            .iter()
            .filter(|entry| {
                let assignment = entry.value();
                assignment.driver_id == driver_id
                    && assignment.status == AssignmentStatus::Accepted
            })
            .map(|entry| entry.value().delivery_id)
            .collect();

        Ok(self
            .deliveries
            .iter()
            .filter(|entry| {
                let delivery = entry.value();
                delivery.driver_id == Some(driver_id) || accepted.contains(&delivery.id)
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn commit(&self, change: AggregateChange) -> AppResult<Delivery> {
        let AggregateChange {
            mut delivery,
            resolve,
            offer,
        } = change;

        // Held until the end of the commit: every write to this aggregate is
        // serialized on the delivery's shard lock.
        let mut stored = self
            .deliveries
            .get_mut(&delivery.id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", delivery.id)))?;

        if let Some(resolution) = &resolve {
            let assignment = self
                .assignments
                .get(&resolution.assignment_id)
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "assignment {} not found",
                        resolution.assignment_id
                    ))
                })?;

            if assignment.delivery_id != delivery.id {
                return Err(AppError::InvalidState(format!(
                    "assignment {} does not belong to delivery {}",
                    assignment.id, delivery.id
                )));
            }
            match assignment.status {
                AssignmentStatus::Pending => {}
                AssignmentStatus::Expired if assignment.withdrawn => {
                    return Err(AppError::InvalidState(format!(
                        "assignment {} was withdrawn",
                        assignment.id
                    )));
                }
                AssignmentStatus::Expired => {
                    return Err(AppError::AssignmentExpired {
                        assignment_id: assignment.id,
                    });
                }
                other => {
                    return Err(AppError::InvalidState(format!(
                        "assignment {} is already {}",
                        assignment.id,
                        other.as_str()
                    )));
                }
            }
        }

        if stored.version != delivery.version {
            return Err(AppError::InvalidState(format!(
                "delivery {} was modified concurrently (expected version {}, found {})",
                delivery.id, delivery.version, stored.version
            )));
        }

        if let Some(new_offer) = &offer {
            let resolved_id = resolve.as_ref().map(|resolution| resolution.assignment_id);
            let still_pending = self.assignments.iter().any(|entry| {
                let existing = entry.value();
                existing.delivery_id == new_offer.delivery_id
                    && existing.is_pending()
                    && Some(existing.id) != resolved_id
            });
            if still_pending {
                return Err(AppError::InvalidState(format!(
                    "delivery {} already has a pending offer",
                    new_offer.delivery_id
                )));
            }
        }

        if let Some(resolution) = resolve {
            if let Some(mut assignment) = self.assignments.get_mut(&resolution.assignment_id) {
                assignment.status = resolution.status;
                assignment.response = resolution.response;
                assignment.withdrawn = resolution.withdrawn;
            }
        }
        if let Some(new_offer) = offer {
            self.assignments.insert(new_offer.id, new_offer);
        }

        delivery.version = stored.version + 1;
        *stored = delivery.clone();

        Ok(delivery)
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn get_assignment(&self, id: Uuid) -> AppResult<Option<Assignment>> {
        Ok(self.assignments.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_pending(
        &self,
        delivery_id: Uuid,
        driver_id: Uuid,
    ) -> AppResult<Option<Assignment>> {
        Ok(self
            .assignments
            .iter()
            .find(|entry| {
                let assignment = entry.value();
                assignment.delivery_id == delivery_id
                    && assignment.driver_id == driver_id
                    && assignment.is_pending()
            })
            .map(|entry| entry.value().clone()))
    }

    async fn pending_for_delivery(&self, delivery_id: Uuid) -> AppResult<Option<Assignment>> {
        Ok(self
            .assignments
            .iter()
            .find(|entry| entry.value().delivery_id == delivery_id && entry.value().is_pending())
            .map(|entry| entry.value().clone()))
    }

    async fn pending_for_driver(&self, driver_id: Uuid) -> AppResult<Vec<Assignment>> {
        Ok(self.collect_assignments(|assignment| {
            assignment.driver_id == driver_id && assignment.is_pending()
        }))
    }

    async fn assignments_for_delivery(&self, delivery_id: Uuid) -> AppResult<Vec<Assignment>> {
        Ok(self.collect_assignments(|assignment| assignment.delivery_id == delivery_id))
    }

    async fn assignments_for_driver(&self, driver_id: Uuid) -> AppResult<Vec<Assignment>> {
        Ok(self.collect_assignments(|assignment| assignment.driver_id == driver_id))
    }

    async fn find_overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<Assignment>> {
        Ok(self.collect_assignments(|assignment| assignment.is_overdue(now)))
    }
}

#[async_trait]
impl PerformanceStore for MemoryStore {
    async fn replace_performance(&self, performance: DriverPerformance) -> AppResult<()> {
        self.performance.insert(performance.driver_id, performance);
        Ok(())
    }

    async fn get_performance(&self, driver_id: Uuid) -> AppResult<Option<DriverPerformance>> {
        Ok(self
            .performance
            .get(&driver_id)
            .map(|entry| entry.value().clone()))
    }

    async fn list_performance(&self) -> AppResult<Vec<DriverPerformance>> {
        Ok(self
            .performance
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::MemoryStore;
    use crate::error::AppError;
    use crate::models::assignment::{Assignment, AssignmentResolution, AssignmentStatus};
    use crate::models::delivery::{
        Address, AssignmentType, CreateDeliveryRequest, Delivery, DeliveryStatus,
    };
    use crate::models::driver::GeoPoint;
    use crate::store::{AggregateChange, AssignmentStore, DeliveryStore};

    fn delivery(order_id: Uuid) -> Delivery {
        let address = |lat: f64| Address {
            line: "Main St".to_string(),
            location: GeoPoint { lat, lng: 13.4 },
        };
        Delivery::new(
            CreateDeliveryRequest {
                order_id,
                pickup: address(52.50),
                dropoff: address(52.53),
                estimated_minutes: 20,
                distance_km: 3.2,
                delivery_fee: 4.5,
                priority: Default::default(),
                notes: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn offered(mut delivery: Delivery, driver_id: Uuid) -> (AggregateChange, Assignment) {
        let assignment = Assignment::offer(
            delivery.id,
            driver_id,
            AssignmentType::Auto,
            Utc::now(),
            Duration::minutes(5),
        );
        delivery.status = DeliveryStatus::Assigned;
        delivery.driver_id = Some(driver_id);
        (
            AggregateChange::new(delivery).offering(assignment.clone()),
            assignment,
        )
    }

    #[tokio::test]
    async fn second_active_delivery_for_order_is_rejected() {
        let store = MemoryStore::new();
        let order_id = Uuid::new_v4();

        store.insert_delivery(delivery(order_id)).await.unwrap();
        let err = store.insert_delivery(delivery(order_id)).await.unwrap_err();

        assert!(matches!(err, AppError::DuplicateDelivery { .. }));
    }

    #[tokio::test]
    async fn order_can_get_new_delivery_after_terminal_state() {
        let store = MemoryStore::new();
        let order_id = Uuid::new_v4();

        let mut first = store.insert_delivery(delivery(order_id)).await.unwrap();
        first.status = DeliveryStatus::Cancelled;
        store.commit(AggregateChange::new(first)).await.unwrap();

        let second = store.insert_delivery(delivery(order_id)).await.unwrap();
        let active = store.find_active_by_order(order_id).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_and_state_unchanged() {
        let store = MemoryStore::new();
        let original = store.insert_delivery(delivery(Uuid::new_v4())).await.unwrap();

        let mut first = original.clone();
        first.notes = Some("first".to_string());
        let committed = store.commit(AggregateChange::new(first)).await.unwrap();
        assert_eq!(committed.version, 1);

        let mut stale = original.clone();
        stale.notes = Some("stale".to_string());
        let err = store.commit(AggregateChange::new(stale)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let stored = store.get_delivery(original.id).await.unwrap().unwrap();
        assert_eq!(stored.notes.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn only_one_pending_offer_per_delivery() {
        let store = MemoryStore::new();
        let original = store.insert_delivery(delivery(Uuid::new_v4())).await.unwrap();

        let (change, _) = offered(original.clone(), Uuid::new_v4());
        let committed = store.commit(change).await.unwrap();

        let (second, _) = offered(committed, Uuid::new_v4());
        let err = store.commit(second).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let all = store.assignments_for_delivery(original.id).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn resolving_an_expired_offer_reports_expiry() {
        let store = MemoryStore::new();
        let original = store.insert_delivery(delivery(Uuid::new_v4())).await.unwrap();
        let driver_id = Uuid::new_v4();

        let (change, assignment) = offered(original, driver_id);
        let committed = store.commit(change).await.unwrap();

        let expire = AggregateChange::new(committed.clone()).resolving(Some(
            AssignmentResolution::new(assignment.id, AssignmentStatus::Expired),
        ));
        store.commit(expire).await.unwrap();

        let accept = AggregateChange::new(committed).resolving(Some(AssignmentResolution::new(
            assignment.id,
            AssignmentStatus::Accepted,
        )));
        let err = store.commit(accept).await.unwrap_err();
        assert!(matches!(err, AppError::AssignmentExpired { .. }));

        let stored = store.get_assignment(assignment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssignmentStatus::Expired);
        assert!(store.find_pending(stored.delivery_id, driver_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overdue_lists_only_lapsed_pending_offers() {
        let store = MemoryStore::new();
        let original = store.insert_delivery(delivery(Uuid::new_v4())).await.unwrap();

        let (change, assignment) = offered(original, Uuid::new_v4());
        store.commit(change).await.unwrap();

        assert!(store.find_overdue(Utc::now()).await.unwrap().is_empty());
        let later = Utc::now() + Duration::minutes(6);
        let overdue = store.find_overdue(later).await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, assignment.id);
    }
}
