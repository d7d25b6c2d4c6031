//! Storage abstraction for deliveries, offer attempts and performance rows.
//!
//! A delivery and its assignments form one aggregate. Every state change of
//! that aggregate goes through [`DeliveryStore::commit`], which applies the
//! delivery write and the assignment changes as a single atomic unit guarded
//! by the delivery's `version`.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::assignment::{Assignment, AssignmentResolution};
use crate::models::delivery::{Delivery, DeliveryQuery};
use crate::models::performance::DriverPerformance;

pub use memory::MemoryStore;

/// One atomic change to a delivery aggregate.
///
/// `delivery.version` must equal the stored version; the store bumps it on
/// success. `resolve` may only target a `pending` assignment of the same
/// delivery, and `offer` is rejected while another offer for the delivery is
/// still pending.
#[derive(Debug, Clone)]
pub struct AggregateChange {
    pub delivery: Delivery,
    pub resolve: Option<AssignmentResolution>,
    pub offer: Option<Assignment>,
}

impl AggregateChange {
    pub fn new(delivery: Delivery) -> Self {
        Self {
            delivery,
            resolve: None,
            offer: None,
        }
    }

    pub fn resolving(mut self, resolution: Option<AssignmentResolution>) -> Self {
        self.resolve = resolution;
        self
    }

    pub fn offering(mut self, assignment: Assignment) -> Self {
        self.offer = Some(assignment);
        self
    }
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Persists a new delivery; fails with `DuplicateDelivery` when the order
    /// already has an active one.
    async fn insert_delivery(&self, delivery: Delivery) -> AppResult<Delivery>;
    async fn get_delivery(&self, id: Uuid) -> AppResult<Option<Delivery>>;
    async fn find_active_by_order(&self, order_id: Uuid) -> AppResult<Option<Delivery>>;
    async fn search_deliveries(&self, query: &DeliveryQuery) -> AppResult<Vec<Delivery>>;
    /// Deliveries the driver is attached to now or accepted at some point,
    /// including ones later reassigned to someone else.
    async fn deliveries_for_driver(&self, driver_id: Uuid) -> AppResult<Vec<Delivery>>;
    async fn commit(&self, change: AggregateChange) -> AppResult<Delivery>;
}

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn get_assignment(&self, id: Uuid) -> AppResult<Option<Assignment>>;
    async fn find_pending(
        &self,
        delivery_id: Uuid,
        driver_id: Uuid,
    ) -> AppResult<Option<Assignment>>;
    async fn pending_for_delivery(&self, delivery_id: Uuid) -> AppResult<Option<Assignment>>;
    async fn pending_for_driver(&self, driver_id: Uuid) -> AppResult<Vec<Assignment>>;
    async fn assignments_for_delivery(&self, delivery_id: Uuid) -> AppResult<Vec<Assignment>>;
    async fn assignments_for_driver(&self, driver_id: Uuid) -> AppResult<Vec<Assignment>>;
    /// Pending assignments whose expiry lies before `now`.
    async fn find_overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<Assignment>>;
}

#[async_trait]
pub trait PerformanceStore: Send + Sync {
    /// Replaces the driver's row wholesale.
    async fn replace_performance(&self, performance: DriverPerformance) -> AppResult<()>;
    async fn get_performance(&self, driver_id: Uuid) -> AppResult<Option<DriverPerformance>>;
    async fn list_performance(&self) -> AppResult<Vec<DriverPerformance>>;
}

#[derive(Clone)]
pub struct Stores {
    pub deliveries: Arc<dyn DeliveryStore>,
    pub assignments: Arc<dyn AssignmentStore>,
    pub performance: Arc<dyn PerformanceStore>,
}

impl Stores {
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            deliveries: store.clone(),
            assignments: store.clone(),
            performance: store,
        }
    }
}
