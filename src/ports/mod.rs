//! Outbound ports the dispatch engine calls through.
//!
//! Implementations report failures as `AppError::DependencyFailure`; the task
//! worker retries those with backoff.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::delivery::{Address, Delivery, DeliveryStatus, OrderStatus};
use crate::models::driver::{DriverCandidate, DriverStatus, GeoPoint};

#[async_trait]
pub trait DriverDirectory: Send + Sync {
    async fn find_available(
        &self,
        origin: GeoPoint,
        radius_km: f64,
    ) -> AppResult<Vec<DriverCandidate>>;
    async fn set_status(&self, driver_id: Uuid, status: DriverStatus) -> AppResult<()>;
    async fn is_available(&self, driver_id: Uuid) -> AppResult<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingInfo {
    pub delivery_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub driver_location: Option<GeoPoint>,
    pub eta_minutes: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait LocationService: Send + Sync {
    async fn create_route(
        &self,
        delivery_id: Uuid,
        driver_id: Uuid,
        pickup: &Address,
        dropoff: &Address,
    ) -> AppResult<()>;
    async fn get_tracking(&self, delivery_id: Uuid) -> AppResult<TrackingInfo>;
}

#[async_trait]
pub trait OrderStatusSync: Send + Sync {
    async fn update_status(&self, order_id: Uuid, status: OrderStatus) -> AppResult<()>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_assignment_offer(&self, driver_id: Uuid, delivery: &Delivery) -> AppResult<()>;
    async fn send_status_update(&self, order_id: Uuid, status: DeliveryStatus) -> AppResult<()>;
    async fn send_driver_message(&self, driver_id: Uuid, text: &str) -> AppResult<()>;
}

#[async_trait]
pub trait PayoutTrigger: Send + Sync {
    async fn request_payout(&self, delivery_id: Uuid) -> AppResult<()>;
}

#[derive(Clone)]
pub struct Ports {
    pub directory: Arc<dyn DriverDirectory>,
    pub location: Arc<dyn LocationService>,
    pub orders: Arc<dyn OrderStatusSync>,
    pub notifications: Arc<dyn NotificationSink>,
    pub payouts: Arc<dyn PayoutTrigger>,
}
