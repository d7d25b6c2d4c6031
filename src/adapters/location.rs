use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::adapters::directory::InMemoryDriverDirectory;
use crate::error::{AppError, AppResult};
use crate::geo::travel_minutes;
use crate::models::delivery::Address;
use crate::ports::{LocationService, TrackingInfo};

const AVERAGE_SPEED_KMH: f64 = 25.0;

#[derive(Debug, Clone)]
struct Route {
    driver_id: Uuid,
    dropoff: Address,
    created_at: DateTime<Utc>,
}

/// Route book that estimates arrival from the driver's last known position.
pub struct InMemoryLocationService {
    directory: Arc<InMemoryDriverDirectory>,
    routes: DashMap<Uuid, Route>,
}

impl InMemoryLocationService {
    pub fn new(directory: Arc<InMemoryDriverDirectory>) -> Self {
        Self {
            directory,
            routes: DashMap::new(),
        }
    }
}

#[async_trait]
impl LocationService for InMemoryLocationService {
    async fn create_route(
        &self,
        delivery_id: Uuid,
        driver_id: Uuid,
        pickup: &Address,
        dropoff: &Address,
    ) -> AppResult<()> {
        info!(
            delivery_id = %delivery_id,
            driver_id = %driver_id,
            pickup = %pickup.line,
            dropoff = %dropoff.line,
            "route created"
        );

        self.routes.insert(
            delivery_id,
            Route {
                driver_id,
                dropoff: dropoff.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_tracking(&self, delivery_id: Uuid) -> AppResult<TrackingInfo> {
        let route = self
            .routes
            .get(&delivery_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("no route for delivery {delivery_id}")))?;

        let driver = self.directory.get(route.driver_id);
        let driver_location = driver.as_ref().map(|driver| driver.location);
        let eta_minutes = driver_location
            .map(|location| travel_minutes(&location, &route.dropoff.location, AVERAGE_SPEED_KMH));
        let updated_at = driver
            .map(|driver| driver.updated_at)
            .unwrap_or(route.created_at);

        Ok(TrackingInfo {
            delivery_id,
            driver_id: Some(route.driver_id),
            driver_location,
            eta_minutes,
            updated_at,
        })
    }
}
