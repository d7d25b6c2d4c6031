use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::geo::haversine_km;
use crate::models::driver::{DriverCandidate, DriverStatus, GeoPoint};
use crate::ports::DriverDirectory;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverRecord {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub status: DriverStatus,
    pub rating: f64,
    pub updated_at: DateTime<Utc>,
}

/// Driver availability kept in process, with distances computed on the fly.
#[derive(Default)]
pub struct InMemoryDriverDirectory {
    drivers: DashMap<Uuid, DriverRecord>,
}

impl InMemoryDriverDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: String, location: GeoPoint, rating: f64) -> AppResult<DriverRecord> {
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("name cannot be empty".to_string()));
        }

        let driver = DriverRecord {
            id: Uuid::new_v4(),
            name,
            location,
            status: DriverStatus::Available,
            rating: rating.clamp(0.0, 5.0),
            updated_at: Utc::now(),
        };

        self.drivers.insert(driver.id, driver.clone());
        Ok(driver)
    }

    pub fn get(&self, driver_id: Uuid) -> Option<DriverRecord> {
        self.drivers.get(&driver_id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<DriverRecord> {
        self.drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn update_status(&self, driver_id: Uuid, status: DriverStatus) -> AppResult<DriverRecord> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

        driver.status = status;
        driver.updated_at = Utc::now();

        Ok(driver.clone())
    }

    pub fn update_location(&self, driver_id: Uuid, location: GeoPoint) -> AppResult<DriverRecord> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

        driver.location = location;
        driver.updated_at = Utc::now();

        Ok(driver.clone())
    }
}

#[async_trait]
impl DriverDirectory for InMemoryDriverDirectory {
    async fn find_available(
        &self,
        origin: GeoPoint,
        radius_km: f64,
    ) -> AppResult<Vec<DriverCandidate>> {
        let mut candidates: Vec<DriverCandidate> = self
            .drivers
            .iter()
            .filter(|entry| entry.value().status == DriverStatus::Available)
            .filter_map(|entry| {
                let driver = entry.value();
                let distance_km = haversine_km(&driver.location, &origin);
                (distance_km <= radius_km)
                    .then(|| DriverCandidate::new(driver.id, distance_km, driver.rating))
            })
            .collect();

        candidates.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(candidates)
    }

    async fn set_status(&self, driver_id: Uuid, status: DriverStatus) -> AppResult<()> {
        self.update_status(driver_id, status).map(|_| ())
    }

    async fn is_available(&self, driver_id: Uuid) -> AppResult<bool> {
        let driver = self
            .drivers
            .get(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

        Ok(driver.status == DriverStatus::Available)
    }
}
