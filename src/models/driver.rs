use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Available,
    Busy,
    Offline,
}

/// A driver returned by the directory for a proximity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverCandidate {
    pub driver_id: Uuid,
    pub distance_km: f64,
    pub rating: f64,
}

impl DriverCandidate {
    pub fn new(driver_id: Uuid, distance_km: f64, rating: f64) -> Self {
        Self {
            driver_id,
            distance_km,
            rating,
        }
    }
}
