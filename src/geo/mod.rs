use crate::models::driver::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

fn hav(angle: f64) -> f64 {
    let half = (angle / 2.0).sin();
    half * half
}

/// Great-circle distance between two points.
pub fn haversine_km(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let (from_lat, to_lat) = (from.lat.to_radians(), to.lat.to_radians());
    let h = hav(to_lat - from_lat)
        + from_lat.cos() * to_lat.cos() * hav((to.lng - from.lng).to_radians());

    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Straight-line travel time at a constant speed.
pub fn travel_minutes(from: &GeoPoint, to: &GeoPoint, speed_kmh: f64) -> f64 {
    if speed_kmh <= 0.0 {
        return f64::INFINITY;
    }
    haversine_km(from, to) / speed_kmh * 60.0
}
