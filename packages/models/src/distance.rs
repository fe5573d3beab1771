//! Great-circle and planar distance helpers.

use crate::LngLat;

/// Mean earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometers per statute mile.
pub const KM_PER_MILE: f64 = 1.609_344;

/// Haversine distance between two lng/lat points in kilometers.
#[must_use]
pub fn haversine_km(a: LngLat, b: LngLat) -> f64 {
    let lat1 = a[1].to_radians();
    let lat2 = b[1].to_radians();
    let delta_lat = (b[1] - a[1]).to_radians();
    let delta_lng = (b[0] - a[0]).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Haversine distance between two lng/lat points in miles.
#[must_use]
pub fn haversine_miles(a: LngLat, b: LngLat) -> f64 {
    haversine_km(a, b) / KM_PER_MILE
}

/// Cartesian distance in degrees.
#[must_use]
pub fn planar(a: LngLat, b: LngLat) -> f64 {
    (a[0] - b[0]).hypot(a[1] - b[1])
}
