//! Distance-weighted scoring.

use geostack_models::TileCoord;

/// Base radius of influence, in miles, for a proximity point.
pub const PROXIMITY_RADIUS_MILES: f64 = 40.0;

/// Zoom levels at or above this get the minimum radius.
pub const MAX_WEIGHTED_ZOOM: u8 = 14;

/// Distances inside this radius, in miles, are treated as equally close.
pub const FLAT_RADIUS_MILES: f64 = 1.0;

/// Effective radius of influence for an index cut at `zoom`.
///
/// Coarser indexes cover more ground per feature, so their radius grows
/// linearly as zoom drops.
#[must_use]
pub fn weighted_radius(zoom: u8) -> f64 {
    PROXIMITY_RADIUS_MILES * f64::from(15 - zoom.min(MAX_WEIGHTED_ZOOM))
}

/// Folds `score` with its distance (in miles) from the proximity point.
///
/// Ghost features (negative score) are returned unchanged; proximity never
/// lifts them. The result is rounded to four decimal places.
#[must_use]
pub fn score_dist(score: f64, distance_miles: f64, zoom: u8) -> f64 {
    if score < 0.0 {
        return score;
    }
    let distance = distance_miles.max(FLAT_RADIUS_MILES);
    let value = score * weighted_radius(zoom) / distance;
    (value * 10_000.0).round() / 10_000.0
}

/// Tile at `zoom` containing `[lon, lat]`. Latitude is clamped to the web
/// mercator limit.
#[must_use]
pub fn tile_for_point(lon: f64, lat: f64, zoom: u8) -> TileCoord {
    TileCoord::containing([lon, lat], zoom)
}
