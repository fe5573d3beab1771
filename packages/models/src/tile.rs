//! Spherical-mercator tile arithmetic.

use serde::{Deserialize, Serialize};

use crate::LngLat;

/// Tile edge length in pixels.
pub const TILE_SIZE: f64 = 256.0;

/// Latitude limit of the web mercator projection.
pub const MAX_LATITUDE: f64 = 85.0511;

/// Equatorial radius used by web mercator, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_378_137.0;

/// A `z/x/y` tile address.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TileCoord {
    /// Zoom level.
    pub z: u8,
    /// Column.
    pub x: u32,
    /// Row, counted from the north.
    pub y: u32,
}

impl TileCoord {
    /// Creates a tile address.
    #[must_use]
    pub const fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Returns the tile at zoom `z` containing `point`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn containing(point: LngLat, z: u8) -> Self {
        let [px, py] = pixel(point, z);
        let max = (1_u64 << z) - 1;
        let x = ((px / TILE_SIZE).floor().max(0.0) as u64).min(max);
        let y = ((py / TILE_SIZE).floor().max(0.0) as u64).min(max);
        Self {
            z,
            x: x as u32,
            y: y as u32,
        }
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Global pixel coordinates of `point` at zoom `z`.
///
/// Longitude is clamped to ±180 and latitude to ±[`MAX_LATITUDE`].
#[must_use]
pub fn pixel(point: LngLat, z: u8) -> [f64; 2] {
    let lng = point[0].clamp(-180.0, 180.0);
    let lat = point[1].clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let size = TILE_SIZE * f64::from(1_u32 << z);
    let sin = lat.to_radians().sin();
    let x = (lng + 180.0) / 360.0 * size;
    let y = (0.5 - ((1.0 + sin) / (1.0 - sin)).ln() / (4.0 * std::f64::consts::PI)) * size;
    [x, y]
}

/// Inverse of [`pixel`]: the lng/lat at global pixel coordinates.
#[must_use]
pub fn unproject(pixel: [f64; 2], z: u8) -> LngLat {
    let size = TILE_SIZE * f64::from(1_u32 << z);
    let lng = pixel[0] / size * 360.0 - 180.0;
    let lat = (std::f64::consts::PI * (1.0 - 2.0 * pixel[1] / size))
        .sinh()
        .atan()
        .to_degrees();
    [lng, lat]
}

/// Projects a lng/lat pair into web mercator meters.
#[must_use]
pub fn mercator(point: LngLat) -> [f64; 2] {
    let lng = point[0].clamp(-180.0, 180.0);
    let lat = point[1].clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = EARTH_RADIUS_METERS * lng.to_radians();
    let y = EARTH_RADIUS_METERS
        * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0)
            .tan()
            .ln();
    [x, y]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_tile_at_zoom_one() {
        assert_eq!(TileCoord::containing([0.0, 0.0], 1), TileCoord::new(1, 1, 1));
        assert_eq!(
            TileCoord::containing([-1.0, 1.0], 1),
            TileCoord::new(1, 0, 0)
        );
    }

    #[test]
    fn extreme_points_stay_inside_the_grid() {
        assert_eq!(
            TileCoord::containing([180.0, -90.0], 2),
            TileCoord::new(2, 3, 3)
        );
        assert_eq!(
            TileCoord::containing([-180.0, 90.0], 2),
            TileCoord::new(2, 0, 0)
        );
    }

    #[test]
    fn unproject_inverts_pixel() {
        let point = [-77.0365, 38.8977];
        let [lng, lat] = unproject(pixel(point, 12), 12);
        assert!((lng - point[0]).abs() < 1e-9);
        assert!((lat - point[1]).abs() < 1e-9);
    }

    #[test]
    fn mercator_origin_is_zero() {
        let [x, y] = mercator([0.0, 0.0]);
        assert!(x.abs() < 1e-9);
        assert!(y.abs() < 1e-9);
    }

    #[test]
    fn displays_as_zxy() {
        assert_eq!(TileCoord::new(6, 32, 21).to_string(), "6/32/21");
    }
}
