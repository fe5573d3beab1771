//! Point queries against decoded tiles.

use std::collections::BTreeSet;

use geo::{Closest, ClosestPoint as _, Point};
use geostack_models::{LngLat, TileCoord, tile, tmp_id};

use crate::decode::{GRID_RESOLUTION, GRID_SIZE, UtfGrid, VectorTile, resolve_code};

/// Features further than this from the query point, in web mercator
/// meters, are not considered to contain it.
pub const QUERY_TOLERANCE: f64 = 1000.0;

/// A feature found at a point.
#[derive(Debug, Clone, PartialEq)]
pub struct TileHit {
    /// Feature id within the index.
    pub id: u64,
    /// Display text.
    pub text: String,
    /// Intrinsic score.
    pub score: f64,
    /// Distance from the query point (0 when inside).
    pub distance: f64,
}

/// Web mercator distance from `query` to the nearest point of `geometry`.
///
/// Returns `None` when no closest point can be determined.
#[must_use]
pub fn distance_to(geometry: &geo::Geometry<f64>, query: LngLat) -> Option<f64> {
    match geometry.closest_point(&Point::new(query[0], query[1])) {
        Closest::Intersection(_) => Some(0.0),
        Closest::SinglePoint(point) => {
            let [ax, ay] = tile::mercator(query);
            let [bx, by] = tile::mercator([point.x(), point.y()]);
            Some((ax - bx).hypot(ay - by))
        }
        Closest::Indeterminate => None,
    }
}

impl VectorTile {
    /// Picks the feature at `query`.
    ///
    /// Priority:
    /// 1. A non-ghost feature the forward query matched (by temporary id).
    /// 2. The closest non-ghost feature, lower id winning ties.
    /// 3. A ghost feature the forward query matched.
    ///
    /// Features beyond [`QUERY_TOLERANCE`] are ignored.
    #[must_use]
    pub fn query(
        &self,
        query: LngLat,
        index_position: usize,
        matched: &BTreeSet<u64>,
    ) -> Option<TileHit> {
        let mut closest: Option<TileHit> = None;
        let mut matched_ghost: Option<TileHit> = None;

        for feature in &self.features {
            let Some(distance) = distance_to(&feature.geometry, query) else {
                continue;
            };
            if distance > QUERY_TOLERANCE {
                continue;
            }

            let hit = || TileHit {
                id: feature.id,
                text: feature.text.clone(),
                score: feature.score,
                distance,
            };
            let is_matched = matched.contains(&tmp_id(index_position, feature.id));

            if feature.score < 0.0 {
                if is_matched && matched_ghost.is_none() {
                    matched_ghost = Some(hit());
                }
                continue;
            }
            if is_matched {
                return Some(hit());
            }

            let closer = closest.as_ref().is_none_or(|best| {
                distance < best.distance || (distance == best.distance && feature.id < best.id)
            });
            if closer {
                closest = Some(hit());
            }
        }

        closest.or(matched_ghost)
    }
}

/// Grid cell containing `query` within `tile`, clamped to the grid.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn grid_cell(query: LngLat, tile: TileCoord) -> (usize, usize) {
    let [px, py] = tile::pixel(query, tile.z);
    let local_x = f64::from(tile.x).mul_add(-tile::TILE_SIZE, px);
    let local_y = f64::from(tile.y).mul_add(-tile::TILE_SIZE, py);
    let max = (GRID_SIZE - 1) as f64;
    let x = (local_x / GRID_RESOLUTION).round().clamp(0.0, max) as usize;
    let y = (local_y / GRID_RESOLUTION).round().clamp(0.0, max) as usize;
    (x, y)
}

impl UtfGrid {
    /// Key referenced by cell `(x, y)`, if any.
    fn key_at(&self, x: usize, y: usize) -> Option<&str> {
        let code = self.grid.get(y)?.chars().nth(x)?;
        let key = self.keys.get(resolve_code(u32::from(code))?)?;
        (!key.is_empty()).then_some(key.as_str())
    }

    /// Finds the first feature referenced by the cell at `query` or, if
    /// that cell is empty, by one of its eight neighbors.
    #[must_use]
    pub fn query(&self, query: LngLat, tile: TileCoord) -> Option<TileHit> {
        let (x, y) = grid_cell(query, tile);
        let neighbors = (y.saturating_sub(1)..=(y + 1).min(GRID_SIZE - 1)).flat_map(|ny| {
            (x.saturating_sub(1)..=(x + 1).min(GRID_SIZE - 1)).map(move |nx| (nx, ny))
        });

        std::iter::once((x, y))
            .chain(neighbors.filter(|cell| *cell != (x, y)))
            .find_map(|(cx, cy)| {
                let key = self.key_at(cx, cy)?;
                let entry = self.data.get(key)?;
                Some(TileHit {
                    id: entry.id,
                    text: entry.text.clone(),
                    score: entry.score,
                    distance: 0.0,
                })
            })
    }
}
