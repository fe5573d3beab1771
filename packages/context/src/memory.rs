//! An in-memory [`IndexStore`].
//!
//! Features are kept in a map and tiles are encoded on request in the
//! same compressed formats a file- or network-backed store would serve:
//! gzip `GeoJSON` for vector indexes and zlib UTFGrid for grid indexes.

use std::{
    collections::{BTreeMap, BTreeSet},
    io::Write as _,
};

use async_trait::async_trait;
use geo::Contains as _;
use geojson::{FeatureCollection, JsonObject};
use geostack_models::{Feature, LngLat, TileBackend, TileCoord, tile};

use crate::{
    decode::{GRID_RESOLUTION, GRID_SIZE, GridEntry, UtfGrid, encode_code},
    store::{IndexStore, StoreError},
};

/// Features and their tile coverage, held in memory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    backend: TileBackend,
    zoom: u8,
    features: BTreeMap<u64, Feature>,
    tiles: BTreeMap<TileCoord, BTreeSet<u64>>,
}

impl MemoryStore {
    /// Creates an empty store serving `backend` tiles cut at `zoom`.
    #[must_use]
    pub const fn new(backend: TileBackend, zoom: u8) -> Self {
        Self {
            backend,
            zoom,
            features: BTreeMap::new(),
            tiles: BTreeMap::new(),
        }
    }

    /// Adds a feature to every tile it lists, or to the tile containing
    /// its center when it lists none.
    pub fn insert(&mut self, feature: Feature) {
        let tiles = if feature.tiles.is_empty() {
            vec![TileCoord::containing(feature.center, self.zoom)]
        } else {
            feature.tiles.clone()
        };
        for tile in tiles {
            self.tiles.entry(tile).or_default().insert(feature.id);
        }
        self.features.insert(feature.id, feature);
    }

    /// Builder-style [`Self::insert`].
    #[must_use]
    pub fn with(mut self, feature: Feature) -> Self {
        self.insert(feature);
        self
    }

    /// Number of stored features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Returns `true` if no features are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    fn features_in(&self, tile: TileCoord) -> impl Iterator<Item = &Feature> {
        self.tiles
            .get(&tile)
            .into_iter()
            .flatten()
            .filter_map(|id| self.features.get(id))
    }

    /// Encodes `tile` the way this store serves it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if serialization or compression fails.
    pub fn encode_tile(&self, tile: TileCoord) -> Result<Option<Vec<u8>>, StoreError> {
        if !self.tiles.contains_key(&tile) {
            return Ok(None);
        }
        match self.backend {
            TileBackend::Vector => self.encode_vector(tile).map(Some),
            TileBackend::Grid => self.encode_grid(tile).map(Some),
        }
    }

    fn encode_vector(&self, tile: TileCoord) -> Result<Vec<u8>, StoreError> {
        let features = self
            .features_in(tile)
            .map(|feature| {
                let geometry = feature.geometry.clone().unwrap_or_else(|| {
                    geojson::Geometry::new(geojson::Value::Point(feature.center.to_vec()))
                });
                let mut properties = JsonObject::new();
                properties.insert("text".to_string(), feature.text.clone().into());
                properties.insert("score".to_string(), feature.score.into());
                properties.insert("center".to_string(), feature.center.to_vec().into());
                geojson::Feature {
                    bbox: None,
                    geometry: Some(geometry),
                    id: Some(geojson::feature::Id::Number(feature.id.into())),
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();
        let collection = FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        };

        let json = collection.to_string();
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(json.as_bytes())?;
        Ok(encoder.finish()?)
    }

    fn encode_grid(&self, tile: TileCoord) -> Result<Vec<u8>, StoreError> {
        let mut keys = vec![String::new()];
        let mut data = BTreeMap::new();
        let mut cells = vec![vec![0_usize; GRID_SIZE]; GRID_SIZE];

        for feature in self.features_in(tile) {
            let key = feature.id.to_string();
            keys.push(key.clone());
            let code = keys.len() - 1;
            data.insert(
                key,
                GridEntry {
                    id: feature.id,
                    text: feature.text.clone(),
                    score: feature.score,
                },
            );
            paint(&mut cells, feature, tile, code);
        }

        let grid = cells
            .iter()
            .map(|row| {
                row.iter()
                    .map(|code| encode_code(*code).ok_or("grid key out of range"))
                    .collect::<Result<String, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let json = serde_json::to_vec(&UtfGrid { grid, keys, data })?;
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }
}

/// Lng/lat at the center of grid cell `(x, y)` of `tile`.
#[allow(clippy::cast_precision_loss)]
fn cell_center(tile: TileCoord, x: usize, y: usize) -> LngLat {
    let px = f64::from(tile.x).mul_add(tile::TILE_SIZE, (x as f64 + 0.5) * GRID_RESOLUTION);
    let py = f64::from(tile.y).mul_add(tile::TILE_SIZE, (y as f64 + 0.5) * GRID_RESOLUTION);
    tile::unproject([px, py], tile.z)
}

/// Marks the cells a feature covers: every cell whose center lies inside
/// its polygon geometry, or just the cell under its center point.
fn paint(cells: &mut [Vec<usize>], feature: &Feature, tile: TileCoord, code: usize) {
    let area = feature
        .geometry
        .clone()
        .and_then(|geometry| geo::Geometry::<f64>::try_from(geometry).ok())
        .filter(|geometry| {
            matches!(
                geometry,
                geo::Geometry::Polygon(_) | geo::Geometry::MultiPolygon(_)
            )
        });

    if let Some(area) = area {
        for (y, row) in cells.iter_mut().enumerate() {
            for (x, cell) in row.iter_mut().enumerate() {
                let [lng, lat] = cell_center(tile, x, y);
                if area.contains(&geo::Point::new(lng, lat)) {
                    *cell = code;
                }
            }
        }
    } else if TileCoord::containing(feature.center, tile.z) == tile {
        let (x, y) = crate::lookup::grid_cell(feature.center, tile);
        cells[y][x] = code;
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn get_tile(&self, tile: TileCoord) -> Result<Option<Vec<u8>>, StoreError> {
        if tile.z != self.zoom {
            return Ok(None);
        }
        self.encode_tile(tile)
    }

    async fn get_feature(&self, id: u64) -> Result<Option<Feature>, StoreError> {
        Ok(self.features.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::decode::{DecodedTile, decode};

    fn square(min: f64, max: f64) -> geojson::Geometry {
        geojson::Geometry::new(geojson::Value::Polygon(vec![vec![
            vec![min, min],
            vec![max, min],
            vec![max, max],
            vec![min, max],
            vec![min, min],
        ]]))
    }

    #[tokio::test]
    async fn vector_tile_round_trips_through_decoder() {
        let mut feature = Feature::new(5, "Square", 2.0, [0.5, 0.5]);
        feature.geometry = Some(square(0.0, 1.0));
        let store = MemoryStore::new(TileBackend::Vector, 6).with(feature);

        let tile = TileCoord::containing([0.5, 0.5], 6);
        let bytes = store.get_tile(tile).await.unwrap().unwrap();
        let DecodedTile::Vector(decoded) = decode("x", TileBackend::Vector, &bytes).unwrap() else {
            panic!("expected vector tile");
        };
        let hit = decoded.query([0.25, 0.75], 0, &BTreeSet::new()).unwrap();
        assert_eq!(hit.id, 5);
        assert!(hit.distance.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn grid_tile_paints_polygons() {
        let mut feature = Feature::new(9, "Big", 1.0, [10.0, 10.0]);
        feature.geometry = Some(square(-170.0, 80.0));
        let store = MemoryStore::new(TileBackend::Grid, 1).with(feature);

        let tile = TileCoord::containing([10.0, 10.0], 1);
        let bytes = store.get_tile(tile).await.unwrap().unwrap();
        let DecodedTile::Grid(grid) = decode("x", TileBackend::Grid, &bytes).unwrap() else {
            panic!("expected grid tile");
        };
        assert_eq!(grid.query([10.0, 10.0], tile).unwrap().id, 9);
        assert_eq!(grid.query([60.0, 40.0], tile).unwrap().text, "Big");
    }

    #[tokio::test]
    async fn missing_tiles_and_features() {
        let store = MemoryStore::new(TileBackend::Vector, 6).with(Feature::new(1, "A", 1.0, [0.5, 0.5]));
        assert!(store.get_tile(TileCoord::new(6, 0, 0)).await.unwrap().is_none());
        assert!(store.get_tile(TileCoord::new(5, 16, 15)).await.unwrap().is_none());
        assert!(store.get_feature(2).await.unwrap().is_none());
        assert_eq!(store.get_feature(1).await.unwrap().unwrap().text, "A");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn listed_tiles_override_center() {
        let mut feature = Feature::new(1, "Wide", 1.0, [0.5, 0.5]);
        feature.tiles = vec![TileCoord::new(6, 1, 1), TileCoord::new(6, 2, 2)];
        let store = MemoryStore::new(TileBackend::Vector, 6).with(feature);
        assert!(store.encode_tile(TileCoord::new(6, 1, 1)).unwrap().is_some());
        assert!(store.encode_tile(TileCoord::new(6, 2, 2)).unwrap().is_some());
        assert!(
            store
                .encode_tile(TileCoord::containing([0.5, 0.5], 6))
                .unwrap()
                .is_none()
        );
    }
}
