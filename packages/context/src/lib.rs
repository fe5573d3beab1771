#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Context resolution: which features of each configured index contain a
//! point.
//!
//! For a coordinate, every index whose bounds contain it is queried
//! concurrently. Each lookup fetches the covering tile through the shared
//! [`loader::TileLoader`], decodes it, and picks the feature at the point.
//! The per-index answers are reassembled in configured order, reversed so
//! the most specific index comes first, and collapsed to one feature per
//! index type.

pub mod decode;
pub mod loader;
pub mod lookup;
pub mod memory;
pub mod store;

use std::{collections::BTreeSet, sync::Arc};

use futures::future::try_join_all;
use geostack_models::{ContextFeature, Feature, IndexConfig, LngLat, TileCoord, tmp_id};
use thiserror::Error;

use crate::{
    decode::DecodedTile,
    loader::{TileLoader, TileSource},
    lookup::TileHit,
    store::{IndexStore, StoreError},
};

pub use memory::MemoryStore;

/// Errors from context resolution.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The index's store failed.
    #[error("Store error in index {index}: {source}")]
    Store {
        /// Index id.
        index: String,
        /// Underlying store error.
        source: StoreError,
    },

    /// A tile payload carried neither zlib nor gzip magic bytes.
    #[error("Unknown tile compression in index {index}")]
    UnknownCompression {
        /// Index id.
        index: String,
    },

    /// A tile payload failed to inflate.
    #[error("Failed to decompress tile in index {index}: {source}")]
    Decompress {
        /// Index id.
        index: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A tile payload inflated but could not be parsed.
    #[error("Failed to decode tile in index {index}: {message}")]
    Decode {
        /// Index id.
        index: String,
        /// Description of the decoding failure.
        message: String,
    },

    /// A failure shared by every waiter on the same tile load.
    #[error(transparent)]
    Shared(#[from] Arc<Self>),
}

/// Options for one context resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextOptions {
    /// Only query indexes at hierarchy positions below this one.
    pub max_index: Option<usize>,
    /// Load complete features (and resolve addresses) instead of light
    /// records.
    pub full: bool,
    /// Temporary ids the forward query matched; these win over closer
    /// features in vector tiles.
    pub matched: BTreeSet<u64>,
}

/// One configured index and its store.
#[derive(Clone)]
pub struct IndexHandle {
    /// Static configuration.
    pub config: IndexConfig,
    /// Tile and feature source.
    pub store: Arc<dyn IndexStore>,
}

impl std::fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexHandle")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Resolves context stacks over an ordered list of indexes.
#[derive(Debug)]
pub struct ContextResolver {
    indexes: Vec<IndexHandle>,
    loader: TileLoader,
}

impl ContextResolver {
    /// Creates a resolver over `indexes`, in hierarchy order (most general
    /// first).
    #[must_use]
    pub fn new(indexes: Vec<IndexHandle>) -> Self {
        Self {
            indexes,
            loader: TileLoader::new(),
        }
    }

    /// The configured indexes.
    #[must_use]
    pub fn indexes(&self) -> &[IndexHandle] {
        &self.indexes
    }

    /// The tile loader shared by every resolution.
    #[must_use]
    pub const fn loader(&self) -> &TileLoader {
        &self.loader
    }

    /// Loads one feature from the index at `position`.
    ///
    /// Returns `Ok(None)` if the position is out of range or the store has
    /// no such feature.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Store`] if the store fails.
    pub async fn load_feature(
        &self,
        position: usize,
        id: u64,
    ) -> Result<Option<Feature>, ContextError> {
        let Some(handle) = self.indexes.get(position) else {
            return Ok(None);
        };
        handle
            .store
            .get_feature(id)
            .await
            .map_err(|source| ContextError::Store {
                index: handle.config.id.clone(),
                source,
            })
    }

    /// Builds the context stack at `point`, most specific index first.
    ///
    /// Indexes whose bounds exclude the point are skipped. The stack holds
    /// at most one feature per index type.
    ///
    /// # Errors
    ///
    /// Returns the first [`ContextError`] any index lookup hit; partial
    /// stacks are never returned.
    pub async fn resolve(
        &self,
        point: LngLat,
        options: &ContextOptions,
    ) -> Result<Vec<ContextFeature>, ContextError> {
        let lookups = self
            .indexes
            .iter()
            .enumerate()
            .filter(|(position, handle)| {
                options.max_index.is_none_or(|max| *position < max)
                    && handle.config.contains(point)
            })
            .map(|(position, _)| self.lookup(position, point, options));

        let found = try_join_all(lookups).await?;

        let mut seen = BTreeSet::new();
        let stack = found
            .into_iter()
            .flatten()
            .rev()
            .filter(|feature| seen.insert(feature.index_type.clone()))
            .collect::<Vec<_>>();

        log::debug!(
            "Context at [{}, {}]: {}",
            point[0],
            point[1],
            stack
                .iter()
                .map(|feature| feature.external_id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(stack)
    }

    async fn lookup(
        &self,
        position: usize,
        point: LngLat,
        options: &ContextOptions,
    ) -> Result<Option<ContextFeature>, ContextError> {
        let handle = &self.indexes[position];
        let config = &handle.config;
        let tile = TileCoord::containing(point, config.zoom);
        let source = TileSource {
            position,
            index: config.id.clone(),
            backend: config.backend,
            store: handle.store.clone(),
        };

        let Some(decoded) = self.loader.load(&source, tile).await? else {
            return Ok(None);
        };

        let hit = match decoded.as_ref() {
            DecodedTile::Vector(vector) => vector.query(point, position, &options.matched),
            DecodedTile::Grid(grid) => grid.query(point, tile),
        };
        let Some(hit) = hit else {
            return Ok(None);
        };

        if options.full {
            self.full_record(position, point, hit).await
        } else {
            Ok(light_record(config, position, hit))
        }
    }

    async fn full_record(
        &self,
        position: usize,
        point: LngLat,
        hit: TileHit,
    ) -> Result<Option<ContextFeature>, ContextError> {
        let config = &self.indexes[position].config;
        let Some(feature) = self.load_feature(position, hit.id).await? else {
            log::debug!(
                "Feature {} found in a tile of index {} but not in its store",
                hit.id,
                config.id
            );
            return Ok(None);
        };

        let address = if config.address {
            geostack_address::reverse(&feature, point)
        } else {
            None
        };

        Ok(Some(ContextFeature {
            index_id: config.id.clone(),
            index_position: position,
            index_type: config.index_type().to_string(),
            external_id: format!("{}.{}", config.index_type(), feature.id),
            tmp_id: tmp_id(position, feature.id),
            text: feature.text.clone(),
            score: feature.score,
            query_distance: hit.distance,
            feature: Some(feature),
            address,
        }))
    }
}

fn light_record(config: &IndexConfig, position: usize, hit: TileHit) -> Option<ContextFeature> {
    if hit.text.is_empty() {
        log::trace!(
            "Skipping feature {} of index {}: no text in its tile",
            hit.id,
            config.id
        );
        return None;
    }
    Some(ContextFeature {
        index_id: config.id.clone(),
        index_position: position,
        index_type: config.index_type().to_string(),
        external_id: format!("{}.{}", config.index_type(), hit.id),
        tmp_id: tmp_id(position, hit.id),
        text: hit.text,
        score: hit.score,
        query_distance: hit.distance,
        feature: None,
        address: None,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use geostack_models::{AddressEncoding, ClusterPoint, TileBackend};

    use super::*;

    fn polygon(min: [f64; 2], max: [f64; 2]) -> geojson::Geometry {
        geojson::Geometry::new(geojson::Value::Polygon(vec![vec![
            vec![min[0], min[1]],
            vec![max[0], min[1]],
            vec![max[0], max[1]],
            vec![min[0], max[1]],
            vec![min[0], min[1]],
        ]]))
    }

    fn area(id: u64, text: &str, min: [f64; 2], max: [f64; 2]) -> Feature {
        let center = [(min[0] + max[0]) / 2.0, (min[1] + max[1]) / 2.0];
        let mut feature = Feature::new(id, text, 10.0, center);
        feature.geometry = Some(polygon(min, max));
        feature
    }

    fn handle(config: IndexConfig, store: impl IndexStore + 'static) -> IndexHandle {
        IndexHandle {
            config,
            store: Arc::new(store),
        }
    }

    /// Queried everywhere unless a test needs somewhere else.
    const HERE: [f64; 2] = [0.21, 0.21];

    /// Country, region and place indexes nested around [`HERE`].
    fn stack() -> Vec<IndexHandle> {
        let country = MemoryStore::new(TileBackend::Vector, 4)
            .with(area(1, "Nullland", [0.0, 0.0], [10.0, 10.0]));
        let region = MemoryStore::new(TileBackend::Vector, 8)
            .with(area(2, "Zero Province", [0.0, 0.0], [1.0, 1.0]));
        let place = MemoryStore::new(TileBackend::Grid, 12)
            .with(area(3, "Origin City", [0.15, 0.15], [0.25, 0.25]));

        let mut place_config = IndexConfig::new("place", 12);
        place_config.backend = TileBackend::Grid;
        vec![
            handle(IndexConfig::new("country", 4), country),
            handle(IndexConfig::new("region", 8), region),
            handle(place_config, place),
        ]
    }

    #[tokio::test]
    async fn stack_is_most_specific_first() {
        let resolver = ContextResolver::new(stack());
        let context = resolver
            .resolve(HERE, &ContextOptions::default())
            .await
            .unwrap();
        let ids = context
            .iter()
            .map(|feature| feature.external_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["place.3", "region.2", "country.1"]);
        assert_eq!(context[0].tmp_id, tmp_id(2, 3));
        assert!(context.iter().all(|feature| feature.feature.is_none()));
    }

    #[tokio::test]
    async fn max_index_limits_fan_out() {
        let resolver = ContextResolver::new(stack());
        let options = ContextOptions {
            max_index: Some(2),
            ..ContextOptions::default()
        };
        let context = resolver.resolve(HERE, &options).await.unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].index_id, "region");
    }

    #[tokio::test]
    async fn out_of_bounds_indexes_are_skipped() {
        let mut indexes = stack();
        indexes[1].config.bounds = [50.0, 50.0, 60.0, 60.0];
        let resolver = ContextResolver::new(indexes);
        let context = resolver
            .resolve(HERE, &ContextOptions::default())
            .await
            .unwrap();
        assert_eq!(context.len(), 2);
        assert!(context.iter().all(|feature| feature.index_id != "region"));
    }

    #[tokio::test]
    async fn empty_areas_are_omitted() {
        let resolver = ContextResolver::new(stack());
        let context = resolver
            .resolve([5.0, 5.0], &ContextOptions::default())
            .await
            .unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].text, "Nullland");
    }

    #[tokio::test]
    async fn one_feature_per_type() {
        let mut indexes = stack();
        let mut second_region = IndexConfig::new("region-detail", 10);
        second_region.index_type = Some("region".to_string());
        indexes.insert(
            2,
            handle(
                second_region,
                MemoryStore::new(TileBackend::Vector, 10)
                    .with(area(7, "Zero Subprovince", [0.1, 0.1], [0.3, 0.3])),
            ),
        );
        let resolver = ContextResolver::new(indexes);
        let context = resolver
            .resolve(HERE, &ContextOptions::default())
            .await
            .unwrap();
        let ids = context
            .iter()
            .map(|feature| feature.external_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["place.3", "region.7", "country.1"]);
    }

    #[tokio::test]
    async fn full_load_resolves_addresses() {
        let mut street = area(11, "Main St", [0.205, 0.205], [0.215, 0.215]);
        street.address = AddressEncoding::Cluster {
            points: vec![
                ClusterPoint {
                    number: "1".to_string(),
                    point: [0.206, 0.21],
                },
                ClusterPoint {
                    number: "3".to_string(),
                    point: [0.214, 0.21],
                },
            ],
        };
        let mut config = IndexConfig::new("address", 14);
        config.address = true;

        let mut indexes = stack();
        indexes.push(handle(
            config,
            MemoryStore::new(TileBackend::Vector, 14).with(street),
        ));
        let resolver = ContextResolver::new(indexes);
        let options = ContextOptions {
            full: true,
            ..ContextOptions::default()
        };
        let context = resolver.resolve([0.213, 0.211], &options).await.unwrap();

        assert_eq!(context[0].index_id, "address");
        assert_eq!(context[0].address.as_ref().unwrap().number, "3");
        assert_eq!(context[0].feature.as_ref().unwrap().text, "Main St");
        assert!(context[1].address.is_none());
    }

    struct FailingStore;

    #[async_trait]
    impl IndexStore for FailingStore {
        async fn get_tile(&self, _tile: TileCoord) -> Result<Option<Vec<u8>>, StoreError> {
            Err("tile server unavailable".into())
        }

        async fn get_feature(&self, _id: u64) -> Result<Option<Feature>, StoreError> {
            Err("feature server unavailable".into())
        }
    }

    #[tokio::test]
    async fn any_failure_fails_the_whole_stack() {
        let mut indexes = stack();
        indexes[1].store = Arc::new(FailingStore);
        let resolver = ContextResolver::new(indexes);
        let err = resolver
            .resolve(HERE, &ContextOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("region"));
    }

    /// Answers slower for more general indexes so completion order is the
    /// reverse of configured order.
    struct DelayedStore {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl IndexStore for DelayedStore {
        async fn get_tile(&self, tile: TileCoord) -> Result<Option<Vec<u8>>, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.get_tile(tile).await
        }

        async fn get_feature(&self, id: u64) -> Result<Option<Feature>, StoreError> {
            self.inner.get_feature(id).await
        }
    }

    #[tokio::test]
    async fn order_does_not_depend_on_completion_order() {
        let country = DelayedStore {
            inner: MemoryStore::new(TileBackend::Vector, 4)
                .with(area(1, "Nullland", [0.0, 0.0], [10.0, 10.0])),
            delay: Duration::from_millis(40),
        };
        let region = DelayedStore {
            inner: MemoryStore::new(TileBackend::Vector, 8)
                .with(area(2, "Zero Province", [0.0, 0.0], [1.0, 1.0])),
            delay: Duration::from_millis(1),
        };
        let resolver = ContextResolver::new(vec![
            handle(IndexConfig::new("country", 4), country),
            handle(IndexConfig::new("region", 8), region),
        ]);
        let context = resolver
            .resolve(HERE, &ContextOptions::default())
            .await
            .unwrap();
        assert_eq!(context[0].index_id, "region");
        assert_eq!(context[1].index_id, "country");
    }

    #[tokio::test]
    async fn undecodable_tile_is_an_error() {
        struct Garbage;

        #[async_trait]
        impl IndexStore for Garbage {
            async fn get_tile(&self, _tile: TileCoord) -> Result<Option<Vec<u8>>, StoreError> {
                Ok(Some(b"plain text".to_vec()))
            }

            async fn get_feature(&self, _id: u64) -> Result<Option<Feature>, StoreError> {
                Ok(None)
            }
        }

        let resolver =
            ContextResolver::new(vec![handle(IndexConfig::new("country", 4), Garbage)]);
        let err = resolver
            .resolve([0.0, 0.0], &ContextOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ContextError::Shared(ref inner)
                if matches!(inner.as_ref(), ContextError::UnknownCompression { .. })
        ));
    }

    #[tokio::test]
    async fn failed_fan_out_leaves_no_pending_loads() {
        let country = DelayedStore {
            inner: MemoryStore::new(TileBackend::Vector, 4)
                .with(area(1, "Nullland", [0.0, 0.0], [10.0, 10.0])),
            delay: Duration::from_millis(50),
        };
        let resolver = ContextResolver::new(vec![
            handle(IndexConfig::new("country", 4), country),
            handle(IndexConfig::new("region", 8), FailingStore),
        ]);

        for _ in 0..5 {
            assert!(resolver
                .resolve(HERE, &ContextOptions::default())
                .await
                .is_err());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(resolver.loader().pending(), 0);
        assert_eq!(resolver.loader().fetches(), 10);
    }

    #[tokio::test]
    async fn features_without_text_are_left_out() {
        let mut indexes = stack();
        indexes[1] = handle(
            IndexConfig::new("region", 8),
            MemoryStore::new(TileBackend::Vector, 8).with(area(2, "", [0.0, 0.0], [1.0, 1.0])),
        );
        let resolver = ContextResolver::new(indexes);
        let context = resolver
            .resolve(HERE, &ContextOptions::default())
            .await
            .unwrap();
        let ids = context
            .iter()
            .map(|feature| feature.external_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["place.3", "country.1"]);
    }
}
