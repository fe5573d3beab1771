//! The storage collaborator each index is served from.

use async_trait::async_trait;
use geostack_models::{Feature, TileCoord};

/// Error type returned by [`IndexStore`] implementations.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Tile and feature access for one index.
///
/// Implementations may be backed by files, object storage, or memory. A
/// missing tile or feature is `Ok(None)`, not an error.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Returns the raw (compressed) payload of one tile.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the underlying storage fails.
    async fn get_tile(&self, tile: TileCoord) -> Result<Option<Vec<u8>>, StoreError>;

    /// Loads a complete feature by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the underlying storage fails.
    async fn get_feature(&self, id: u64) -> Result<Option<Feature>, StoreError>;
}
