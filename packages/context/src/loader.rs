//! Tile fetching with in-flight deduplication.
//!
//! Concurrent lookups that land on the same `(index, z, x, y)` share one
//! fetch and one decode. The first caller for a key installs a shared
//! future in the table; later callers await that same future. The entry
//! is removed once the load settles, successfully or not, or once every
//! waiter has given up on it, so nothing is cached past the in-flight
//! window.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::{
    FutureExt as _,
    future::{BoxFuture, Shared},
};
use geostack_models::{TileBackend, TileCoord};

use crate::{
    ContextError,
    decode::{DecodedTile, decode},
    store::IndexStore,
};

/// Outcome of one tile load, shared by every waiter.
pub type TileResult = Result<Option<Arc<DecodedTile>>, Arc<ContextError>>;

type InFlight = Shared<BoxFuture<'static, TileResult>>;

type Key = (usize, TileCoord);

/// A shared load and the number of callers currently awaiting it.
struct Entry {
    future: InFlight,
    waiters: usize,
}

/// Keyed table of in-flight tile loads.
#[derive(Default)]
pub struct TileLoader {
    in_flight: Mutex<BTreeMap<Key, Entry>>,
    fetches: AtomicUsize,
}

/// Registration of one caller on an in-flight entry.
///
/// Dropping it, whether the load settled or the caller was cancelled,
/// releases the caller's claim on the entry. A settled load is removed
/// outright; an unsettled one is removed with its last waiter.
struct Waiter<'a> {
    loader: &'a TileLoader,
    key: Key,
    future: InFlight,
    settled: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        let mut table = self.loader.table();
        let remove = match table.get_mut(&self.key) {
            Some(entry) if entry.future.ptr_eq(&self.future) => {
                entry.waiters = entry.waiters.saturating_sub(1);
                self.settled || entry.waiters == 0
            }
            _ => false,
        };
        if remove {
            table.remove(&self.key);
            if !self.settled {
                log::trace!("Abandoned in-flight load of {}", self.key.1);
            }
        }
    }
}

impl std::fmt::Debug for TileLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileLoader")
            .field("fetches", &self.fetches.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// What the loader needs to know about the index a tile belongs to.
#[derive(Clone)]
pub struct TileSource {
    /// Position of the index in the hierarchy; part of the dedup key.
    pub position: usize,
    /// Index id, for errors and logs.
    pub index: String,
    /// Payload format.
    pub backend: TileBackend,
    /// Where the tile comes from.
    pub store: Arc<dyn IndexStore>,
}

impl TileLoader {
    /// Creates an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store fetches actually issued.
    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of loads currently in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.table().len()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, BTreeMap<Key, Entry>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads and decodes `tile`, joining an identical load already in
    /// flight if there is one.
    ///
    /// # Errors
    ///
    /// Returns the shared [`ContextError`] if the fetch or decode failed.
    pub async fn load(&self, source: &TileSource, tile: TileCoord) -> TileResult {
        let key = (source.position, tile);

        let mut waiter = {
            let mut table = self.table();
            let future = if let Some(existing) = table.get_mut(&key) {
                log::trace!("Joining in-flight load of {tile} for index {}", source.index);
                existing.waiters += 1;
                existing.future.clone()
            } else {
                self.fetches.fetch_add(1, Ordering::Relaxed);
                let future = fetch(source.clone(), tile).boxed().shared();
                table.insert(
                    key,
                    Entry {
                        future: future.clone(),
                        waiters: 1,
                    },
                );
                future
            };
            drop(table);
            Waiter {
                loader: self,
                key,
                future,
                settled: false,
            }
        };

        let result = waiter.future.clone().await;
        waiter.settled = true;
        drop(waiter);

        result
    }
}

async fn fetch(source: TileSource, tile: TileCoord) -> TileResult {
    let bytes = source.store.get_tile(tile).await.map_err(|source_error| {
        Arc::new(ContextError::Store {
            index: source.index.clone(),
            source: source_error,
        })
    })?;

    let Some(bytes) = bytes else {
        log::trace!("No tile {tile} in index {}", source.index);
        return Ok(None);
    };

    decode(&source.index, source.backend, &bytes)
        .map(|decoded| Some(Arc::new(decoded)))
        .map_err(Arc::new)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use geostack_models::{Feature, TileBackend};

    use super::*;
    use crate::{
        memory::MemoryStore,
        store::{IndexStore, StoreError},
    };

    /// Delays every tile fetch and counts how many reach the inner store.
    struct SlowStore {
        inner: MemoryStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IndexStore for SlowStore {
        async fn get_tile(&self, tile: TileCoord) -> Result<Option<Vec<u8>>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(25)).await;
            self.inner.get_tile(tile).await
        }

        async fn get_feature(&self, id: u64) -> Result<Option<Feature>, StoreError> {
            self.inner.get_feature(id).await
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl IndexStore for BrokenStore {
        async fn get_tile(&self, _tile: TileCoord) -> Result<Option<Vec<u8>>, StoreError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err("disk on fire".into())
        }

        async fn get_feature(&self, _id: u64) -> Result<Option<Feature>, StoreError> {
            Err("disk on fire".into())
        }
    }

    fn slow_source() -> (Arc<SlowStore>, TileSource) {
        let mut inner = MemoryStore::new(TileBackend::Vector, 6);
        inner.insert(Feature::new(1, "Somewhere", 1.0, [0.5, 0.5]));
        let store = Arc::new(SlowStore {
            inner,
            calls: AtomicUsize::new(0),
        });
        let source = TileSource {
            position: 0,
            index: "place".to_string(),
            backend: TileBackend::Vector,
            store: store.clone(),
        };
        (store, source)
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_fetch() {
        let (store, source) = slow_source();
        let loader = TileLoader::new();
        let tile = TileCoord::containing([0.5, 0.5], 6);

        let (a, b, c) = tokio::join!(
            loader.load(&source, tile),
            loader.load(&source, tile),
            loader.load(&source, tile),
        );

        let a = a.unwrap().unwrap();
        let b = b.unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(c.unwrap().is_some());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.fetches(), 1);
        assert_eq!(loader.pending(), 0);
    }

    #[tokio::test]
    async fn settled_loads_are_not_cached() {
        let (store, source) = slow_source();
        let loader = TileLoader::new();
        let tile = TileCoord::containing([0.5, 0.5], 6);

        loader.load(&source, tile).await.unwrap();
        loader.load(&source, tile).await.unwrap();

        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(loader.pending(), 0);
    }

    #[tokio::test]
    async fn different_tiles_fetch_separately() {
        let (store, source) = slow_source();
        let loader = TileLoader::new();

        let (a, b) = tokio::join!(
            loader.load(&source, TileCoord::new(6, 32, 31)),
            loader.load(&source, TileCoord::new(6, 0, 0)),
        );

        assert!(a.unwrap().is_some());
        assert!(b.unwrap().is_none());
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter_and_clears_the_key() {
        let loader = TileLoader::new();
        let source = TileSource {
            position: 2,
            index: "broken".to_string(),
            backend: TileBackend::Vector,
            store: Arc::new(BrokenStore),
        };
        let tile = TileCoord::new(4, 1, 1);

        let (a, b) = tokio::join!(loader.load(&source, tile), loader.load(&source, tile));

        let a = a.unwrap_err();
        let b = b.unwrap_err();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(matches!(a.as_ref(), ContextError::Store { .. }));
        assert_eq!(loader.fetches(), 1);
        assert_eq!(loader.pending(), 0);
    }

    #[tokio::test]
    async fn abandoned_loads_clear_the_key() {
        let (store, source) = slow_source();
        let loader = TileLoader::new();
        let tile = TileCoord::containing([0.5, 0.5], 6);

        let (a, b) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(5), loader.load(&source, tile)),
            tokio::time::timeout(Duration::from_millis(5), loader.load(&source, tile)),
        );
        assert!(a.is_err());
        assert!(b.is_err());
        assert_eq!(loader.pending(), 0);

        assert!(loader.load(&source, tile).await.unwrap().is_some());
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(loader.pending(), 0);
    }

    #[tokio::test]
    async fn one_abandoned_waiter_leaves_the_load_to_the_others() {
        let (store, source) = slow_source();
        let loader = TileLoader::new();
        let tile = TileCoord::containing([0.5, 0.5], 6);

        let (abandoned, kept) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(5), loader.load(&source, tile)),
            async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                loader.load(&source, tile).await
            },
        );
        assert!(abandoned.is_err());
        assert!(kept.unwrap().is_some());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.pending(), 0);
    }
}
