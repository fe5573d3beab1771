//! Geocoder configuration, loaded from TOML.
//!
//! ```toml
//! verify_limit = 10
//!
//! [[index]]
//! id = "country"
//! zoom = 6
//! max_score = 100
//!
//! [[index]]
//! id = "address"
//! zoom = 14
//! address = true
//! address_order = "ascending"
//! ```
//!
//! Indexes are listed in hierarchy order, most general first.

use std::{collections::BTreeSet, path::Path};

use geostack_models::{IndexConfig, query::DEFAULT_VERIFY_LIMIT, tile::MAX_LATITUDE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest zoom an index may be cut at.
pub const MAX_ZOOM: u8 = 22;

/// Errors from loading or validating a [`GeocoderConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config text is not valid TOML for this schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config parsed but describes an unusable index stack.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Static configuration for one [`crate::Geocoder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocoderConfig {
    /// Verified features that get a context stack loaded per query.
    #[serde(default = "default_verify_limit")]
    pub verify_limit: usize,
    /// Candidate features loaded concurrently.
    #[serde(default = "default_load_concurrency")]
    pub load_concurrency: usize,
    /// Index stack, most general first.
    #[serde(default, rename = "index")]
    pub indexes: Vec<IndexConfig>,
}

const fn default_verify_limit() -> usize {
    DEFAULT_VERIFY_LIMIT
}

const fn default_load_concurrency() -> usize {
    10
}

impl GeocoderConfig {
    /// Creates a config over `indexes` with default limits.
    #[must_use]
    pub const fn new(indexes: Vec<IndexConfig>) -> Self {
        Self {
            verify_limit: default_verify_limit(),
            load_concurrency: default_load_concurrency(),
            indexes,
        }
    }

    /// Parses and validates a TOML config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or
    /// validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        log::info!(
            "Loaded geocoder config from {} with {} indexes",
            path.display(),
            config.indexes.len()
        );
        Ok(config)
    }

    /// Checks the index stack is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.indexes.is_empty() {
            return Err(ConfigError::Invalid("at least one index is required".to_string()));
        }
        if self.verify_limit == 0 {
            return Err(ConfigError::Invalid("verify_limit must be at least 1".to_string()));
        }
        if self.load_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "load_concurrency must be at least 1".to_string(),
            ));
        }

        let mut ids = BTreeSet::new();
        for index in &self.indexes {
            if !ids.insert(index.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate index id {}", index.id)));
            }
            if index.zoom > MAX_ZOOM {
                return Err(ConfigError::Invalid(format!(
                    "index {} has zoom {} above {MAX_ZOOM}",
                    index.id, index.zoom
                )));
            }
            let [west, south, east, north] = index.bounds;
            let well_formed = index.bounds.iter().all(|value| value.is_finite())
                && (-180.0..=180.0).contains(&west)
                && (-180.0..=180.0).contains(&east)
                && (-MAX_LATITUDE..=MAX_LATITUDE).contains(&south)
                && (-MAX_LATITUDE..=MAX_LATITUDE).contains(&north)
                && west <= east
                && south <= north;
            if !well_formed {
                return Err(ConfigError::Invalid(format!(
                    "index {} has malformed bounds {:?}",
                    index.id, index.bounds
                )));
            }
        }
        Ok(())
    }

    /// Hierarchy positions of the indexes sharing `index_type`, in order.
    pub fn positions_of<'a>(&'a self, index_type: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.indexes
            .iter()
            .enumerate()
            .filter(move |(_, index)| index.index_type() == index_type)
            .map(|(position, _)| position)
    }

    /// Every configured index type.
    #[must_use]
    pub fn types(&self) -> BTreeSet<&str> {
        self.indexes.iter().map(IndexConfig::index_type).collect()
    }
}
