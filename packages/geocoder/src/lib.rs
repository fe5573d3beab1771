#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Result verification and ranking for the geostack geocoder.
//!
//! A [`Geocoder`] owns one configured index stack. Forward queries hand it
//! the coverage bundles produced by the upstream text/spatial matcher;
//! it loads each candidate feature, resolves house numbers, filters out
//! tile collisions, attaches a context stack, computes the final
//! relevance and returns the results in ranked order. Results from
//! independently queried shards are merged with [`combine_results`].
//!
//! Scores from different indexes are brought onto one scale by a
//! [`ScoreCeiling`] computed lazily once per geocoder.

pub mod config;
pub mod rank;
pub mod verify;

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, OnceLock},
};

use geostack_context::{
    ContextError, ContextOptions, ContextResolver, IndexHandle, store::IndexStore,
};
use geostack_models::{
    AddressToken, ContextFeature, IndexConfig, LngLat, QueryOptions, RankedResult,
    query::MAX_QUERY_TOKENS,
};
use geostack_scoring::{ScoreCeiling, haversine_miles};
use thiserror::Error;

pub use config::{ConfigError, GeocoderConfig};
pub use rank::{combine_results, compare_results, sort_results};

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// The caller's query options were rejected before any I/O.
    #[error("Invalid query: {0}")]
    Validation(String),

    /// The geocoder configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A configured index has no store.
    #[error("No store registered for index {0}")]
    MissingStore(String),

    /// Loading a feature or resolving context failed.
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// A configured geocoder over one index stack.
#[derive(Debug)]
pub struct Geocoder {
    config: GeocoderConfig,
    resolver: ContextResolver,
    ceiling: OnceLock<ScoreCeiling>,
}

impl Geocoder {
    /// Creates a geocoder, pairing every configured index with the store
    /// registered under its id.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Config`] if the config fails validation or
    /// [`GeocodeError::MissingStore`] if an index has no store.
    pub fn new(
        config: GeocoderConfig,
        mut stores: BTreeMap<String, Arc<dyn IndexStore>>,
    ) -> Result<Self, GeocodeError> {
        config.validate()?;

        let handles = config
            .indexes
            .iter()
            .map(|index| {
                let store = stores
                    .remove(&index.id)
                    .ok_or_else(|| GeocodeError::MissingStore(index.id.clone()))?;
                Ok(IndexHandle {
                    config: index.clone(),
                    store,
                })
            })
            .collect::<Result<Vec<_>, GeocodeError>>()?;

        if !stores.is_empty() {
            log::warn!(
                "Ignoring stores for unconfigured indexes: {}",
                stores.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }

        log::debug!("Geocoder ready with {} indexes", handles.len());
        Ok(Self {
            config,
            resolver: ContextResolver::new(handles),
            ceiling: OnceLock::new(),
        })
    }

    /// The configuration this geocoder was built from.
    #[must_use]
    pub const fn config(&self) -> &GeocoderConfig {
        &self.config
    }

    /// The context resolver shared by every query.
    #[must_use]
    pub const fn resolver(&self) -> &ContextResolver {
        &self.resolver
    }

    /// The score ceiling for this index stack, computed on first use and
    /// fixed for the life of the geocoder.
    pub fn score_ceiling(&self) -> ScoreCeiling {
        *self.ceiling.get_or_init(|| {
            let maxes = self
                .config
                .indexes
                .iter()
                .map(IndexConfig::effective_max_score)
                .collect::<Vec<_>>();
            ScoreCeiling::from_index_maxes(&maxes)
        })
    }

    /// Forgets the cached score ceiling so the next query recomputes it.
    pub fn reset_score_ceiling(&mut self) {
        self.ceiling = OnceLock::new();
    }

    /// Builds the context stack at `point`, most specific first.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Context`] if any index lookup fails.
    pub async fn context(
        &self,
        point: LngLat,
        options: &ContextOptions,
    ) -> Result<Vec<ContextFeature>, GeocodeError> {
        validate_point(point, "point")?;
        Ok(self.resolver.resolve(point, options).await?)
    }

    /// Describes the most specific feature at `point` that passes the
    /// type filter, with its full context.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Validation`] for bad options and
    /// [`GeocodeError::Context`] if any index lookup fails.
    pub async fn reverse(
        &self,
        point: LngLat,
        options: &QueryOptions,
    ) -> Result<Option<RankedResult>, GeocodeError> {
        validate_point(point, "point")?;
        self.validate(options)?;

        let context = self
            .resolver
            .resolve(
                point,
                &ContextOptions {
                    max_index: None,
                    full: true,
                    matched: BTreeSet::new(),
                },
            )
            .await?;

        let Some(start) = context
            .iter()
            .position(|entry| options.allows_type(&entry.index_type))
        else {
            log::debug!("Nothing at [{}, {}] passes the type filter", point[0], point[1]);
            return Ok(None);
        };
        let stack = context[start..].to_vec();
        let head = &stack[0];
        let Some(feature) = head.feature.clone() else {
            return Ok(None);
        };

        let index = &self.config.indexes[head.index_position];
        let score = self
            .score_ceiling()
            .normalize(feature.score, index.effective_max_score());
        let mut result = RankedResult {
            feature,
            index_id: head.index_id.clone(),
            index_type: head.index_type.clone(),
            index_position: head.index_position,
            address: head.address.clone(),
            context: Vec::new(),
            relevance: 1.0,
            score_dist: score,
            distance: None,
            debug: None,
        };
        result.distance = options
            .proximity
            .map(|proximity| haversine_miles(proximity, result.center()));
        result.context = stack;
        Ok(Some(result))
    }

    /// Rejects malformed query options.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Validation`] describing the first problem.
    pub fn validate(&self, options: &QueryOptions) -> Result<(), GeocodeError> {
        if let Some(proximity) = options.proximity {
            validate_point(proximity, "proximity")?;
        }

        if let Some(types) = &options.types {
            if types.is_empty() {
                return Err(GeocodeError::Validation(
                    "types must name at least one type".to_string(),
                ));
            }
            let known = self.config.types();
            if let Some(unknown) = types.iter().find(|t| !known.contains(t.as_str())) {
                return Err(GeocodeError::Validation(format!("unknown type {unknown}")));
            }
        }

        if let Some(bbox) = options.bbox {
            let [west, south, east, north] = bbox;
            if !bbox.iter().all(|value| value.is_finite()) || west > east || south > north {
                return Err(GeocodeError::Validation(format!(
                    "bbox {bbox:?} must be [west, south, east, north]"
                )));
            }
        }

        if options.limit == 0 {
            return Err(GeocodeError::Validation("limit must be at least 1".to_string()));
        }
        if options.verify_limit == Some(0) {
            return Err(GeocodeError::Validation(
                "verify_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_token(token: &AddressToken) -> Result<(), GeocodeError> {
    if token.mask().is_none() {
        return Err(GeocodeError::Validation(format!(
            "address token position {} is beyond the {MAX_QUERY_TOKENS} query terms a mask can hold",
            token.position
        )));
    }
    if token.position >= token.token_count {
        return Err(GeocodeError::Validation(format!(
            "address token position {} is outside a query of {} tokens",
            token.position, token.token_count
        )));
    }
    Ok(())
}

fn validate_point(point: LngLat, name: &str) -> Result<(), GeocodeError> {
    let [lng, lat] = point;
    let valid = lng.is_finite()
        && lat.is_finite()
        && (-180.0..=180.0).contains(&lng)
        && (-90.0..=90.0).contains(&lat);
    if valid {
        Ok(())
    } else {
        Err(GeocodeError::Validation(format!(
            "{name} [{lng}, {lat}] is not a valid longitude/latitude"
        )))
    }
}
