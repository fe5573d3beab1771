//! Static per-index configuration.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::LngLat;

/// The storage format an index serves its tiles in.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TileBackend {
    /// Compressed vector tiles.
    #[default]
    Vector,
    /// Legacy UTFGrid raster payloads.
    Grid,
}

/// The order address components are written in for an index's region.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AddressOrder {
    /// Specific to general, left to right ("Arlington, Virginia, USA").
    Ascending,
    /// General to specific, left to right ("USA, Virginia, Arlington").
    Descending,
}

/// Configuration for one index in the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Unique index identifier.
    pub id: String,
    /// Logical type shared by indexes that hold the same kind of place
    /// (e.g. `"place"`). Defaults to the id.
    #[serde(default, rename = "type")]
    pub index_type: Option<String>,
    /// Zoom level the index's tiles are cut at.
    pub zoom: u8,
    /// `[west, south, east, north]` bounds of the index's data.
    #[serde(default = "default_bounds")]
    pub bounds: [f64; 4],
    /// Whether features in this index carry house numbers.
    #[serde(default)]
    pub address: bool,
    /// Tile format served by the index's store.
    #[serde(default)]
    pub backend: TileBackend,
    /// Highest intrinsic score of any feature in the index. Zero or
    /// missing is treated as 1.
    #[serde(default)]
    pub max_score: f64,
    /// Expected component order for queries matching this index.
    #[serde(default)]
    pub address_order: Option<AddressOrder>,
}

const fn default_bounds() -> [f64; 4] {
    [-180.0, -85.0511, 180.0, 85.0511]
}

impl IndexConfig {
    /// Creates a vector-backed index covering the whole world.
    #[must_use]
    pub fn new(id: impl Into<String>, zoom: u8) -> Self {
        Self {
            id: id.into(),
            index_type: None,
            zoom,
            bounds: default_bounds(),
            address: false,
            backend: TileBackend::Vector,
            max_score: 0.0,
            address_order: None,
        }
    }

    /// Returns the logical type of this index.
    #[must_use]
    pub fn index_type(&self) -> &str {
        self.index_type.as_deref().unwrap_or(&self.id)
    }

    /// Returns `true` if `point` lies within the index bounds (inclusive).
    #[must_use]
    pub fn contains(&self, point: LngLat) -> bool {
        let [west, south, east, north] = self.bounds;
        point[0] >= west && point[0] <= east && point[1] >= south && point[1] <= north
    }

    /// The max score used when deriving the score ceiling.
    #[must_use]
    pub fn effective_max_score(&self) -> f64 {
        if self.max_score > 0.0 {
            self.max_score
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_defaults_to_id() {
        let mut config = IndexConfig::new("place", 12);
        assert_eq!(config.index_type(), "place");
        config.index_type = Some("locality".to_string());
        assert_eq!(config.index_type(), "locality");
    }

    #[test]
    fn bounds_are_inclusive() {
        let mut config = IndexConfig::new("region", 8);
        config.bounds = [0.0, 0.0, 10.0, 10.0];
        assert!(config.contains([0.0, 0.0]));
        assert!(config.contains([10.0, 10.0]));
        assert!(!config.contains([10.1, 5.0]));
    }

    #[test]
    fn zero_max_score_counts_as_one() {
        let config = IndexConfig::new("country", 6);
        assert!((config.effective_max_score() - 1.0).abs() < f64::EPSILON);
    }
}
