#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for the geostack result resolution and ranking pipeline.
//!
//! This crate contains only data types, index configuration structs, and
//! tile arithmetic. It has no I/O and no async runtime; everything here is
//! either produced by a storage collaborator (features, coverage bundles)
//! or by one query's execution (resolved addresses, context stacks,
//! ranked results).

pub mod config;
pub mod distance;
pub mod query;
pub mod tile;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use config::{AddressOrder, IndexConfig, TileBackend};
pub use query::{AddressToken, Cover, CoverageBundle, QueryOptions};
pub use tile::TileCoord;

/// A `[longitude, latitude]` pair in WGS84 degrees.
pub type LngLat = [f64; 2];

/// Number of bits reserved for the per-index feature id in a temporary id.
pub const TMP_ID_SHIFT: u32 = 25;

/// Builds the temporary id used to correlate features across indexes
/// within a single query.
///
/// The index position occupies the high bits and the feature id is
/// folded into the low [`TMP_ID_SHIFT`] bits, so two indexes can never
/// collide but two features of the same index can.
#[must_use]
pub const fn tmp_id(index_position: usize, feature_id: u64) -> u64 {
    ((index_position as u64) << TMP_ID_SHIFT) + (feature_id % (1 << TMP_ID_SHIFT))
}

/// House number parity attached to one side of an address range.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum Parity {
    /// No parity recorded; any number is accepted.
    #[default]
    #[serde(rename = "")]
    #[strum(serialize = "")]
    Unspecified,
    /// Even numbers only.
    #[serde(rename = "E")]
    #[strum(serialize = "E")]
    Even,
    /// Odd numbers only.
    #[serde(rename = "O")]
    #[strum(serialize = "O")]
    Odd,
    /// Both parities are present on this side.
    #[serde(rename = "B")]
    #[strum(serialize = "B")]
    Both,
}

impl Parity {
    /// Returns `true` if a house number of this parity may sit on a side
    /// annotated with `self`.
    #[must_use]
    pub const fn accepts(self, number: u64) -> bool {
        match self {
            Self::Unspecified | Self::Both => true,
            Self::Even => number % 2 == 0,
            Self::Odd => number % 2 == 1,
        }
    }
}

/// One side of an interpolated address range.
///
/// The bounds are kept as the raw strings from the source data (e.g.
/// `"G-100"`); digits are extracted at lookup time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSide {
    /// House number at the start of the line.
    #[serde(default)]
    pub from: String,
    /// House number at the end of the line.
    #[serde(default)]
    pub to: String,
    /// Parity of the numbers on this side.
    #[serde(default)]
    pub parity: Parity,
}

/// A line segment annotated with left- and right-side house number ranges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeSegment {
    /// Polyline vertices, in the direction the ranges are declared.
    pub line: Vec<LngLat>,
    /// Left side of the street (the low side).
    #[serde(default)]
    pub left: RangeSide,
    /// Right side of the street (the high side).
    #[serde(default)]
    pub right: RangeSide,
}

/// One exact address point inside an address cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterPoint {
    /// House number as it appears in the source data.
    pub number: String,
    /// Location of the address.
    pub point: LngLat,
}

/// How (if at all) a feature encodes house numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AddressEncoding {
    /// No address semantics.
    #[default]
    None,
    /// Exact number-to-point pairs (e.g. parcels).
    Cluster {
        /// The address points. Numbers may repeat.
        points: Vec<ClusterPoint>,
    },
    /// Interpolated ranges on line segments (e.g. TIGER street segments).
    Range {
        /// The annotated segments.
        segments: Vec<RangeSegment>,
    },
    /// A street that carries both exact points and interpolated ranges.
    Combined {
        /// The address points.
        points: Vec<ClusterPoint>,
        /// The annotated segments.
        segments: Vec<RangeSegment>,
    },
}

impl AddressEncoding {
    /// Returns `true` for any encoding other than [`Self::None`].
    #[must_use]
    pub const fn is_address(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Exact address points, empty for non-cluster encodings.
    #[must_use]
    pub fn points(&self) -> &[ClusterPoint] {
        match self {
            Self::Cluster { points } | Self::Combined { points, .. } => points,
            Self::None | Self::Range { .. } => &[],
        }
    }

    /// Range segments, empty for non-range encodings.
    #[must_use]
    pub fn segments(&self) -> &[RangeSegment] {
        match self {
            Self::Range { segments } | Self::Combined { segments, .. } => segments,
            Self::None | Self::Cluster { .. } => &[],
        }
    }
}

/// A denormalized geographic record loaded from an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Stable id within its index.
    pub id: u64,
    /// Display text.
    pub text: String,
    /// Intrinsic score. Negative marks a ghost feature.
    #[serde(default)]
    pub score: f64,
    /// Representative point, known to lie within the feature.
    pub center: LngLat,
    /// Optional `[west, south, east, north]` bounds.
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
    /// Optional full geometry.
    #[serde(default)]
    pub geometry: Option<geojson::Geometry>,
    /// Tiles this feature was indexed into, at its index's zoom. Empty
    /// means only the tile containing `center`.
    #[serde(default)]
    pub tiles: Vec<TileCoord>,
    /// Address encoding.
    #[serde(default)]
    pub address: AddressEncoding,
}

impl Feature {
    /// Creates a plain (non-address) feature at `center`.
    #[must_use]
    pub fn new(id: u64, text: impl Into<String>, score: f64, center: LngLat) -> Self {
        Self {
            id,
            text: text.into(),
            score,
            center,
            bbox: None,
            geometry: None,
            tiles: Vec::new(),
            address: AddressEncoding::None,
        }
    }

    /// Ghost features carry a negative score and only ever fill context.
    #[must_use]
    pub fn is_ghost(&self) -> bool {
        self.score < 0.0
    }

    /// Returns `true` if this feature was indexed into `tile`.
    #[must_use]
    pub fn covers_tile(&self, tile: TileCoord) -> bool {
        if self.tiles.is_empty() {
            TileCoord::containing(self.center, tile.z) == tile
        } else {
            self.tiles.contains(&tile)
        }
    }
}

/// A point produced by the address locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAddress {
    /// Location of the address.
    pub point: LngLat,
    /// `true` when the point was interpolated along a range.
    pub interpolated: bool,
    /// `true` when the point is approximate: the number only matched a
    /// range of the wrong parity, or fell outside every known range or
    /// cluster and a nearby point was substituted.
    pub omitted: bool,
    /// The house number this point stands for.
    pub number: String,
}

/// One containing feature in a context stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFeature {
    /// Id of the index the feature came from.
    pub index_id: String,
    /// Position of that index in the configured hierarchy.
    pub index_position: usize,
    /// Logical type of that index (e.g. `"place"`).
    pub index_type: String,
    /// `"<type>.<feature id>"`.
    pub external_id: String,
    /// Query-scoped temporary id, see [`tmp_id`].
    pub tmp_id: u64,
    /// Display text.
    pub text: String,
    /// Intrinsic score.
    pub score: f64,
    /// Distance from the query point in tile-native units (0 for
    /// features that were not located through a tile query).
    pub query_distance: f64,
    /// The complete feature, present for full loads.
    pub feature: Option<Feature>,
    /// Address resolved at the query point for full loads of address
    /// features.
    pub address: Option<ResolvedAddress>,
}

/// Debug information attached to a ranked result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDebug {
    /// The coverage bundle that produced this result.
    pub bundle: CoverageBundle,
    /// Index of the result in the ordering before context verification.
    pub position: usize,
}

/// A final, ordered geocoding result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    /// The matched feature.
    pub feature: Feature,
    /// Id of the index the feature came from.
    pub index_id: String,
    /// Logical type of that index.
    pub index_type: String,
    /// Position of that index in the configured hierarchy.
    pub index_position: usize,
    /// Address resolved for this feature, if the query carried a number.
    pub address: Option<ResolvedAddress>,
    /// Containment stack, most specific first. The first entry is the
    /// result feature itself.
    pub context: Vec<ContextFeature>,
    /// Combined textual relevance in `[0, 1]`.
    pub relevance: f64,
    /// Score folded with proximity decay.
    pub score_dist: f64,
    /// Great-circle distance in miles from the proximity point.
    pub distance: Option<f64>,
    /// Present when the query ran in debug mode.
    pub debug: Option<ResultDebug>,
}

impl RankedResult {
    /// The feature's effective center: the resolved address point when
    /// there is one, the feature center otherwise.
    #[must_use]
    pub fn center(&self) -> LngLat {
        self.address
            .as_ref()
            .map_or(self.feature.center, |address| address.point)
    }

    /// Identity used to deduplicate results across shards.
    #[must_use]
    pub fn identity(&self) -> (String, u64, Option<String>, [u64; 2]) {
        let center = self.center();
        (
            self.index_id.clone(),
            self.feature.id,
            self.address.as_ref().map(|a| a.number.clone()),
            [center[0].to_bits(), center[1].to_bits()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tmp_id_separates_indexes() {
        assert_eq!(tmp_id(0, 7), 7);
        assert_eq!(tmp_id(1, 7), (1 << 25) + 7);
        assert_eq!(tmp_id(2, (1 << 25) + 3), (2 << 25) + 3);
    }

    #[test]
    fn parity_masks() {
        assert!(Parity::Even.accepts(10));
        assert!(!Parity::Even.accepts(9));
        assert!(Parity::Odd.accepts(9));
        assert!(!Parity::Odd.accepts(10));
        assert!(Parity::Both.accepts(9));
        assert!(Parity::Unspecified.accepts(10));
    }

    #[test]
    fn parity_parses_source_tags() {
        assert_eq!("E".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!("O".parse::<Parity>().unwrap(), Parity::Odd);
        assert_eq!("".parse::<Parity>().unwrap(), Parity::Unspecified);
        assert!("X".parse::<Parity>().is_err());
    }

    #[test]
    fn address_encoding_deserializes_from_tagged_json() {
        let json = r#"{
            "type": "range",
            "segments": [{
                "line": [[0.0, 0.0], [0.0, 100.0]],
                "left": { "from": "0", "to": "100", "parity": "E" }
            }]
        }"#;
        let encoding: AddressEncoding = serde_json::from_str(json).unwrap();
        let AddressEncoding::Range { segments } = encoding else {
            panic!("expected range encoding");
        };
        assert_eq!(segments[0].left.parity, Parity::Even);
        assert_eq!(segments[0].right, RangeSide::default());
    }

    #[test]
    fn feature_covers_center_tile_when_no_tiles_listed() {
        let feature = Feature::new(1, "Somewhere", 10.0, [0.5, 0.5]);
        assert!(feature.covers_tile(TileCoord::containing([0.5, 0.5], 6)));
        assert!(!feature.covers_tile(TileCoord::new(6, 0, 0)));
    }

    #[test]
    fn result_center_prefers_resolved_address() {
        let result = RankedResult {
            feature: Feature::new(1, "Main St", 1.0, [1.0, 1.0]),
            index_id: "address".to_string(),
            index_type: "address".to_string(),
            index_position: 3,
            address: Some(ResolvedAddress {
                point: [2.0, 2.0],
                interpolated: true,
                omitted: false,
                number: "25".to_string(),
            }),
            context: Vec::new(),
            relevance: 1.0,
            score_dist: 1.0,
            distance: None,
            debug: None,
        };
        assert_eq!(result.center(), [2.0, 2.0]);
        assert_eq!(result.identity().2.as_deref(), Some("25"));
    }
}
