//! Per-query inputs: coverage bundles from the upstream matcher and the
//! caller's options.

use serde::{Deserialize, Serialize};

use crate::{LngLat, TileCoord};

/// Default number of results returned to the caller.
pub const DEFAULT_LIMIT: usize = 5;

/// Default number of verified features that get a context stack loaded.
pub const DEFAULT_VERIFY_LIMIT: usize = 10;

/// Query terms a term mask can represent.
pub const MAX_QUERY_TOKENS: u32 = u32::BITS;

/// One feature's contribution to a coalesced match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cover {
    /// Position of the contributing index in the configured hierarchy.
    pub index: usize,
    /// Feature id within that index.
    pub feature_id: u64,
    /// Query-scoped temporary id (see [`crate::tmp_id`]).
    pub tmp_id: u64,
    /// Tile cell the match was found in.
    pub tile: TileCoord,
    /// Bitmask of query terms this feature matched.
    pub mask: u32,
    /// Number of query terms this feature matched.
    pub match_count: u32,
    /// Share of the query this feature accounts for.
    pub relevance: f64,
    /// The query text that matched.
    #[serde(default)]
    pub text: String,
}

/// The upstream matcher's evidence for one tile cell: a stack of covers,
/// the first being the candidate feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageBundle {
    /// Combined relevance of the whole stack.
    pub relevance: f64,
    /// Contributing covers, candidate first.
    pub covers: Vec<Cover>,
}

impl CoverageBundle {
    /// The candidate cover.
    #[must_use]
    pub fn candidate(&self) -> Option<&Cover> {
        self.covers.first()
    }
}

/// The house-number token parsed out of a forward query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressToken {
    /// The number as typed (e.g. `"25"` or `"25b"`).
    pub number: String,
    /// Position of the token in the query.
    pub position: u32,
    /// Total number of tokens in the query.
    pub token_count: u32,
}

impl AddressToken {
    /// Bit in a term mask that stands for this token, or `None` when the
    /// position is beyond [`MAX_QUERY_TOKENS`].
    #[must_use]
    pub const fn mask(&self) -> Option<u32> {
        1_u32.checked_shl(self.position)
    }
}

/// Caller-supplied options for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Bias results toward this point.
    #[serde(default)]
    pub proximity: Option<LngLat>,
    /// Only return features from indexes of these types.
    #[serde(default)]
    pub types: Option<Vec<String>>,
    /// Only return features whose center lies within these
    /// `[west, south, east, north]` bounds.
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
    /// Maximum number of results.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Overrides the configured verify limit.
    #[serde(default)]
    pub verify_limit: Option<usize>,
    /// Attach [`crate::ResultDebug`] to every result.
    #[serde(default)]
    pub debug: bool,
}

const fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            proximity: None,
            types: None,
            bbox: None,
            limit: DEFAULT_LIMIT,
            verify_limit: None,
            debug: false,
        }
    }
}

impl QueryOptions {
    /// Returns `true` if `index_type` passes the type filter.
    #[must_use]
    pub fn allows_type(&self, index_type: &str) -> bool {
        self.types
            .as_ref()
            .is_none_or(|types| types.iter().any(|t| t == index_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_type_filter_allows_everything() {
        let options = QueryOptions::default();
        assert!(options.allows_type("country"));
    }

    #[test]
    fn type_filter_restricts() {
        let options = QueryOptions {
            types: Some(vec!["place".to_string()]),
            ..QueryOptions::default()
        };
        assert!(options.allows_type("place"));
        assert!(!options.allows_type("country"));
    }

    #[test]
    fn address_token_mask() {
        let token = AddressToken {
            number: "25".to_string(),
            position: 2,
            token_count: 4,
        };
        assert_eq!(token.mask(), Some(0b100));
    }

    #[test]
    fn address_token_mask_beyond_the_last_bit() {
        let last = AddressToken {
            number: "25".to_string(),
            position: 31,
            token_count: 32,
        };
        assert_eq!(last.mask(), Some(1 << 31));

        let past = AddressToken {
            position: 40,
            token_count: 41,
            ..last
        };
        assert_eq!(past.mask(), None);
    }
}
