#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! House number resolution.
//!
//! Address features come in two shapes:
//! - **Clusters**: exact number-to-point pairs, resolved by string match
//!   (forward) or nearest neighbor (reverse). See [`cluster`].
//! - **Ranges**: street segments annotated with from/to house numbers per
//!   side, resolved by linear interpolation along the segment. See
//!   [`itp`].
//!
//! Everything here is pure and infallible. A number that cannot be placed
//! resolves to `None`, never an error.

pub mod cluster;
pub mod itp;

use std::sync::LazyLock;

use geostack_models::{Feature, LngLat, ResolvedAddress, distance::haversine_km};
use regex::Regex;

/// Matches the first run of ASCII digits in a house number.
static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Minimum separation, in kilometers, between a cluster point and a
/// range point before the range point is preferred in reverse lookups.
pub const RANGE_OVER_CLUSTER_KM: f64 = 0.2;

/// Extracts the numeric part of a house number such as `"25b"` or
/// `"G-100"`.
///
/// Returns `None` when the string has no digits or the digits overflow.
#[must_use]
pub fn parse_semi_number(value: &str) -> Option<u64> {
    DIGITS_RE.find(value)?.as_str().parse().ok()
}

/// Rounds a coordinate to six decimal places.
#[must_use]
pub fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Resolves `number` against `feature`'s address encoding.
///
/// Cluster points are tried first since they are exact; ranges are only
/// interpolated when no cluster point carries the number. Several cluster
/// points may share a number (units of one building, say), so every
/// matching point is returned, up to [`cluster::MAX_FORWARD_MATCHES`].
/// An empty result means the number could not be placed.
#[must_use]
pub fn forward(feature: &Feature, number: &str) -> Vec<ResolvedAddress> {
    let points = feature.address.points();
    if !points.is_empty() {
        let matches = cluster::forward(points, number);
        if !matches.is_empty() {
            return matches;
        }
    }

    let segments = feature.address.segments();
    if segments.is_empty() {
        return Vec::new();
    }
    let resolved = itp::forward(segments, number);
    if resolved.is_none() {
        log::debug!(
            "Address {number} not found on feature {} ({})",
            feature.id,
            feature.text
        );
    }
    resolved.into_iter().collect()
}

/// Finds the address of `feature` nearest to `query`.
///
/// When a feature carries both clusters and ranges, the interpolated
/// result only wins if it is closer to the query than the cluster point
/// and at least [`RANGE_OVER_CLUSTER_KM`] away from it.
#[must_use]
pub fn reverse(feature: &Feature, query: LngLat) -> Option<ResolvedAddress> {
    let from_cluster = cluster::reverse(feature.address.points(), query);
    let from_range = itp::reverse(feature.address.segments(), query);

    match (from_cluster, from_range) {
        (Some(cluster), Some(range)) => {
            let range_closer =
                haversine_km(query, range.point) < haversine_km(query, cluster.point);
            let far_apart = haversine_km(cluster.point, range.point) > RANGE_OVER_CLUSTER_KM;
            if range_closer && far_apart {
                Some(range)
            } else {
                Some(cluster)
            }
        }
        (cluster, range) => cluster.or(range),
    }
}

#[cfg(test)]
mod tests {
    use geostack_models::{AddressEncoding, ClusterPoint, Parity, RangeSegment, RangeSide};

    use super::*;

    fn side(from: &str, to: &str) -> RangeSide {
        RangeSide {
            from: from.to_string(),
            to: to.to_string(),
            parity: Parity::Unspecified,
        }
    }

    fn street(address: AddressEncoding) -> Feature {
        let mut feature = Feature::new(1, "Main St", 10.0, [0.0, 0.0]);
        feature.address = address;
        feature
    }

    #[test]
    fn semi_numbers() {
        assert_eq!(parse_semi_number("5b"), Some(5));
        assert_eq!(parse_semi_number("G-100"), Some(100));
        assert_eq!(parse_semi_number("asdf"), None);
        assert_eq!(parse_semi_number(""), None);
        assert_eq!(parse_semi_number("99999999999999999999999"), None);
    }

    #[test]
    fn rounds_to_six_places() {
        assert!((round6(40.981_963_8) - 40.981_964).abs() < 1e-12);
    }

    #[test]
    fn forward_prefers_cluster_points() {
        let feature = street(AddressEncoding::Combined {
            points: vec![ClusterPoint {
                number: "10".to_string(),
                point: [5.0, 5.0],
            }],
            segments: vec![RangeSegment {
                line: vec![[0.0, 0.0], [0.0, 100.0]],
                left: side("0", "100"),
                right: RangeSide::default(),
            }],
        });

        let resolved = forward(&feature, "10");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].point, [5.0, 5.0]);
        assert!(!resolved[0].interpolated);

        let resolved = forward(&feature, "20");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].point, [0.0, 20.0]);
        assert!(resolved[0].interpolated);
    }

    #[test]
    fn forward_returns_every_point_sharing_a_number() {
        let point = |number: &str, point: LngLat| ClusterPoint {
            number: number.to_string(),
            point,
        };
        let feature = street(AddressEncoding::Cluster {
            points: vec![
                point("3", [0.201, 0.2]),
                point("5", [0.202, 0.2]),
                point("3", [0.204, 0.2]),
            ],
        });

        let resolved = forward(&feature, "3")
            .into_iter()
            .map(|address| address.point)
            .collect::<Vec<_>>();
        assert_eq!(resolved, vec![[0.201, 0.2], [0.204, 0.2]]);
    }

    #[test]
    fn forward_on_plain_feature_is_empty() {
        let feature = Feature::new(1, "Springfield", 10.0, [0.0, 0.0]);
        assert!(forward(&feature, "10").is_empty());
    }

    #[test]
    fn reverse_keeps_cluster_point_when_range_is_nearby() {
        let feature = street(AddressEncoding::Combined {
            points: vec![ClusterPoint {
                number: "12".to_string(),
                point: [0.0, 0.0011],
            }],
            segments: vec![RangeSegment {
                line: vec![[0.0, 0.0], [0.0, 0.01]],
                left: side("0", "100"),
                right: RangeSide::default(),
            }],
        });

        let resolved = reverse(&feature, [-0.000_01, 0.001]).unwrap();
        assert_eq!(resolved.number, "12");
        assert!(!resolved.interpolated);
    }

    #[test]
    fn reverse_prefers_distant_closer_range() {
        let feature = street(AddressEncoding::Combined {
            points: vec![ClusterPoint {
                number: "2".to_string(),
                point: [0.0, 0.0],
            }],
            segments: vec![RangeSegment {
                line: vec![[0.0, 0.0], [0.0, 0.1]],
                left: side("0", "100"),
                right: RangeSide::default(),
            }],
        });

        let resolved = reverse(&feature, [-0.000_1, 0.05]).unwrap();
        assert!(resolved.interpolated);
        assert_eq!(resolved.number, "50");
    }
}
