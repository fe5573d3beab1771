//! Exact address points.

use geostack_models::{ClusterPoint, LngLat, ResolvedAddress, distance::haversine_km};

use crate::round6;

/// Maximum number of points returned by a forward lookup.
pub const MAX_FORWARD_MATCHES: usize = 10;

/// How well a cluster number matched the query. Lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchRank {
    /// Same string, ignoring case.
    Exact,
    /// Same as the query with its non-digits removed.
    Numeric,
}

fn rank(query: &str, digits: &str, candidate: &str) -> Option<MatchRank> {
    if candidate.eq_ignore_ascii_case(query) {
        Some(MatchRank::Exact)
    } else if !digits.is_empty() && candidate == digits {
        Some(MatchRank::Numeric)
    } else {
        None
    }
}

/// Finds every point numbered `number`.
///
/// Exact string matches win over digits-only matches; once an exact match
/// is seen, digits-only matches are discarded. Several points may share a
/// number, so all best-ranked points are returned in declaration order,
/// up to [`MAX_FORWARD_MATCHES`].
#[must_use]
pub fn forward(points: &[ClusterPoint], number: &str) -> Vec<ResolvedAddress> {
    let digits = number
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>();

    let mut best: Option<MatchRank> = None;
    let mut matches = Vec::new();

    for point in points {
        let Some(rank) = rank(number, &digits, &point.number) else {
            continue;
        };
        match best {
            Some(current) if rank > current => continue,
            Some(current) if rank == current => {}
            _ => {
                best = Some(rank);
                matches.clear();
            }
        }

        matches.push(ResolvedAddress {
            point: [round6(point.point[0]), round6(point.point[1])],
            interpolated: false,
            omitted: false,
            number: point.number.clone(),
        });
        if matches.len() >= MAX_FORWARD_MATCHES && best == Some(MatchRank::Exact) {
            break;
        }
    }

    matches.truncate(MAX_FORWARD_MATCHES);
    matches
}

/// Finds the point closest to `query` by great-circle distance.
///
/// Ties go to the point declared first.
#[must_use]
pub fn reverse(points: &[ClusterPoint], query: LngLat) -> Option<ResolvedAddress> {
    let mut closest: Option<(f64, &ClusterPoint)> = None;
    for point in points {
        let distance = haversine_km(query, point.point);
        if closest.is_none_or(|(best, _)| distance < best) {
            closest = Some((distance, point));
        }
    }

    closest.map(|(_, point)| ResolvedAddress {
        point: point.point,
        interpolated: false,
        omitted: false,
        number: point.number.clone(),
    })
}
