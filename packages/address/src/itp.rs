//! Interpolated (range-coded) address lookups.
//!
//! A range segment is a polyline with a from/to house number pair on each
//! side. Forward lookups place a number along the line by its fraction of
//! the side's range; reverse lookups do the opposite for a query point.

use std::cmp::Ordering;

use geostack_models::{LngLat, Parity, RangeSegment, RangeSide, ResolvedAddress, distance::planar};

use crate::{parse_semi_number, round6};

/// Numbers at most this far from a segment endpoint fall back to that
/// endpoint when no range contains them.
pub const FALLBACK_TOLERANCE: u64 = 100;

/// One side of a segment with its numbers parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Side {
    from: Option<u64>,
    to: Option<u64>,
    parity: Parity,
}

impl Side {
    fn parse(side: &RangeSide) -> Self {
        Self {
            from: parse_semi_number(&side.from),
            to: parse_semi_number(&side.to),
            parity: side.parity,
        }
    }

    /// The `(from, to)` pair, with a missing bound standing in for the
    /// other.
    const fn bounds(self) -> Option<(u64, u64)> {
        match (self.from, self.to) {
            (Some(from), Some(to)) => Some((from, to)),
            (Some(only), None) | (None, Some(only)) => Some((only, only)),
            (None, None) => None,
        }
    }

    fn contains(self, number: u64) -> bool {
        self.bounds()
            .is_some_and(|(from, to)| number >= from.min(to) && number <= from.max(to))
    }
}

/// A segment in standardized form.
#[derive(Debug, Clone)]
pub struct Range<'a> {
    /// Position of the segment in the declared list.
    pub index: usize,
    left: Side,
    right: Side,
    line: &'a [LngLat],
}

impl Range<'_> {
    fn sort_key(&self) -> impl Ord {
        (
            self.left.from,
            self.right.from,
            self.left.to,
            self.right.to,
            self.left.parity,
            self.right.parity,
            self.line.len(),
            self.index,
        )
    }

    const fn is_empty(&self) -> bool {
        self.left.from.is_none()
            && self.left.to.is_none()
            && self.right.from.is_none()
            && self.right.to.is_none()
    }
}

/// Parses every segment and sorts them into a stable order, so that the
/// same street described in a different segment order resolves
/// identically.
///
/// Segments with fewer than two vertices are dropped.
#[must_use]
pub fn standardize(segments: &[RangeSegment]) -> Vec<Range<'_>> {
    let mut ranges = segments
        .iter()
        .enumerate()
        .filter(|(_, segment)| segment.line.len() >= 2)
        .map(|(index, segment)| Range {
            index,
            left: Side::parse(&segment.left),
            right: Side::parse(&segment.right),
            line: &segment.line,
        })
        .collect::<Vec<_>>();

    ranges.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    ranges
}

/// The closest endpoint seen so far on one side of the street.
#[derive(Debug, Clone, Copy)]
struct Nearest {
    number: u64,
    point: LngLat,
}

impl Nearest {
    fn offer(slot: &mut Option<Self>, target: u64, number: u64, point: LngLat) {
        let closer = slot.is_none_or(|best| target.abs_diff(number) < target.abs_diff(best.number));
        if closer {
            *slot = Some(Self { number, point });
        }
    }
}

/// Places `number` on the first range that contains it.
///
/// Resolution order:
/// 1. A side whose range contains the number and whose parity accepts it
///    (left side first). Returned as an exact interpolation.
/// 2. A side whose range contains the number but with the wrong parity.
///    Interpolated, flagged `omitted`.
/// 3. The nearest parity-compatible segment endpoint within
///    [`FALLBACK_TOLERANCE`] (left side first). Flagged `omitted`.
#[must_use]
pub fn forward(segments: &[RangeSegment], number: &str) -> Option<ResolvedAddress> {
    let target = parse_semi_number(number)?;
    let ranges = standardize(segments);

    let mut loose: Option<(u64, u64, &[LngLat])> = None;
    let mut nearest_left: Option<Nearest> = None;
    let mut nearest_right: Option<Nearest> = None;

    for range in &ranges {
        if range.is_empty() {
            continue;
        }

        for side in [range.left, range.right] {
            if side.contains(target)
                && side.parity.accepts(target)
                && let Some((from, to)) = side.bounds()
            {
                return Some(resolved(set_point(target, from, to, range.line, false), number));
            }
        }

        if let Some(side) = [range.left, range.right]
            .into_iter()
            .find(|side| side.contains(target))
        {
            if loose.is_none()
                && let Some((from, to)) = side.bounds()
            {
                loose = Some((from, to, range.line));
            }
            continue;
        }

        let (Some(first), Some(last)) = (range.line.first(), range.line.last()) else {
            continue;
        };
        for (side, slot) in [
            (range.left, &mut nearest_left),
            (range.right, &mut nearest_right),
        ] {
            if !side.parity.accepts(target) {
                continue;
            }
            if let Some(from) = side.from {
                Nearest::offer(slot, target, from, *first);
            }
            if let Some(to) = side.to {
                Nearest::offer(slot, target, to, *last);
            }
        }
    }

    if let Some((from, to, line)) = loose {
        return Some(resolved(set_point(target, from, to, line, true), number));
    }

    [nearest_left, nearest_right]
        .into_iter()
        .flatten()
        .find(|nearest| target.abs_diff(nearest.number) <= FALLBACK_TOLERANCE)
        .map(|nearest| {
            let line = [nearest.point, nearest.point];
            resolved(
                set_point(nearest.number, nearest.number, nearest.number, &line, true),
                number,
            )
        })
}

fn resolved(point: InterpolatedPoint, number: &str) -> ResolvedAddress {
    ResolvedAddress {
        point: point.point,
        interpolated: true,
        omitted: point.omitted,
        number: number.to_string(),
    }
}

/// Output of [`set_point`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolatedPoint {
    /// The placed point, rounded to six decimals.
    pub point: LngLat,
    /// Carried through from the caller.
    pub omitted: bool,
}

/// Places `number` along `line` given that `start` sits at the first
/// vertex and `end` at the last.
///
/// Descending ranges are handled by walking the line backwards. A range
/// of zero width places the number at the first vertex.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn set_point(
    number: u64,
    start: u64,
    end: u64,
    line: &[LngLat],
    omitted: bool,
) -> InterpolatedPoint {
    let mut coords = line.to_vec();
    let (start, end) = if start > end {
        coords.reverse();
        (end, start)
    } else {
        (start, end)
    };

    let Some(&origin) = coords.first() else {
        return InterpolatedPoint {
            point: [0.0, 0.0],
            omitted,
        };
    };
    if coords.len() == 1 {
        return InterpolatedPoint {
            point: [round6(origin[0]), round6(origin[1])],
            omitted,
        };
    }

    let part = if end == start {
        0.0
    } else {
        (number as f64 - start as f64) / (end - start) as f64
    };

    let mut cumulative = Vec::with_capacity(coords.len());
    let mut total = 0.0;
    cumulative.push(total);
    for pair in coords.windows(2) {
        total += planar(pair[0], pair[1]);
        cumulative.push(total);
    }

    let target = part * total;
    let mut stop = 1;
    while stop < coords.len() - 1 && cumulative[stop] <= target {
        stop += 1;
    }

    let span = cumulative[stop] - cumulative[stop - 1];
    let interp = if span == 0.0 {
        1.0
    } else {
        (target - cumulative[stop - 1]) / span
    };

    let a = coords[stop - 1];
    let b = coords[stop];
    InterpolatedPoint {
        point: [
            round6(b[0].mul_add(interp, a[0] * (1.0 - interp))),
            round6(b[1].mul_add(interp, a[1] * (1.0 - interp))),
        ],
        omitted,
    }
}

/// The closest point on a polyline.
#[derive(Debug, Clone, Copy)]
struct Projection {
    point: LngLat,
    distance: f64,
    /// Distance along the line to `point`.
    travelled: f64,
    /// Length of the whole line.
    length: f64,
    /// Vertex index of the start of the segment `point` lies on.
    segment: usize,
}

fn project(line: &[LngLat], query: LngLat) -> Option<Projection> {
    let mut best: Option<Projection> = None;
    let mut travelled = 0.0;

    for (segment, pair) in line.windows(2).enumerate() {
        let [start, end] = [pair[0], pair[1]];
        let dx = end[0] - start[0];
        let dy = end[1] - start[1];
        let length_sq = dx.mul_add(dx, dy * dy);
        let t = if length_sq == 0.0 {
            0.0
        } else {
            (((query[0] - start[0]) * dx + (query[1] - start[1]) * dy) / length_sq).clamp(0.0, 1.0)
        };
        let point = [t.mul_add(dx, start[0]), t.mul_add(dy, start[1])];
        let distance = planar(query, point);
        let length = length_sq.sqrt();

        if best.is_none_or(|best| distance < best.distance) {
            best = Some(Projection {
                point,
                distance,
                travelled: t.mul_add(length, travelled),
                length: 0.0,
                segment,
            });
        }
        travelled += length;
    }

    best.map(|projection| Projection {
        length: travelled,
        ..projection
    })
}

/// Twice the signed area of the triangle `start, end, query`. Positive
/// when `query` is left of the directed line `start -> end`.
#[must_use]
pub fn det_2d(start: LngLat, end: LngLat, query: LngLat) -> f64 {
    (end[0] - start[0]).mul_add(query[1] - start[1], -((end[1] - start[1]) * (query[0] - start[0])))
}

/// Derives the house number at `ratio` along one side's range, rounded
/// to that side's parity.
///
/// A side with no parity recorded has no data; the other side is tried
/// once in that case.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn match_side(primary: Side, other: Side, ratio: f64) -> Option<u64> {
    let side = if primary.parity == Parity::Unspecified && primary.bounds().is_none() {
        other
    } else {
        primary
    };
    let (from, to) = side.bounds()?;

    let raw = (to as f64 - from as f64).mul_add(ratio, from as f64);
    let number = match side.parity {
        Parity::Odd => ((raw + 1.0) / 2.0).round() * 2.0 - 1.0,
        Parity::Even => (raw / 2.0).round() * 2.0,
        Parity::Unspecified | Parity::Both => raw.round(),
    };
    (number >= 0.0).then_some(number as u64)
}

/// Derives the house number closest to `query` from a set of range
/// segments.
///
/// The segment nearest the query (planar) wins; the query's side of that
/// segment picks which range to read, and the projected point's fraction
/// along the line picks the number. The returned point is the projection
/// of the query onto the segment.
#[must_use]
pub fn reverse(segments: &[RangeSegment], query: LngLat) -> Option<ResolvedAddress> {
    let ranges = standardize(segments);

    let (range, projection) = ranges
        .iter()
        .filter_map(|range| project(range.line, query).map(|p| (range, p)))
        .fold(None, |best: Option<(&Range<'_>, Projection)>, (range, p)| match best {
            Some((_, current)) if current.distance.partial_cmp(&p.distance) != Some(Ordering::Greater) => best,
            _ => Some((range, p)),
        })?;

    let start = range.line[projection.segment];
    let end = range.line[projection.segment + 1];
    let ratio = if projection.length == 0.0 {
        0.0
    } else {
        projection.travelled / projection.length
    };

    let number = if det_2d(start, end, query) > 0.0 {
        match_side(range.left, range.right, ratio)
    } else {
        match_side(range.right, range.left, ratio)
    }?;

    Some(ResolvedAddress {
        point: [round6(projection.point[0]), round6(projection.point[1])],
        interpolated: true,
        omitted: false,
        number: number.to_string(),
    })
}
