//! Cross-index score normalization.
//!
//! Indexes are built independently and their intrinsic scores live on
//! unrelated scales. The ceiling is derived from the median of the
//! per-index maxima so a single index with an outsized scale gets squeezed
//! into the top band instead of swamping every comparison.

/// Multiple of the median index max that any score may reach.
pub const CEILING_FACTOR: f64 = 7.0;

/// Derived score bounds for one configured index stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreCeiling {
    /// Highest score any index may contribute after scaling.
    pub allowed_max: f64,
    /// Highest per-index max actually configured.
    pub observed_max: f64,
}

impl ScoreCeiling {
    /// Computes the ceiling from each index's own max score.
    ///
    /// Non-positive maxima count as 1. The median of an even-length list
    /// is its upper-middle element.
    #[must_use]
    pub fn from_index_maxes(maxes: &[f64]) -> Self {
        let mut maxes = maxes
            .iter()
            .map(|max| if *max > 0.0 { *max } else { 1.0 })
            .collect::<Vec<_>>();
        if maxes.is_empty() {
            maxes.push(1.0);
        }
        maxes.sort_by(f64::total_cmp);

        let median = maxes[maxes.len() / 2];
        let observed_max = maxes[maxes.len() - 1];
        let ceiling = Self {
            allowed_max: CEILING_FACTOR * median,
            observed_max,
        };
        log::debug!(
            "Score ceiling: allowed_max={} observed_max={} (median {median} of {} indexes)",
            ceiling.allowed_max,
            ceiling.observed_max,
            maxes.len()
        );
        ceiling
    }

    /// Maps `score` into the band `[allowed × 6/7, allowed]`, preserving
    /// order relative to the observed max.
    #[must_use]
    pub fn scale(&self, score: f64) -> f64 {
        let band = self.allowed_max / CEILING_FACTOR;
        (self.allowed_max - band + band * (score / self.observed_max)).floor()
    }

    /// Normalizes a score from an index whose own max is `index_max`.
    ///
    /// Indexes within the ceiling are left alone. Scores from an index
    /// above it are scaled by the same factor that brings the index max
    /// into the top band. Negative scores pass through so ghosts stay
    /// ghosts.
    #[must_use]
    pub fn normalize(&self, score: f64, index_max: f64) -> f64 {
        if score <= 0.0 || index_max <= self.allowed_max {
            return score;
        }
        score * self.scale(index_max) / index_max
    }
}
