//! Final result ordering and cross-shard merging.

use std::{cmp::Ordering, collections::BTreeSet};

use geostack_models::RankedResult;

/// Orders two results, best first.
///
/// Ties on relevance fall through to hierarchy position, proximity
/// distance (only when proximity was requested and both sides have one),
/// exact addresses before approximate (`omitted`) ones, proximity-weighted
/// score, intrinsic score and finally feature id.
#[must_use]
pub fn compare_results(a: &RankedResult, b: &RankedResult, proximity_requested: bool) -> Ordering {
    b.relevance
        .total_cmp(&a.relevance)
        .then_with(|| a.index_position.cmp(&b.index_position))
        .then_with(|| match (proximity_requested, a.distance, b.distance) {
            (true, Some(a), Some(b)) => a.total_cmp(&b),
            _ => Ordering::Equal,
        })
        .then_with(|| omitted(a).cmp(&omitted(b)))
        .then_with(|| b.score_dist.total_cmp(&a.score_dist))
        .then_with(|| b.feature.score.total_cmp(&a.feature.score))
        .then_with(|| a.feature.id.cmp(&b.feature.id))
}

fn omitted(result: &RankedResult) -> bool {
    result.address.as_ref().is_some_and(|address| address.omitted)
}

/// Sorts `results` in place with [`compare_results`].
pub fn sort_results(results: &mut [RankedResult], proximity_requested: bool) {
    results.sort_by(|a, b| compare_results(a, b, proximity_requested));
}

/// Merges result lists from independently queried shards.
///
/// Results are concatenated, sorted, stripped of duplicates (the
/// best-ranked copy of each identity survives) and only then truncated to
/// `limit`.
#[must_use]
pub fn combine_results(
    shards: impl IntoIterator<Item = Vec<RankedResult>>,
    limit: usize,
    proximity_requested: bool,
) -> Vec<RankedResult> {
    let mut combined = shards.into_iter().flatten().collect::<Vec<_>>();
    let total = combined.len();
    sort_results(&mut combined, proximity_requested);

    let mut seen = BTreeSet::new();
    combined.retain(|result| seen.insert(result.identity()));
    log::debug!(
        "Combined {total} shard results into {} unique, keeping {}",
        combined.len(),
        limit.min(combined.len())
    );

    combined.truncate(limit);
    combined
}
