//! Forward result verification.
//!
//! Coverage bundles from the upstream matcher are only claims: the
//! candidate feature is loaded, checked against the bundle's tile,
//! resolved to a house number where the query carried one, scored, and
//! finally placed in its context stack. The context decides the final
//! relevance; [`crate::rank`] decides the order.

use std::{cmp::Ordering, collections::BTreeMap};

use futures::{StreamExt as _, TryStreamExt as _, stream};
use geostack_context::{ContextError, ContextOptions};
use geostack_models::{
    AddressOrder, AddressToken, ContextFeature, Cover, CoverageBundle, Feature, LngLat,
    QueryOptions, RankedResult, ResolvedAddress, ResultDebug,
};
use geostack_scoring::{ScoreCeiling, haversine_miles, score_dist};

use crate::{GeocodeError, Geocoder, rank::sort_results};

/// Bundles considered per query, best first as handed in.
pub const MAX_CANDIDATES: usize = 20;

/// Relevance multiplier for an address feature whose number could not be
/// resolved and which is returned as a plain street instead.
pub const STREET_FALLBACK_PENALTY: f64 = 0.99;

/// A candidate that survived feature-level verification.
#[derive(Debug, Clone)]
struct Verified<'a> {
    bundle: &'a CoverageBundle,
    /// Covers after address-token consumption.
    covers: Vec<Cover>,
    /// Bundle relevance after the street fallback penalty.
    relevance: f64,
    /// Order the bundle was handed in.
    order: usize,
    position: usize,
    feature: Feature,
    address: Option<ResolvedAddress>,
    distance: Option<f64>,
    score_dist: f64,
}

impl Verified<'_> {
    fn center(&self) -> LngLat {
        self.address
            .as_ref()
            .map_or(self.feature.center, |address| address.point)
    }

    fn omitted(&self) -> bool {
        self.address.as_ref().is_some_and(|address| address.omitted)
    }

    /// Ordering used to pick which candidates get a context loaded.
    fn compare(&self, other: &Self) -> Ordering {
        other
            .relevance
            .total_cmp(&self.relevance)
            .then_with(|| other.address.is_some().cmp(&self.address.is_some()))
            .then_with(|| self.omitted().cmp(&other.omitted()))
            .then_with(|| other.score_dist.total_cmp(&self.score_dist))
            .then_with(|| self.order.cmp(&other.order))
    }
}

impl Geocoder {
    /// Verifies and ranks the candidates in `bundles`.
    ///
    /// `token` is the house number parsed out of the query, if any.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Validation`] for bad options or an address
    /// token positioned outside the query, before any store is touched,
    /// and [`GeocodeError::Context`] if a feature load or context
    /// resolution fails.
    pub async fn verify(
        &self,
        bundles: &[CoverageBundle],
        token: Option<&AddressToken>,
        options: &QueryOptions,
    ) -> Result<Vec<RankedResult>, GeocodeError> {
        self.validate(options)?;
        if let Some(token) = token {
            crate::validate_token(token)?;
        }
        let ceiling = self.score_ceiling();

        let candidates = bundles
            .iter()
            .filter(|bundle| {
                bundle
                    .candidate()
                    .and_then(|cover| self.config.indexes.get(cover.index))
                    .is_some_and(|index| options.allows_type(index.index_type()))
            })
            .take(MAX_CANDIDATES)
            .collect::<Vec<_>>();

        let loaded: Vec<Option<Feature>> = stream::iter(candidates.iter().map(|bundle| async move {
            match bundle.candidate() {
                Some(cover) => self.resolver.load_feature(cover.index, cover.feature_id).await,
                None => Ok(None),
            }
        }))
        .buffered(self.config.load_concurrency)
        .try_collect()
        .await?;

        let mut verified = candidates
            .iter()
            .zip(loaded)
            .enumerate()
            .flat_map(|(order, (bundle, feature))| match feature {
                Some(feature) => {
                    self.verify_feature(order, bundle, feature, token, options, &ceiling)
                }
                None => Vec::new(),
            })
            .collect::<Vec<_>>();
        verified.sort_by(Verified::compare);
        verified.truncate(options.verify_limit.unwrap_or(self.config.verify_limit));
        log::debug!(
            "Verified {} of {} candidate bundles",
            verified.len(),
            candidates.len()
        );

        let stacks: Vec<Vec<ContextFeature>> = stream::iter(
            verified
                .iter()
                .map(|candidate| self.load_stack(candidate)),
        )
        .buffered(self.config.load_concurrency)
        .try_collect()
        .await?;

        let mut results = verified
            .into_iter()
            .zip(stacks)
            .enumerate()
            .map(|(position, (candidate, context))| {
                let index = &self.config.indexes[candidate.position];
                let relevance = context_relevance(
                    &candidate.covers,
                    bundles,
                    &context,
                    index.address_order,
                );
                let debug = options.debug.then(|| ResultDebug {
                    bundle: candidate.bundle.clone(),
                    position,
                });
                RankedResult {
                    feature: candidate.feature,
                    index_id: index.id.clone(),
                    index_type: index.index_type().to_string(),
                    index_position: candidate.position,
                    address: candidate.address,
                    context,
                    relevance,
                    score_dist: candidate.score_dist,
                    distance: candidate.distance,
                    debug,
                }
            })
            .collect::<Vec<_>>();

        sort_results(&mut results, options.proximity.is_some());
        results.truncate(options.limit);
        Ok(results)
    }

    /// Checks one loaded candidate. Returns one [`Verified`] per resolved
    /// address point, a single one for a feature without an address, and
    /// nothing when the candidate must be dropped.
    fn verify_feature<'a>(
        &self,
        order: usize,
        bundle: &'a CoverageBundle,
        feature: Feature,
        token: Option<&AddressToken>,
        options: &QueryOptions,
        ceiling: &ScoreCeiling,
    ) -> Vec<Verified<'a>> {
        let Some(cover) = bundle.candidate() else {
            return Vec::new();
        };
        let Some(index) = self.config.indexes.get(cover.index) else {
            return Vec::new();
        };

        if feature.is_ghost() {
            log::trace!("Skipping ghost feature {} of index {}", feature.id, index.id);
            return Vec::new();
        }

        let mut covers = bundle.covers.clone();
        let mut relevance = bundle.relevance;
        let mut addresses = Vec::new();

        if let Some(token) = token
            && index.address
            && feature.address.is_address()
        {
            addresses = geostack_address::forward(&feature, &token.number);
            if addresses.is_empty() {
                relevance *= STREET_FALLBACK_PENALTY;
                if let Some(first) = covers.first_mut() {
                    first.relevance *= STREET_FALLBACK_PENALTY;
                }
            } else {
                consume_token(&mut covers, token);
            }
        }

        // A resolved address is its own proof of location; anything else
        // must really sit in the tile the matcher found it in.
        if addresses.is_empty() && !feature.covers_tile(cover.tile) {
            log::debug!(
                "Dropping feature {} of index {}: not in tile {}",
                feature.id,
                index.id,
                cover.tile
            );
            return Vec::new();
        }

        let score = ceiling.normalize(feature.score, index.effective_max_score());
        let candidate = |address: Option<ResolvedAddress>| {
            let center = address.as_ref().map_or(feature.center, |a| a.point);
            if let Some([west, south, east, north]) = options.bbox
                && !(center[0] >= west
                    && center[0] <= east
                    && center[1] >= south
                    && center[1] <= north)
            {
                return None;
            }

            let distance = options
                .proximity
                .map(|proximity| haversine_miles(proximity, center));
            let score_dist = match distance {
                Some(distance) if score > 0.0 => score.max(score_dist(score, distance, index.zoom)),
                _ => score,
            };

            Some(Verified {
                bundle,
                covers: covers.clone(),
                relevance,
                order,
                position: cover.index,
                feature: feature.clone(),
                address,
                distance,
                score_dist,
            })
        };

        if addresses.is_empty() {
            candidate(None).into_iter().collect()
        } else {
            addresses
                .into_iter()
                .filter_map(|address| candidate(Some(address)))
                .collect()
        }
    }

    /// Loads the context above a verified candidate and puts the
    /// candidate itself on top.
    async fn load_stack(&self, candidate: &Verified<'_>) -> Result<Vec<ContextFeature>, ContextError> {
        let index = &self.config.indexes[candidate.position];
        let max_index = self
            .config
            .positions_of(index.index_type())
            .next()
            .unwrap_or(candidate.position);
        let options = ContextOptions {
            max_index: Some(max_index),
            full: false,
            matched: candidate.covers.iter().map(|cover| cover.tmp_id).collect(),
        };
        let context = self.resolver.resolve(candidate.center(), &options).await?;

        let own_tmp_id = candidate
            .covers
            .first()
            .map_or_else(
                || geostack_models::tmp_id(candidate.position, candidate.feature.id),
                |cover| cover.tmp_id,
            );
        let mut stack = Vec::with_capacity(context.len() + 1);
        stack.push(ContextFeature {
            index_id: index.id.clone(),
            index_position: candidate.position,
            index_type: index.index_type().to_string(),
            external_id: format!("{}.{}", index.index_type(), candidate.feature.id),
            tmp_id: own_tmp_id,
            text: candidate.feature.text.clone(),
            score: candidate.feature.score,
            query_distance: 0.0,
            feature: None,
            address: candidate.address.clone(),
        });
        stack.extend(context);
        Ok(stack)
    }
}

/// Marks the house number as matched by the candidate cover once an
/// address has been resolved from it.
fn consume_token(covers: &mut [Cover], token: &AddressToken) {
    let (Some(first), Some(mask)) = (covers.first_mut(), token.mask()) else {
        return;
    };
    if first.mask & mask != 0 {
        return;
    }
    first.mask |= mask;
    first.match_count += 1;
    first.relevance = (first.relevance + 1.0 / f64::from(token.token_count.max(1))).min(1.0);
}

/// Relevance of a whole context stack, counting only the candidate's own
/// covers.
///
/// Walks the stack most specific first. Each stack entry the query
/// matched adds its cover's relevance, unless its terms were already
/// claimed by an earlier entry. The first two matched entries set the
/// reading direction; later entries that break it only add half. A
/// direction costs 0.01 unless it is the index's expected address order.
#[must_use]
pub fn stack_relevance(
    covers: &[Cover],
    stack: &[ContextFeature],
    address_order: Option<AddressOrder>,
) -> f64 {
    let strict = by_tmp_id(covers.iter());
    round_relevance(directional_relevance(
        |tmp_id| strict.get(&tmp_id).copied(),
        stack,
        address_order,
    ))
}

/// Relevance of a context stack, also crediting stack entries that only
/// another bundle of the same query matched.
///
/// The strict walk uses the candidate's own covers; the loose walk falls
/// back to any peer bundle's cover for the same feature. The better of
/// the two wins.
#[must_use]
pub fn context_relevance(
    covers: &[Cover],
    peers: &[CoverageBundle],
    stack: &[ContextFeature],
    address_order: Option<AddressOrder>,
) -> f64 {
    let strict = by_tmp_id(covers.iter());
    let loose = by_tmp_id(peers.iter().flat_map(|bundle| bundle.covers.iter()));

    let strict_relevance =
        directional_relevance(|tmp_id| strict.get(&tmp_id).copied(), stack, address_order);
    let loose_relevance = directional_relevance(
        |tmp_id| strict.get(&tmp_id).or_else(|| loose.get(&tmp_id)).copied(),
        stack,
        address_order,
    );
    round_relevance(strict_relevance.max(loose_relevance))
}

/// First cover seen per temporary id.
fn by_tmp_id<'c>(covers: impl Iterator<Item = &'c Cover>) -> BTreeMap<u64, &'c Cover> {
    let mut map = BTreeMap::new();
    for cover in covers {
        map.entry(cover.tmp_id).or_insert(cover);
    }
    map
}

fn directional_relevance<'c>(
    matched: impl Fn(u64) -> Option<&'c Cover>,
    stack: &[ContextFeature],
    address_order: Option<AddressOrder>,
) -> f64 {
    let mut used_mask = 0_u32;
    let mut last_mask = None;
    let mut direction = None;
    let mut relevance = 0.0;

    for entry in stack {
        let Some(cover) = matched(entry.tmp_id) else {
            continue;
        };
        if used_mask & cover.mask != 0 {
            continue;
        }

        let mut backwards = false;
        if let Some(last) = last_mask {
            let step = if last < cover.mask {
                AddressOrder::Ascending
            } else {
                AddressOrder::Descending
            };
            match direction {
                None => direction = Some(step),
                Some(expected) => backwards = expected != step,
            }
        }

        used_mask |= cover.mask;
        last_mask = Some(cover.mask);
        relevance += if backwards {
            cover.relevance * 0.5
        } else {
            cover.relevance
        };
    }

    if direction.is_some() {
        relevance -= 0.01;
        if direction == address_order {
            relevance += 0.01;
        }
    }
    relevance
}

fn round_relevance(relevance: f64) -> f64 {
    ((relevance * 1e6).round() / 1e6).clamp(0.0, 1.0)
}
