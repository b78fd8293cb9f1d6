//! Context builder.
//!
//! Aggregates raw per-source observations into one objective
//! `MarketSnapshot`: freshness filter, median-band outlier rejection,
//! volume-weighted median price, per-source realized volatility and
//! momentum (median across sources), and the source bitmap. The builder takes the observations by value and drops them once
//! the snapshot is finalized, so nothing downstream ever sees raw quotes.
//!
//! All arithmetic is integer so that every verifier recomputing from the
//! same observations gets the same bytes.

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::types::{
    AssetPair, DataAcquisitionError, MarketContext, MarketSnapshot, SourceObservation,
    MAX_SOURCES, VOLATILITY_SCALE,
};

/// Largest absolute per-step return admitted into the variance sum
/// (1000x, at `VOLATILITY_SCALE`). Keeps the squared sum inside `u128`.
const MAX_STEP_RETURN: i128 = 1_000 * VOLATILITY_SCALE as i128;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Aggregation policy, configured independently of scoring.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Observations older than this (relative to the current slot) are dropped.
    pub max_staleness_slots: u64,
    /// Maximum deviation from the provisional median, in basis points.
    pub max_deviation_bps: u64,
    /// Minimum number of surviving sources.
    pub min_sources: u8,
    /// Window over which price momentum is measured.
    pub momentum_lookback_slots: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_staleness_slots: 150,
            max_deviation_bps: 200,
            min_sources: 3,
            momentum_lookback_slots: 150,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct ContextBuilder {
    config: AggregationConfig,
}

impl ContextBuilder {
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    /// Build a snapshot at `current_slot` from the collected observations.
    ///
    /// Fails with `StaleData` if every well-formed observation is too old,
    /// and with `InsufficientSources` if fewer than `min_sources` sources
    /// survive freshness and outlier filtering. Never returns a partial
    /// context.
    pub fn build(
        &self,
        observations: Vec<SourceObservation>,
        asset_pair: AssetPair,
        current_slot: u64,
    ) -> Result<MarketSnapshot, DataAcquisitionError> {
        let required = self.config.min_sources.max(1);
        let received = observations.len();

        let well_formed: Vec<SourceObservation> = observations
            .into_iter()
            .filter(|o| Self::is_well_formed(o, current_slot))
            .collect();

        let fresh: Vec<SourceObservation> = well_formed
            .iter()
            .copied()
            .filter(|o| current_slot - o.observation_slot <= self.config.max_staleness_slots)
            .collect();

        if fresh.is_empty() {
            if !well_formed.is_empty() {
                warn!(
                    received,
                    max_staleness_slots = self.config.max_staleness_slots,
                    "Every observation failed the freshness filter"
                );
                return Err(DataAcquisitionError::StaleData {
                    max_staleness_slots: self.config.max_staleness_slots,
                });
            }
            return Err(DataAcquisitionError::InsufficientSources {
                required,
                available: 0,
            });
        }

        // One contribution per source for price, volume and liquidity.
        let latest = latest_per_source(&fresh);

        let provisional = median(&latest.values().map(|o| o.price).collect::<Vec<_>>());
        let mut survivors = BTreeMap::new();
        for (id, obs) in latest {
            if within_band(obs.price, provisional, self.config.max_deviation_bps) {
                survivors.insert(id, obs);
            } else {
                warn!(
                    source_id = id,
                    price = obs.price,
                    median = provisional,
                    max_deviation_bps = self.config.max_deviation_bps,
                    "Rejecting outlier source"
                );
            }
        }

        let available = survivors.len() as u8;
        if available < required {
            warn!(required, available, "Not enough sources survived filtering");
            return Err(DataAcquisitionError::InsufficientSources {
                required,
                available,
            });
        }

        let price = weighted_median(&survivors);
        let volume_24h = survivors
            .values()
            .fold(0u64, |acc, o| acc.saturating_add(o.volume_24h));
        let liquidity_depth = survivors.values().map(|o| o.liquidity).min().unwrap_or(0);

        // Every fresh quote of a surviving source must sit inside the band,
        // not only its latest one.
        let mut history: BTreeMap<u8, Vec<&SourceObservation>> = BTreeMap::new();
        for obs in fresh.iter().filter(|o| survivors.contains_key(&o.source_id)) {
            if within_band(obs.price, provisional, self.config.max_deviation_bps) {
                history.entry(obs.source_id).or_default().push(obs);
            } else {
                warn!(
                    source_id = obs.source_id,
                    price = obs.price,
                    observation_slot = obs.observation_slot,
                    median = provisional,
                    "Dropping out-of-band quote from series"
                );
            }
        }
        // Returns are taken within each source, never across venues.
        let series: Vec<Vec<(u64, u64)>> = history
            .into_values()
            .map(|quotes| price_points(quotes.into_iter()))
            .collect();
        let volatility = median_volatility(&series);
        let momentum_bps = median_momentum(
            &series,
            current_slot.saturating_sub(self.config.momentum_lookback_slots),
        );

        let source_bitmap = survivors.keys().fold(0u32, |bits, id| bits | (1u32 << *id));

        let context = MarketContext {
            slot: current_slot,
            asset_pair,
            price,
            volume_24h,
            volatility_1h: volatility.unwrap_or(0),
            liquidity_depth,
            source_bitmap,
            source_count: source_bitmap.count_ones() as u8,
        };
        debug_assert!(context.is_consistent());

        info!(
            pair = %asset_pair,
            slot = current_slot,
            received,
            fresh = fresh.len(),
            sources = context.source_count,
            price = context.price,
            volatility = context.volatility_1h,
            momentum_bps,
            "Market context built"
        );

        Ok(MarketSnapshot {
            context,
            momentum_bps,
            volatility_degraded: volatility.is_none(),
        })
    }

    fn is_well_formed(obs: &SourceObservation, current_slot: u64) -> bool {
        if obs.source_id >= MAX_SOURCES {
            warn!(source_id = obs.source_id, "Dropping observation with out-of-range source id");
            return false;
        }
        if obs.price == 0 {
            warn!(source_id = obs.source_id, "Dropping zero-price observation");
            return false;
        }
        if obs.observation_slot > current_slot {
            warn!(
                source_id = obs.source_id,
                observation_slot = obs.observation_slot,
                current_slot,
                "Dropping observation from a future slot"
            );
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Aggregation helpers
// ---------------------------------------------------------------------------

/// Latest observation per source: highest slot, ties broken by lower price.
fn latest_per_source(observations: &[SourceObservation]) -> BTreeMap<u8, SourceObservation> {
    let mut latest: BTreeMap<u8, SourceObservation> = BTreeMap::new();
    for obs in observations {
        latest
            .entry(obs.source_id)
            .and_modify(|cur| {
                if (obs.observation_slot, std::cmp::Reverse(obs.price))
                    > (cur.observation_slot, std::cmp::Reverse(cur.price))
                {
                    *cur = *obs;
                }
            })
            .or_insert(*obs);
    }
    latest
}

/// Median; the mean of the two middle values for an even count.
fn median(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        ((sorted[mid - 1] as u128 + sorted[mid] as u128) / 2) as u64
    }
}

fn within_band(price: u64, reference: u64, max_deviation_bps: u64) -> bool {
    let deviation = price.abs_diff(reference) as u128;
    deviation * 10_000 <= max_deviation_bps as u128 * reference as u128
}

/// Volume-weighted median of per-source prices. Falls back to the plain
/// median when no source reports volume.
fn weighted_median(sources: &BTreeMap<u8, SourceObservation>) -> u64 {
    let mut weighted: Vec<(u64, u8, u64)> = sources
        .values()
        .map(|o| (o.price, o.source_id, o.volume_24h))
        .collect();
    weighted.sort_unstable();

    let total: u128 = weighted.iter().map(|(_, _, v)| *v as u128).sum();
    if total == 0 {
        return median(&weighted.iter().map(|(p, _, _)| *p).collect::<Vec<_>>());
    }

    let mut cumulative = 0u128;
    for (price, _, volume) in &weighted {
        cumulative += *volume as u128;
        if cumulative * 2 >= total {
            return *price;
        }
    }
    weighted.last().map_or(0, |(p, _, _)| *p)
}

/// Mean price per distinct observation slot of one source, ascending by slot.
fn price_points<'a>(observations: impl Iterator<Item = &'a SourceObservation>) -> Vec<(u64, u64)> {
    let mut by_slot: BTreeMap<u64, (u128, u128)> = BTreeMap::new();
    for obs in observations {
        let entry = by_slot.entry(obs.observation_slot).or_insert((0, 0));
        entry.0 += obs.price as u128;
        entry.1 += 1;
    }
    by_slot
        .into_iter()
        .map(|(slot, (sum, count))| (slot, (sum / count) as u64))
        .collect()
}

/// Realized volatility at `VOLATILITY_SCALE`: square root of the summed
/// squared simple returns. `None` with fewer than two price points.
fn realized_volatility(points: &[(u64, u64)]) -> Option<u64> {
    if points.len() < 2 {
        return None;
    }
    let scale = VOLATILITY_SCALE as i128;
    let sum_sq: u128 = points
        .windows(2)
        .map(|w| {
            let (prev, next) = (w[0].1 as i128, w[1].1 as i128);
            let r = ((next - prev) * scale / prev).clamp(-MAX_STEP_RETURN, MAX_STEP_RETURN);
            (r * r) as u128
        })
        .sum();
    Some(u64::try_from(isqrt(sum_sq)).unwrap_or(u64::MAX))
}

/// Change between the first and last price point at or after `from_slot`,
/// in basis points. `None` with fewer than two points in the window.
fn momentum_bps(points: &[(u64, u64)], from_slot: u64) -> Option<i64> {
    let window: Vec<&(u64, u64)> = points.iter().filter(|(slot, _)| *slot >= from_slot).collect();
    match (window.first(), window.last()) {
        (Some(first), Some(last)) if window.len() >= 2 => {
            let (p0, p1) = (first.1 as i128, last.1 as i128);
            let bps = (p1 - p0) * 10_000 / p0;
            Some(bps.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
        }
        _ => None,
    }
}

/// Median of the per-source realized volatilities. `None` when no source
/// quoted on two distinct slots.
fn median_volatility(series: &[Vec<(u64, u64)>]) -> Option<u64> {
    let vols: Vec<u64> = series.iter().filter_map(|s| realized_volatility(s)).collect();
    if vols.is_empty() {
        debug!(sources = series.len(), "No source quoted on two distinct slots");
        None
    } else {
        Some(median(&vols))
    }
}

/// Median of the per-source momentum figures; 0 when no source has two
/// points inside the lookback.
fn median_momentum(series: &[Vec<(u64, u64)>], from_slot: u64) -> i64 {
    let mut moves: Vec<i64> = series.iter().filter_map(|s| momentum_bps(s, from_slot)).collect();
    if moves.is_empty() {
        return 0;
    }
    moves.sort_unstable();
    let mid = moves.len() / 2;
    if moves.len() % 2 == 1 {
        moves[mid]
    } else {
        ((moves[mid - 1] as i128 + moves[mid] as i128) / 2) as i64
    }
}

/// Integer square root (floor), Newton's method from above.
fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut x = n / 2 + 1;
    loop {
        let y = (x + n / x) / 2;
        if y >= x {
            return x;
        }
        x = y;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
