//! Confidence scoring with hard gates.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

use crate::scoring::ScoringConfig;

/// Whether a context is thick enough to be granted any confidence at all.
pub fn passes_gates(source_count: u8, liquidity_depth: u64, config: &ScoringConfig) -> bool {
    source_count >= config.min_sources_for_confidence
        && liquidity_depth >= config.min_liquidity_depth
}

/// Confidence in [0, 100].
///
/// Zero whenever either gate fails. Otherwise the mean of the source and
/// liquidity coverage ratios, damped by `h / (h + volatility)` where `h` is
/// the configured half point, and halved when volatility could not be
/// measured.
pub fn compute(
    source_count: u8,
    liquidity_depth: u64,
    volatility_1h: u64,
    volatility_degraded: bool,
    config: &ScoringConfig,
) -> u8 {
    if !passes_gates(source_count, liquidity_depth, config) {
        return 0;
    }

    let sources = coverage(
        u64::from(source_count),
        u64::from(config.confidence_full_sources),
    );
    let liquidity = coverage(liquidity_depth, config.confidence_full_liquidity);

    let half = Decimal::from(config.confidence_volatility_half_point);
    let denominator = half + Decimal::from(volatility_1h);
    let damping = if denominator.is_zero() {
        Decimal::ONE
    } else {
        half / denominator
    };

    let mut score = ((sources + liquidity) / dec!(2) * damping * dec!(100)).floor();
    if volatility_degraded {
        score = (score / dec!(2)).floor();
    }
    score.clamp(Decimal::ZERO, dec!(100)).to_u8().unwrap_or(0)
}

/// `min(value, full) / full`, or 1 when `full` is zero.
fn coverage(value: u64, full: u64) -> Decimal {
    if full == 0 {
        return Decimal::ONE;
    }
    Decimal::from(value.min(full)) / Decimal::from(full)
}
