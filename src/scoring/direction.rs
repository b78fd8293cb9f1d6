//! Direction from price momentum.

use crate::scoring::ScoringConfig;
use crate::types::{Direction, SignalType};

/// Direction for a signal of `signal_type` given the measured momentum.
///
/// Momentum inside the epsilon band, or volume too low to confirm the move,
/// is neutral for every type. Trend-following types follow the sign,
/// counter-trend types invert it, and regime types carry no direction.
pub fn compute(
    momentum_bps: i64,
    volume_24h: u64,
    signal_type: SignalType,
    config: &ScoringConfig,
) -> Direction {
    if momentum_bps.unsigned_abs() < config.momentum_epsilon_bps {
        return Direction::Neutral;
    }
    if volume_24h < config.min_confirmation_volume {
        return Direction::Neutral;
    }

    let trend = if momentum_bps > 0 {
        Direction::Long
    } else {
        Direction::Short
    };

    if signal_type.is_trend_following() {
        trend
    } else if signal_type.is_counter_trend() {
        trend.inverted()
    } else {
        Direction::Neutral
    }
}
