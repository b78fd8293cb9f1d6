//! Magnitude: size of the move relative to volatility.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

use crate::scoring::ScoringConfig;
use crate::types::Direction;

/// `|momentum|` in bps converted to the volatility scale (1e6).
const BPS_TO_VOL_SCALE: Decimal = dec!(100);

/// Z-score-like ratio `|momentum| / volatility`, mapped so that
/// `full_scale_sigma` standard moves give 100, then scaled by
/// `magnitude_scale_factor` and clamped to [0, 100].
///
/// A neutral direction or an unmeasured (zero) volatility yields 0.
pub fn compute(
    momentum_bps: i64,
    volatility_1h: u64,
    direction: Direction,
    config: &ScoringConfig,
) -> u8 {
    if direction == Direction::Neutral || volatility_1h == 0 {
        return 0;
    }
    if config.full_scale_sigma <= Decimal::ZERO || config.magnitude_scale_factor <= Decimal::ZERO {
        return 0;
    }

    // Overflow means the move dwarfs the configured scale.
    let scaled = Decimal::from(momentum_bps.unsigned_abs())
        .checked_mul(BPS_TO_VOL_SCALE)
        .and_then(|v| v.checked_div(Decimal::from(volatility_1h)))
        .and_then(|z| z.checked_div(config.full_scale_sigma))
        .and_then(|v| v.checked_mul(dec!(100)))
        .and_then(|v| v.checked_mul(config.magnitude_scale_factor));

    match scaled {
        Some(v) => v.floor().clamp(Decimal::ZERO, dec!(100)).to_u8().unwrap_or(100),
        None => 100,
    }
}
