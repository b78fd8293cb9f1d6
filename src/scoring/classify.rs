//! Signal type classification.
//!
//! An ordered rule list over volatility, volume and liquidity. The first
//! matching rule wins; when nothing matches the signal is trend-following
//! (`MOMENTUM`).

use crate::scoring::ScoringConfig;
use crate::types::SignalType;

/// Market conditions the classifier looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conditions {
    pub volatility_1h: u64,
    pub volume_24h: u64,
    pub liquidity_depth: u64,
}

struct Rule {
    signal_type: SignalType,
    matches: fn(&Conditions, &ScoringConfig) -> bool,
}

fn high_volatility(c: &Conditions, cfg: &ScoringConfig) -> bool {
    c.volatility_1h >= cfg.high_volatility_threshold
}

fn thin_liquidity(c: &Conditions, cfg: &ScoringConfig) -> bool {
    c.liquidity_depth < cfg.low_liquidity_threshold
}

fn breakout(c: &Conditions, cfg: &ScoringConfig) -> bool {
    c.volume_24h >= cfg.breakout_volume_threshold && c.volatility_1h >= cfg.breakout_min_volatility
}

/// Elevated volatility on thin volume: an overextended move.
fn overextended(c: &Conditions, cfg: &ScoringConfig) -> bool {
    c.volatility_1h >= cfg.mean_reversion_min_volatility
        && c.volume_24h < cfg.mean_reversion_max_volume
}

/// Most specific first.
const RULES: &[Rule] = &[
    Rule { signal_type: SignalType::Volatility, matches: high_volatility },
    Rule { signal_type: SignalType::Liquidity, matches: thin_liquidity },
    Rule { signal_type: SignalType::Breakout, matches: breakout },
    Rule { signal_type: SignalType::MeanReversion, matches: overextended },
];

pub fn classify(conditions: &Conditions, config: &ScoringConfig) -> SignalType {
    RULES
        .iter()
        .find(|rule| (rule.matches)(conditions, config))
        .map_or(SignalType::Momentum, |rule| rule.signal_type)
}
