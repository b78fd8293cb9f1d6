//! Scoring engine: `MarketSnapshot` → `SignalAssessment`.
//!
//! A pure, deterministic function of the snapshot, the configuration and
//! the model version. The engine never sees raw observations and keeps no
//! state between invocations; each sub-computation lives in its own module
//! and takes plain numbers so it can be tested on its own.

pub mod classify;
pub mod confidence;
pub mod direction;
pub mod magnitude;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::types::{
    Direction, MarketSnapshot, ModelVersion, ScoringError, SignalAssessment, SignalType,
};
use classify::Conditions;

// ---------------------------------------------------------------------------
// Configuration (defaults, overridden by config.toml at runtime)
// ---------------------------------------------------------------------------

/// Scoring parameters. Loaded once at startup and shared read-only.
///
/// Volatility figures use the 1e6 scale of `MarketContext::volatility_1h`;
/// volume and liquidity figures are quote units.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Confidence is zero below this many sources.
    pub min_sources_for_confidence: u8,
    /// Confidence is zero below this liquidity depth.
    pub min_liquidity_depth: u64,
    pub magnitude_scale_factor: Decimal,
    /// Used when the caller does not request a validity window.
    pub default_validity_slots: u64,
    /// Hard cap on the validity window.
    pub max_validity_slots: u64,

    // Classification
    pub high_volatility_threshold: u64,
    pub low_liquidity_threshold: u64,
    pub breakout_volume_threshold: u64,
    pub breakout_min_volatility: u64,
    pub mean_reversion_min_volatility: u64,
    pub mean_reversion_max_volume: u64,

    // Direction
    /// Momentum below this (absolute, bps) is neutral.
    pub momentum_epsilon_bps: u64,
    /// Volume below this cannot confirm a move.
    pub min_confirmation_volume: u64,

    // Magnitude
    /// Number of volatility units that maps to magnitude 100.
    pub full_scale_sigma: Decimal,

    // Confidence
    pub confidence_full_sources: u8,
    pub confidence_full_liquidity: u64,
    /// Volatility at which confidence is halved.
    pub confidence_volatility_half_point: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_sources_for_confidence: 3,
            min_liquidity_depth: 100_000,
            magnitude_scale_factor: dec!(1.0),
            default_validity_slots: 25,
            max_validity_slots: 100,
            high_volatility_threshold: 50_000,
            low_liquidity_threshold: 75_000,
            breakout_volume_threshold: 5_000_000,
            breakout_min_volatility: 20_000,
            mean_reversion_min_volatility: 20_000,
            mean_reversion_max_volume: 250_000,
            momentum_epsilon_bps: 5,
            min_confirmation_volume: 10_000,
            full_scale_sigma: dec!(4),
            confidence_full_sources: 8,
            confidence_full_liquidity: 1_000_000,
            confidence_volatility_half_point: 50_000,
        }
    }
}

impl ScoringConfig {
    /// Reject configurations that could produce an invalid assessment.
    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.max_validity_slots == 0 {
            return Err(ScoringError::Config("max_validity_slots must be > 0".into()));
        }
        if self.default_validity_slots == 0 || self.default_validity_slots > self.max_validity_slots
        {
            return Err(ScoringError::Config(format!(
                "default_validity_slots ({}) must be in 1..={}",
                self.default_validity_slots, self.max_validity_slots
            )));
        }
        if self.magnitude_scale_factor < Decimal::ZERO {
            return Err(ScoringError::Config(
                "magnitude_scale_factor must not be negative".into(),
            ));
        }
        if self.full_scale_sigma <= Decimal::ZERO {
            return Err(ScoringError::Config("full_scale_sigma must be > 0".into()));
        }
        if self.confidence_full_sources == 0 || self.confidence_full_liquidity == 0 {
            return Err(ScoringError::Config(
                "confidence_full_sources and confidence_full_liquidity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// The swappable part of scoring: how strong and how trustworthy a signal
/// is. Classification, direction and the validity window stay fixed.
pub trait SignalModel: Send + Sync {
    fn name(&self) -> &str;

    fn magnitude(&self, snapshot: &MarketSnapshot, direction: Direction, config: &ScoringConfig)
        -> u8;

    fn confidence(&self, snapshot: &MarketSnapshot, config: &ScoringConfig) -> u8;
}

/// Volatility-normalized magnitude and gated coverage confidence.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSignalModel;

impl SignalModel for DefaultSignalModel {
    fn name(&self) -> &str {
        "default"
    }

    fn magnitude(
        &self,
        snapshot: &MarketSnapshot,
        direction: Direction,
        config: &ScoringConfig,
    ) -> u8 {
        magnitude::compute(
            snapshot.momentum_bps,
            snapshot.context.volatility_1h,
            direction,
            config,
        )
    }

    fn confidence(&self, snapshot: &MarketSnapshot, config: &ScoringConfig) -> u8 {
        let ctx = &snapshot.context;
        confidence::compute(
            ctx.source_count,
            ctx.liquidity_depth,
            ctx.volatility_1h,
            snapshot.volatility_degraded,
            config,
        )
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ScoringEngine {
    config: Arc<ScoringConfig>,
    model: Arc<dyn SignalModel>,
}

impl ScoringEngine {
    pub fn new(config: Arc<ScoringConfig>) -> Self {
        Self::with_model(config, Arc::new(DefaultSignalModel))
    }

    pub fn with_model(config: Arc<ScoringConfig>, model: Arc<dyn SignalModel>) -> Self {
        Self { config, model }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Score a snapshot.
    ///
    /// `requested_validity` of `None` uses `default_validity_slots`; any
    /// request is capped at `max_validity_slots`. Model output is clamped to
    /// [0, 100] and the confidence gates are applied again afterwards, so no
    /// model can grant confidence to a context that fails them.
    pub fn score(
        &self,
        snapshot: &MarketSnapshot,
        model_version: ModelVersion,
        requested_validity: Option<i64>,
    ) -> Result<SignalAssessment, ScoringError> {
        let config = self.config.as_ref();
        let ctx = &snapshot.context;

        let (valid_from_slot, valid_until_slot) =
            validity_window(ctx.slot, requested_validity, config)?;

        let signal_type = classify::classify(
            &Conditions {
                volatility_1h: ctx.volatility_1h,
                volume_24h: ctx.volume_24h,
                liquidity_depth: ctx.liquidity_depth,
            },
            config,
        );
        let direction =
            direction::compute(snapshot.momentum_bps, ctx.volume_24h, signal_type, config);

        let magnitude = self.model.magnitude(snapshot, direction, config).min(100);
        let confidence =
            if confidence::passes_gates(ctx.source_count, ctx.liquidity_depth, config) {
                self.model.confidence(snapshot, config).min(100)
            } else {
                0
            };

        debug!(
            model = self.model.name(),
            %signal_type,
            %direction,
            magnitude,
            confidence,
            valid_from_slot,
            valid_until_slot,
            "Snapshot scored"
        );

        Ok(SignalAssessment {
            signal_type,
            direction,
            magnitude,
            confidence,
            valid_from_slot,
            valid_until_slot,
            model_version,
        })
    }
}

/// `[current_slot, current_slot + min(requested, max)]`.
pub fn validity_window(
    current_slot: u64,
    requested: Option<i64>,
    config: &ScoringConfig,
) -> Result<(u64, u64), ScoringError> {
    let requested = match requested {
        None => config.default_validity_slots,
        Some(slots) if slots <= 0 => return Err(ScoringError::InvalidValidityWindow(slots)),
        Some(slots) => slots as u64,
    };
    let length = requested.min(config.max_validity_slots);
    let until = current_slot
        .checked_add(length)
        .ok_or_else(|| ScoringError::Config(format!("validity window overflows at slot {current_slot}")))?;
    Ok((current_slot, until))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
