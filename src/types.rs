//! Shared types for the SSO-1 function.
//!
//! These types form the data model used across all modules: the objective
//! `MarketContext`, the subjective `SignalAssessment`, the `TeeReceipt`, and
//! the tagged enums and error taxonomy every stage agrees on. The canonical
//! little-endian encoding defined here is what gets hashed, attested, and
//! submitted on-chain, so it must stay byte-stable.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-point scale of `MarketContext::price`.
pub const PRICE_SCALE: u64 = 1_000_000_000;

/// Fixed-point scale of `MarketContext::volatility_1h`.
pub const VOLATILITY_SCALE: u64 = 1_000_000;

/// Number of source ids representable in the `u32` source bitmap.
pub const MAX_SOURCES: u8 = 32;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// 32-byte normalized asset pair identifier (e.g. `SOL/USDC`, zero padded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetPair([u8; 32]);

impl AssetPair {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Human-readable symbol with the zero padding stripped.
    pub fn symbol(&self) -> String {
        let end = self.0.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Parse and normalize a pair symbol: trimmed, upper-cased, zero padded.
/// Symbols longer than 32 bytes are rejected rather than truncated, since
/// truncation could alias two distinct pairs.
impl std::str::FromStr for AssetPair {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        if normalized.is_empty() {
            anyhow::bail!("Asset pair symbol is empty");
        }
        let raw = normalized.as_bytes();
        if raw.len() > 32 {
            anyhow::bail!("Asset pair symbol exceeds 32 bytes: {normalized}");
        }
        let mut bytes = [0u8; 32];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self(bytes))
    }
}

/// 8-byte identifier of the scoring model that produced an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelVersion([u8; 8]);

impl ModelVersion {
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Parse up to 16 hex digits, right-padded with `0` (`"00000001"` becomes
/// `0000000100000000`).
impl std::str::FromStr for ModelVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        if digits.is_empty() || digits.len() > 16 {
            anyhow::bail!("Model version must be 1-16 hex digits, got {digits:?}");
        }
        let padded = format!("{digits:0<16}");
        let decoded = hex::decode(&padded)
            .map_err(|e| anyhow::anyhow!("Invalid model version {digits:?}: {e}"))?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Signal type tag. Tags 9-255 are reserved and never decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SignalType {
    /// Trend continuation.
    Momentum = 0,
    /// Counter-trend.
    MeanReversion = 1,
    /// Volatility regime.
    Volatility = 2,
    /// Liquidity conditions.
    Liquidity = 3,
    /// Range or level breakout.
    Breakout = 4,
    Risk = 5,
    Correlation = 6,
    Arbitrage = 7,
    Sentiment = 8,
}

impl SignalType {
    pub const ALL: &'static [SignalType] = &[
        SignalType::Momentum,
        SignalType::MeanReversion,
        SignalType::Volatility,
        SignalType::Liquidity,
        SignalType::Breakout,
        SignalType::Risk,
        SignalType::Correlation,
        SignalType::Arbitrage,
        SignalType::Sentiment,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Types whose direction follows the momentum sign.
    pub fn is_trend_following(self) -> bool {
        matches!(self, SignalType::Momentum | SignalType::Breakout)
    }

    /// Types whose direction inverts the momentum sign.
    pub fn is_counter_trend(self) -> bool {
        matches!(self, SignalType::MeanReversion)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalType::Momentum => "MOMENTUM",
            SignalType::MeanReversion => "MEAN_REVERSION",
            SignalType::Volatility => "VOLATILITY",
            SignalType::Liquidity => "LIQUIDITY",
            SignalType::Breakout => "BREAKOUT",
            SignalType::Risk => "RISK",
            SignalType::Correlation => "CORRELATION",
            SignalType::Arbitrage => "ARBITRAGE",
            SignalType::Sentiment => "SENTIMENT",
        };
        write!(f, "{name}")
    }
}

/// Signal direction tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    Neutral = 0,
    Long = 1,
    Short = 2,
}

impl Direction {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Direction::Neutral),
            1 => Some(Direction::Long),
            2 => Some(Direction::Short),
            _ => None,
        }
    }

    /// The opposite direction. Neutral stays neutral.
    pub fn inverted(self) -> Self {
        match self {
            Direction::Neutral => Direction::Neutral,
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Neutral => write!(f, "NEUTRAL"),
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw observations
// ---------------------------------------------------------------------------

/// One quote reported by one data source. Only the context builder ever
/// sees these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceObservation {
    pub source_id: u8,
    /// Price scaled by `PRICE_SCALE`.
    pub price: u64,
    /// 24h volume in quote units.
    pub volume_24h: u64,
    /// Depth within the liquidity band, quote units.
    pub liquidity: u64,
    pub observation_slot: u64,
}

// ---------------------------------------------------------------------------
// Market context (objective)
// ---------------------------------------------------------------------------

/// Objective market state at a specific slot. Holds observable data only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketContext {
    pub slot: u64,
    pub asset_pair: AssetPair,
    /// Aggregated price scaled by `PRICE_SCALE`.
    pub price: u64,
    pub volume_24h: u64,
    /// 1-hour realized volatility scaled by `VOLATILITY_SCALE`.
    pub volatility_1h: u64,
    pub liquidity_depth: u64,
    pub source_bitmap: u32,
    pub source_count: u8,
}

impl fmt::Display for MarketContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} @ slot {}] price={}.{:09} vol24h={} vol1h={} depth={} sources={} ({:#010x})",
            self.asset_pair,
            self.slot,
            self.price / PRICE_SCALE,
            self.price % PRICE_SCALE,
            self.volume_24h,
            self.volatility_1h,
            self.liquidity_depth,
            self.source_count,
            self.source_bitmap,
        )
    }
}

impl MarketContext {
    pub const ENCODED_LEN: usize = 77;

    /// `source_count` must equal the number of bits set in `source_bitmap`.
    pub fn is_consistent(&self) -> bool {
        self.source_bitmap.count_ones() == u32::from(self.source_count)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.slot.to_le_bytes());
        out.extend_from_slice(self.asset_pair.as_bytes());
        out.extend_from_slice(&self.price.to_le_bytes());
        out.extend_from_slice(&self.volume_24h.to_le_bytes());
        out.extend_from_slice(&self.volatility_1h.to_le_bytes());
        out.extend_from_slice(&self.liquidity_depth.to_le_bytes());
        out.extend_from_slice(&self.source_bitmap.to_le_bytes());
        out.push(self.source_count);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        self.encode(&mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes, Self::ENCODED_LEN)?;
        let ctx = Self {
            slot: r.u64(),
            asset_pair: AssetPair::from_bytes(r.array()),
            price: r.u64(),
            volume_24h: r.u64(),
            volatility_1h: r.u64(),
            liquidity_depth: r.u64(),
            source_bitmap: r.u32(),
            source_count: r.u8(),
        };
        if !ctx.is_consistent() {
            return Err(DecodeError::SourceCountMismatch {
                bitmap: ctx.source_bitmap,
                count: ctx.source_count,
            });
        }
        Ok(ctx)
    }
}

/// What the context builder hands to the scoring engine: the on-chain
/// context plus objective figures derived from the same observations that
/// are not part of the on-chain record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub context: MarketContext,
    /// Price change across the momentum lookback, in basis points.
    pub momentum_bps: i64,
    /// Set when fewer than two distinct observation slots were available,
    /// so `volatility_1h` is a placeholder zero.
    pub volatility_degraded: bool,
}

// ---------------------------------------------------------------------------
// Signal assessment (subjective)
// ---------------------------------------------------------------------------

/// Subjective interpretation derived from a `MarketSnapshot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalAssessment {
    pub signal_type: SignalType,
    pub direction: Direction,
    /// 0-100
    pub magnitude: u8,
    /// 0-100
    pub confidence: u8,
    pub valid_from_slot: u64,
    pub valid_until_slot: u64,
    pub model_version: ModelVersion,
}

impl fmt::Display for SignalAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} mag={} conf={} valid=[{}, {}] model={}",
            self.signal_type,
            self.direction,
            self.magnitude,
            self.confidence,
            self.valid_from_slot,
            self.valid_until_slot,
            self.model_version,
        )
    }
}

impl SignalAssessment {
    pub const ENCODED_LEN: usize = 28;

    /// Length of the validity window in slots.
    pub fn window_len(&self) -> u64 {
        self.valid_until_slot.saturating_sub(self.valid_from_slot)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.signal_type.tag());
        out.push(self.direction.tag());
        out.push(self.magnitude);
        out.push(self.confidence);
        out.extend_from_slice(&self.valid_from_slot.to_le_bytes());
        out.extend_from_slice(&self.valid_until_slot.to_le_bytes());
        out.extend_from_slice(self.model_version.as_bytes());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        self.encode(&mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes, Self::ENCODED_LEN)?;
        let type_tag = r.u8();
        let signal_type =
            SignalType::from_tag(type_tag).ok_or(DecodeError::UnknownSignalType(type_tag))?;
        let direction_tag = r.u8();
        let direction =
            Direction::from_tag(direction_tag).ok_or(DecodeError::UnknownDirection(direction_tag))?;
        Ok(Self {
            signal_type,
            direction,
            magnitude: r.u8(),
            confidence: r.u8(),
            valid_from_slot: r.u64(),
            valid_until_slot: r.u64(),
            model_version: ModelVersion::from_bytes(r.array()),
        })
    }
}

/// Canonical bytes the attestation hash is computed over:
/// `MarketContext ‖ SignalAssessment`.
pub fn binding_payload(context: &MarketContext, assessment: &SignalAssessment) -> Vec<u8> {
    let mut out = Vec::with_capacity(MarketContext::ENCODED_LEN + SignalAssessment::ENCODED_LEN);
    context.encode(&mut out);
    assessment.encode(&mut out);
    out
}

// ---------------------------------------------------------------------------
// TEE receipt
// ---------------------------------------------------------------------------

/// Attestation evidence binding a context and assessment to the enclave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeeReceipt {
    pub enclave_signer: [u8; 32],
    /// SHA-256 over `binding_payload`.
    pub attestation_hash: [u8; 32],
    pub mr_enclave: [u8; 32],
    pub timestamp_slot: u64,
    pub platform_version: u32,
}

impl fmt::Display for TeeReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hash={} mr_enclave={} slot={} platform=v{}",
            hex::encode(self.attestation_hash),
            hex::encode(self.mr_enclave),
            self.timestamp_slot,
            self.platform_version,
        )
    }
}

impl TeeReceipt {
    pub const ENCODED_LEN: usize = 108;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.enclave_signer);
        out.extend_from_slice(&self.attestation_hash);
        out.extend_from_slice(&self.mr_enclave);
        out.extend_from_slice(&self.timestamp_slot.to_le_bytes());
        out.extend_from_slice(&self.platform_version.to_le_bytes());
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes, Self::ENCODED_LEN)?;
        Ok(Self {
            enclave_signer: r.array(),
            attestation_hash: r.array(),
            mr_enclave: r.array(),
            timestamp_slot: r.u64(),
            platform_version: r.u32(),
        })
    }
}

// ---------------------------------------------------------------------------
// Function result
// ---------------------------------------------------------------------------

/// Complete function output handed to the submission channel.
///
/// Fields are private: a result is only assembled by the pipeline after the
/// receipt has been validated, and is read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionResult {
    market_context: MarketContext,
    signal_assessment: SignalAssessment,
    tee_receipt: TeeReceipt,
}

impl FunctionResult {
    pub const ENCODED_LEN: usize =
        MarketContext::ENCODED_LEN + SignalAssessment::ENCODED_LEN + TeeReceipt::ENCODED_LEN;

    pub(crate) fn assemble(
        market_context: MarketContext,
        signal_assessment: SignalAssessment,
        tee_receipt: TeeReceipt,
    ) -> Self {
        Self {
            market_context,
            signal_assessment,
            tee_receipt,
        }
    }

    pub fn market_context(&self) -> &MarketContext {
        &self.market_context
    }

    pub fn signal_assessment(&self) -> &SignalAssessment {
        &self.signal_assessment
    }

    pub fn tee_receipt(&self) -> &TeeReceipt {
        &self.tee_receipt
    }

    /// The on-chain record: context ‖ assessment ‖ receipt, little-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        self.market_context.encode(&mut out);
        self.signal_assessment.encode(&mut out);
        self.tee_receipt.encode(&mut out);
        out
    }

    /// Decode an on-chain record. Does not re-verify the attestation; use
    /// `attestation::verify_receipt` for that.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(DecodeError::Length {
                expected: Self::ENCODED_LEN,
                actual: bytes.len(),
            });
        }
        let (ctx, rest) = bytes.split_at(MarketContext::ENCODED_LEN);
        let (asmt, receipt) = rest.split_at(SignalAssessment::ENCODED_LEN);
        Ok(Self {
            market_context: MarketContext::from_bytes(ctx)?,
            signal_assessment: SignalAssessment::from_bytes(asmt)?,
            tee_receipt: TeeReceipt::from_bytes(receipt)?,
        })
    }
}

/// Little-endian cursor over a buffer whose length was checked up front.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], expected: usize) -> Result<Self, DecodeError> {
        if bytes.len() != expected {
            return Err(DecodeError::Length {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self { bytes, pos: 0 })
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        let [b] = self.array::<1>();
        b
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.array())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.array())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure to decode a canonical record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid record length: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("Unknown signal type tag: {0}")]
    UnknownSignalType(u8),

    #[error("Unknown direction tag: {0}")]
    UnknownDirection(u8),

    #[error("Source count {count} does not match bitmap {bitmap:#010x}")]
    SourceCountMismatch { bitmap: u32, count: u8 },
}

/// Market data could not be acquired. Retryable by re-running the whole
/// invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataAcquisitionError {
    #[error("Insufficient sources: need {required}, have {available}")]
    InsufficientSources { required: u8, available: u8 },

    #[error("Stale data: every observation is older than {max_staleness_slots} slots")]
    StaleData { max_staleness_slots: u64 },

    #[error("Source {source_id} timed out")]
    SourceTimeout { source_id: u8 },

    #[error("Current slot unavailable: {0}")]
    SlotUnavailable(String),
}

/// The scoring stage refused to produce an assessment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoringError {
    #[error("Invalid validity window: requested {0} slots")]
    InvalidValidityWindow(i64),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Attestation failures. Security-critical: never downgraded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttestationError {
    #[error("Unverified enclave: measurement {measurement} is not trusted")]
    UnverifiedEnclave { measurement: String },

    #[error("Attestation verification failed: {0}")]
    AttestationVerificationFailed(String),

    #[error("Stale attestation: captured at slot {capture_slot}, context slot {context_slot}, max skew {max_skew}")]
    StaleAttestation {
        capture_slot: u64,
        context_slot: u64,
        max_skew: u64,
    },

    #[error("Enclave evidence unavailable: {0}")]
    EvidenceUnavailable(String),
}

/// Top-level failure of one pipeline invocation. Every variant aborts the
/// invocation before anything is submitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("Data acquisition failed: {0}")]
    DataAcquisition(#[from] DataAcquisitionError),

    #[error("Scoring failed: {0}")]
    Scoring(#[from] ScoringError),

    #[error("Attestation failed: {0}")]
    Attestation(#[from] AttestationError),

    #[error("Pipeline deadline of {deadline_ms}ms expired")]
    Timeout { deadline_ms: u64 },

    #[error("Submission failed: {0}")]
    Submission(String),
}

impl PipelineError {
    /// Only data acquisition failures may be retried, and only by running
    /// the whole pipeline again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::DataAcquisition(_))
    }

    /// Stable tag for the caller.
    pub fn reason(&self) -> &'static str {
        match self {
            PipelineError::DataAcquisition(e) => match e {
                DataAcquisitionError::InsufficientSources { .. } => "insufficient_sources",
                DataAcquisitionError::StaleData { .. } => "stale_data",
                DataAcquisitionError::SourceTimeout { .. } => "source_timeout",
                DataAcquisitionError::SlotUnavailable(_) => "slot_unavailable",
            },
            PipelineError::Scoring(e) => match e {
                ScoringError::InvalidValidityWindow(_) => "invalid_validity_window",
                ScoringError::Config(_) => "scoring_config",
            },
            PipelineError::Attestation(e) => match e {
                AttestationError::UnverifiedEnclave { .. } => "unverified_enclave",
                AttestationError::AttestationVerificationFailed(_) => {
                    "attestation_verification_failed"
                }
                AttestationError::StaleAttestation { .. } => "stale_attestation",
                AttestationError::EvidenceUnavailable(_) => "evidence_unavailable",
            },
            PipelineError::Timeout { .. } => "timeout",
            PipelineError::Submission(_) => "submission_failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
