//! Attestation binding.
//!
//! Ties a finalized `MarketContext` and `SignalAssessment` to the enclave that
//! produced them. The binding hash is SHA-256 over the canonical record bytes;
//! the enclave is asked for evidence with that hash as report data, so the
//! attestation document commits to this exact payload and nothing else.

pub mod software;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::types::{binding_payload, AttestationError, MarketContext, SignalAssessment, TeeReceipt};

// ---------------------------------------------------------------------------
// TEE collaborator
// ---------------------------------------------------------------------------

/// Identity material returned by the enclave for one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclaveEvidence {
    pub signer: [u8; 32],
    pub measurement: [u8; 32],
    pub platform_version: u32,
    /// Raw attestation document, opaque to the binder.
    pub document: Vec<u8>,
}

/// Fields recovered from a document that verified against the platform root
/// of trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedReport {
    pub measurement: [u8; 32],
    pub report_data: [u8; 32],
    pub platform_version: u32,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TeeIdentityProvider: Send + Sync {
    /// Produce evidence whose document commits to `report_data`.
    async fn evidence(&self, report_data: [u8; 32]) -> Result<EnclaveEvidence>;

    /// Verify a raw document against the platform root of trust.
    fn verify_document(&self, document: &[u8]) -> Result<VerifiedReport>;
}

// ---------------------------------------------------------------------------
// Binder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AttestationConfig {
    /// Hex-encoded enclave measurements allowed to produce signals.
    pub trusted_measurements: Vec<String>,
    /// How far the capture slot may run ahead of the context slot.
    #[serde(default = "default_max_slot_skew")]
    pub max_slot_skew: u64,
}

fn default_max_slot_skew() -> u64 {
    10
}

pub struct AttestationBinder {
    trusted: BTreeSet<[u8; 32]>,
    max_slot_skew: u64,
}

impl AttestationBinder {
    pub fn new(trusted: impl IntoIterator<Item = [u8; 32]>, max_slot_skew: u64) -> Self {
        Self {
            trusted: trusted.into_iter().collect(),
            max_slot_skew,
        }
    }

    pub fn from_config(config: &AttestationConfig) -> Result<Self> {
        if config.trusted_measurements.is_empty() {
            anyhow::bail!("attestation.trusted_measurements must not be empty");
        }
        let trusted = config
            .trusted_measurements
            .iter()
            .map(|m| decode_hex32(m).with_context(|| format!("Invalid trusted measurement {m}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(trusted, config.max_slot_skew))
    }

    pub fn max_slot_skew(&self) -> u64 {
        self.max_slot_skew
    }

    /// Check the evidence and produce a receipt.
    ///
    /// `capture_slot` is the ledger slot read after the evidence was
    /// obtained. Checks run in a fixed order: trusted measurement, document
    /// verification, then slot skew.
    pub fn bind(
        &self,
        context: &MarketContext,
        assessment: &SignalAssessment,
        evidence: &EnclaveEvidence,
        capture_slot: u64,
        verifier: &dyn TeeIdentityProvider,
    ) -> Result<TeeReceipt, AttestationError> {
        let hash = attestation_hash(context, assessment);

        if !self.trusted.contains(&evidence.measurement) {
            return Err(AttestationError::UnverifiedEnclave {
                measurement: hex::encode(evidence.measurement),
            });
        }

        let report = verifier
            .verify_document(&evidence.document)
            .map_err(|e| AttestationError::AttestationVerificationFailed(format!("{e:#}")))?;

        if report.measurement != evidence.measurement {
            return Err(AttestationError::AttestationVerificationFailed(
                "document measurement differs from reported measurement".into(),
            ));
        }
        if report.report_data != hash {
            return Err(AttestationError::AttestationVerificationFailed(
                "document does not commit to this payload".into(),
            ));
        }
        if report.platform_version != evidence.platform_version {
            return Err(AttestationError::AttestationVerificationFailed(format!(
                "document platform version {} differs from reported {}",
                report.platform_version, evidence.platform_version
            )));
        }

        let skew_ok = capture_slot
            .checked_sub(context.slot)
            .is_some_and(|skew| skew <= self.max_slot_skew);
        if !skew_ok {
            warn!(
                capture_slot,
                context_slot = context.slot,
                max_skew = self.max_slot_skew,
                "Attestation captured outside the allowed slot skew"
            );
            return Err(AttestationError::StaleAttestation {
                capture_slot,
                context_slot: context.slot,
                max_skew: self.max_slot_skew,
            });
        }

        debug!(
            hash = %hex::encode(hash),
            mr_enclave = %hex::encode(evidence.measurement),
            capture_slot,
            "Attestation bound"
        );

        Ok(TeeReceipt {
            enclave_signer: evidence.signer,
            attestation_hash: hash,
            mr_enclave: evidence.measurement,
            timestamp_slot: capture_slot,
            platform_version: evidence.platform_version,
        })
    }
}

/// SHA-256 over `MarketContext ‖ SignalAssessment` in canonical form.
pub fn attestation_hash(context: &MarketContext, assessment: &SignalAssessment) -> [u8; 32] {
    Sha256::digest(binding_payload(context, assessment)).into()
}

/// Recompute the binding hash and compare it with the receipt.
pub fn verify_receipt(
    context: &MarketContext,
    assessment: &SignalAssessment,
    receipt: &TeeReceipt,
) -> bool {
    attestation_hash(context, assessment) == receipt.attestation_hash
}

pub(crate) fn decode_hex32(s: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(s.trim()).context("not valid hex")?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("expected 32 bytes, got {}", b.len()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
