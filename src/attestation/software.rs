//! Software enclave for development and tests.
//!
//! Produces documents of the form
//! `measurement ‖ report_data ‖ platform_version (le) ‖ HMAC-SHA256(root_key, ..)`
//! where the MAC covers everything before it. The root key stands in for the
//! platform root of trust. None of this is hardware-backed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use tracing::warn;

use super::{decode_hex32, EnclaveEvidence, TeeIdentityProvider, VerifiedReport};

type HmacSha256 = Hmac<Sha256>;

const BODY_LEN: usize = 32 + 32 + 4;
const DOCUMENT_LEN: usize = BODY_LEN + 32;

#[derive(Debug, Clone, Deserialize)]
pub struct EnclaveConfig {
    /// Hex-encoded signer public key.
    pub signer: String,
    /// Hex-encoded code measurement.
    pub measurement: String,
    #[serde(default = "default_platform_version")]
    pub platform_version: u32,
    /// Name of the environment variable holding the hex root key.
    #[serde(default = "default_root_key_env")]
    pub root_key_env: String,
}

fn default_platform_version() -> u32 {
    1
}

fn default_root_key_env() -> String {
    "SSO1_ENCLAVE_ROOT_KEY".into()
}

pub struct SoftwareEnclave {
    signer: [u8; 32],
    measurement: [u8; 32],
    platform_version: u32,
    root_key: Secret<[u8; 32]>,
}

impl SoftwareEnclave {
    pub fn new(signer: [u8; 32], measurement: [u8; 32], platform_version: u32, root_key: [u8; 32]) -> Self {
        warn!(
            measurement = %hex::encode(measurement),
            "Software enclave in use: attestation is NOT hardware-backed"
        );
        Self {
            signer,
            measurement,
            platform_version,
            root_key: Secret::new(root_key),
        }
    }

    /// Build from config, reading the root key from the named env var.
    pub fn from_config(config: &EnclaveConfig) -> Result<Self> {
        let signer = decode_hex32(&config.signer).context("Invalid enclave.signer")?;
        let measurement = decode_hex32(&config.measurement).context("Invalid enclave.measurement")?;
        let raw: SecretString = std::env::var(&config.root_key_env)
            .map(SecretString::new)
            .with_context(|| format!("Missing env var: {}", config.root_key_env))?;
        let root_key = decode_hex32(raw.expose_secret())
            .with_context(|| format!("Invalid root key in {}", config.root_key_env))?;
        Ok(Self::new(signer, measurement, config.platform_version, root_key))
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(self.root_key.expose_secret())
            .map_err(|e| anyhow::anyhow!("HMAC key error: {e}"))
    }
}

#[async_trait]
impl TeeIdentityProvider for SoftwareEnclave {
    async fn evidence(&self, report_data: [u8; 32]) -> Result<EnclaveEvidence> {
        let mut document = Vec::with_capacity(DOCUMENT_LEN);
        document.extend_from_slice(&self.measurement);
        document.extend_from_slice(&report_data);
        document.extend_from_slice(&self.platform_version.to_le_bytes());

        let mut mac = self.mac()?;
        mac.update(&document);
        document.extend_from_slice(&mac.finalize().into_bytes());

        Ok(EnclaveEvidence {
            signer: self.signer,
            measurement: self.measurement,
            platform_version: self.platform_version,
            document,
        })
    }

    fn verify_document(&self, document: &[u8]) -> Result<VerifiedReport> {
        if document.len() != DOCUMENT_LEN {
            anyhow::bail!(
                "document length {} (expected {DOCUMENT_LEN})",
                document.len()
            );
        }
        let (body, tag) = document.split_at(BODY_LEN);

        let mut mac = self.mac()?;
        mac.update(body);
        mac.verify_slice(tag)
            .map_err(|_| anyhow::anyhow!("document MAC does not verify"))?;

        let (measurement, rest) = body.split_at(32);
        let (report_data, version) = rest.split_at(32);
        Ok(VerifiedReport {
            measurement: measurement.try_into()?,
            report_data: report_data.try_into()?,
            platform_version: u32::from_le_bytes(version.try_into()?),
        })
    }
}
