//! Configuration loading from TOML with environment variable overrides.
//!
//! Reads `config.toml` once at startup and deserializes it into
//! strongly-typed structs. Secrets (the software enclave root key) are
//! referenced by env-var name in the config and resolved at runtime.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;

use crate::attestation::software::EnclaveConfig;
use crate::attestation::AttestationConfig;
use crate::context::AggregationConfig;
use crate::feeds::FanoutConfig;
use crate::scoring::ScoringConfig;
use crate::types::{AssetPair, ModelVersion, MAX_SOURCES};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub function: FunctionConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    pub attestation: AttestationConfig,
    pub enclave: EnclaveConfig,
    pub slot_rpc: SlotRpcConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FunctionConfig {
    pub asset_pair: String,
    #[serde(default = "default_model_version")]
    pub model_version: String,
    /// Requested validity window; falls back to `scoring.default_validity_slots`.
    #[serde(default)]
    pub validity_slots: Option<i64>,
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// Total runs allowed when data acquisition fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlotRpcConfig {
    pub url: String,
    #[serde(default = "default_commitment")]
    pub commitment: String,
    #[serde(default = "default_slot_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Bit position in the source bitmap.
    pub id: u8,
    pub name: String,
    pub url: String,
}

fn default_model_version() -> String {
    "00000001".into()
}

fn default_deadline_ms() -> u64 {
    2_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_commitment() -> String {
    "confirmed".into()
}

fn default_slot_timeout_ms() -> u64 {
    500
}

impl AppConfig {
    /// Load, apply environment overrides, and validate.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// `DEFAULT_ASSET_PAIR`, `DEFAULT_VALIDITY_SLOTS` and `MODEL_VERSION`
    /// take precedence over the file.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(pair) = lookup("DEFAULT_ASSET_PAIR") {
            self.function.asset_pair = pair;
        }
        if let Some(slots) = lookup("DEFAULT_VALIDITY_SLOTS") {
            let slots = slots
                .trim()
                .parse::<i64>()
                .with_context(|| format!("DEFAULT_VALIDITY_SLOTS is not an integer: {slots}"))?;
            self.function.validity_slots = Some(slots);
        }
        if let Some(version) = lookup("MODEL_VERSION") {
            self.function.model_version = version;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.asset_pair()?;
        self.model_version()?;

        if self.function.deadline_ms == 0 {
            anyhow::bail!("function.deadline_ms must be positive");
        }
        if self.function.max_attempts == 0 {
            anyhow::bail!("function.max_attempts must be at least 1");
        }
        if self.fanout.max_concurrent_fetches == 0 {
            anyhow::bail!("fanout.max_concurrent_fetches must be at least 1");
        }
        if self.sources.is_empty() {
            anyhow::bail!("at least one [[sources]] entry is required");
        }

        let mut seen = BTreeSet::new();
        for source in &self.sources {
            if source.id >= MAX_SOURCES {
                anyhow::bail!(
                    "source {} has id {} (must be below {MAX_SOURCES})",
                    source.name,
                    source.id
                );
            }
            if !seen.insert(source.id) {
                anyhow::bail!("duplicate source id {}", source.id);
            }
        }

        self.scoring.validate().context("Invalid [scoring] section")?;
        Ok(())
    }

    pub fn asset_pair(&self) -> Result<AssetPair> {
        self.function.asset_pair.parse().context("Invalid function.asset_pair")
    }

    pub fn model_version(&self) -> Result<ModelVersion> {
        self.function
            .model_version
            .parse()
            .context("Invalid function.model_version")
    }
}
