//! Ledger slot source.
//!
//! The pipeline uses the slot as its clock: it stamps the market context,
//! anchors the validity window, and bounds attestation skew.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Returns the current, monotonically increasing ledger slot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SlotProvider: Send + Sync {
    async fn current_slot(&self) -> Result<u64>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<u64>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// JSON-RPC `getSlot` against a ledger node.
pub struct RpcSlotProvider {
    http: Client,
    url: String,
    commitment: String,
}

impl RpcSlotProvider {
    pub fn new(url: &str, commitment: &str, timeout_ms: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .user_agent("sso1-function/0.1.0")
            .build()
            .context("Failed to build slot RPC client")?;
        Ok(Self {
            http,
            url: url.to_string(),
            commitment: commitment.to_string(),
        })
    }

    fn parse_response(resp: RpcResponse) -> Result<u64> {
        if let Some(err) = resp.error {
            anyhow::bail!("getSlot error {}: {}", err.code, err.message);
        }
        resp.result.context("getSlot response has no result")
    }
}

#[async_trait]
impl SlotProvider for RpcSlotProvider {
    async fn current_slot(&self) -> Result<u64> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getSlot",
            "params": [{ "commitment": self.commitment }],
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("getSlot request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("getSlot HTTP error: {status}");
        }

        let parsed: RpcResponse = resp.json().await.context("Failed to parse getSlot response")?;
        let slot = Self::parse_response(parsed)?;
        debug!(slot, commitment = %self.commitment, "Current slot fetched");
        Ok(slot)
    }
}
