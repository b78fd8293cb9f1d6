//! Submission channel.
//!
//! The pipeline hands each finished record to a `SubmissionChannel` exactly
//! once. Retries, signing and transport belong to the channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::io::Write;
use tracing::info;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmissionChannel: Send + Sync {
    /// Submit one serialized `FunctionResult`.
    async fn submit(&self, payload: &[u8]) -> Result<()>;
}

/// Writes each record to stdout as a single JSON line, for a host process
/// that forwards it on-chain.
pub struct StdoutChannel;

#[async_trait]
impl SubmissionChannel for StdoutChannel {
    async fn submit(&self, payload: &[u8]) -> Result<()> {
        let line = render_line(payload, &Utc::now().to_rfc3339());
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}").context("Failed to write record to stdout")?;
        out.flush().context("Failed to flush stdout")?;
        info!(bytes = payload.len(), "Record written to stdout");
        Ok(())
    }
}

fn render_line(payload: &[u8], submitted_at: &str) -> String {
    json!({
        "payload_hex": hex::encode(payload),
        "bytes": payload.len(),
        "submitted_at": submitted_at,
    })
    .to_string()
}
