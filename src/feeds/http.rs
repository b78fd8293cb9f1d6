//! JSON-over-HTTP source feed.
//!
//! `GET {url}?pair={symbol}` returning
//! `{"quotes": [{"price": .., "volume_24h": .., "liquidity": .., "slot": ..}]}`
//! with prices already scaled by 1e9. 404 and 503 mean "no data for this
//! pair right now" rather than an error.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{FeedReport, Quote, SourceFeed};
use crate::types::AssetPair;

#[derive(Debug, Deserialize)]
struct QuotesResponse {
    #[serde(default)]
    quotes: Vec<Quote>,
}

pub struct HttpFeed {
    http: Client,
    source_id: u8,
    name: String,
    url: String,
}

impl HttpFeed {
    pub fn new(source_id: u8, name: &str, url: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent("sso1-function/0.1.0")
            .build()
            .context("Failed to build feed HTTP client")?;
        Ok(Self {
            http,
            source_id,
            name: name.to_string(),
            url: url.to_string(),
        })
    }

    fn parse_body(body: &str) -> Result<FeedReport> {
        let parsed: QuotesResponse =
            serde_json::from_str(body).context("Failed to parse quotes response")?;
        if parsed.quotes.is_empty() {
            Ok(FeedReport::Unavailable("empty quote list".into()))
        } else {
            Ok(FeedReport::Quotes(parsed.quotes))
        }
    }
}

#[async_trait]
impl SourceFeed for HttpFeed {
    fn source_id(&self) -> u8 {
        self.source_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, pair: &AssetPair) -> Result<FeedReport> {
        let resp = self
            .http
            .get(&self.url)
            .query(&[("pair", pair.symbol())])
            .send()
            .await
            .with_context(|| format!("Request to {} failed", self.name))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::SERVICE_UNAVAILABLE {
            return Ok(FeedReport::Unavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            anyhow::bail!("{} returned {status}", self.name);
        }

        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read response from {}", self.name))?;
        debug!(feed = %self.name, bytes = body.len(), "Quotes received");
        Self::parse_body(&body)
    }
}
