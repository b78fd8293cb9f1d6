//! Source feeds and bounded fan-out.
//!
//! Defines the `SourceFeed` trait and the `FeedCollector`, which queries
//! every configured feed concurrently (at most `max_concurrent_fetches` at a
//! time, each under its own timeout). A slow, failing, or unavailable feed
//! only reduces the number of contributing sources; the context builder
//! decides whether what is left is enough.

pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::types::{AssetPair, DataAcquisitionError, SourceObservation};

// ---------------------------------------------------------------------------
// Feed abstraction
// ---------------------------------------------------------------------------

/// One quote as reported by a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Quote {
    /// Price scaled by `PRICE_SCALE`.
    pub price: u64,
    pub volume_24h: u64,
    pub liquidity: u64,
    pub slot: u64,
}

/// What a feed returned. `Unavailable` is an explicit "no data", which
/// is never the same thing as a zero quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedReport {
    Quotes(Vec<Quote>),
    Unavailable(String),
}

/// A market data source with a fixed id in the source bitmap.
#[async_trait]
pub trait SourceFeed: Send + Sync {
    /// Bit position in the source bitmap (0-31).
    fn source_id(&self) -> u8;

    /// Feed name for logging.
    fn name(&self) -> &str;

    /// Fetch current quotes for a pair.
    async fn fetch(&self, pair: &AssetPair) -> Result<FeedReport>;
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    pub max_concurrent_fetches: usize,
    pub per_source_timeout_ms: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 4,
            per_source_timeout_ms: 800,
        }
    }
}

/// Per-feed result of one fan-out round.
#[derive(Debug)]
enum FetchOutcome {
    Quotes(Vec<Quote>),
    Unavailable(String),
    Failed(String),
    TimedOut,
}

/// Observations gathered in one fan-out round, plus what went wrong.
#[derive(Debug, Default)]
pub struct Collection {
    /// Sorted by (source id, slot, price).
    pub observations: Vec<SourceObservation>,
    pub responded: usize,
    pub unavailable: usize,
    pub failed: usize,
    pub timed_out: usize,
}

pub struct FeedCollector {
    feeds: Vec<Arc<dyn SourceFeed>>,
    config: FanoutConfig,
}

impl FeedCollector {
    pub fn new(feeds: Vec<Arc<dyn SourceFeed>>, config: FanoutConfig) -> Self {
        Self { feeds, config }
    }

    /// Query every feed, bounded by `max_concurrent_fetches`.
    ///
    /// Dropping the returned future cancels all in-flight fetches.
    pub async fn collect(&self, pair: &AssetPair) -> Collection {
        let pair = *pair;
        let per_source = Duration::from_millis(self.config.per_source_timeout_ms);
        let limit = self.config.max_concurrent_fetches.max(1);

        debug!(feeds = self.feeds.len(), limit, "Starting source fan-out");

        let outcomes: Vec<(u8, String, FetchOutcome)> = stream::iter(self.feeds.iter().cloned())
            .map(move |feed| async move {
                let outcome = match tokio::time::timeout(per_source, feed.fetch(&pair)).await {
                    Err(_) => FetchOutcome::TimedOut,
                    Ok(Err(e)) => FetchOutcome::Failed(format!("{e:#}")),
                    Ok(Ok(FeedReport::Unavailable(reason))) => FetchOutcome::Unavailable(reason),
                    Ok(Ok(FeedReport::Quotes(quotes))) if quotes.is_empty() => {
                        FetchOutcome::Unavailable("no quotes".into())
                    }
                    Ok(Ok(FeedReport::Quotes(quotes))) => FetchOutcome::Quotes(quotes),
                };
                (feed.source_id(), feed.name().to_string(), outcome)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut collection = Collection::default();
        for (source_id, name, outcome) in outcomes {
            match outcome {
                FetchOutcome::Quotes(quotes) => {
                    collection.responded += 1;
                    collection
                        .observations
                        .extend(quotes.into_iter().map(|q| SourceObservation {
                            source_id,
                            price: q.price,
                            volume_24h: q.volume_24h,
                            liquidity: q.liquidity,
                            observation_slot: q.slot,
                        }));
                }
                FetchOutcome::Unavailable(reason) => {
                    collection.unavailable += 1;
                    debug!(source_id, feed = %name, reason = %reason, "Source unavailable");
                }
                FetchOutcome::Failed(error) => {
                    collection.failed += 1;
                    warn!(source_id, feed = %name, error = %error, "Source fetch failed");
                }
                FetchOutcome::TimedOut => {
                    collection.timed_out += 1;
                    warn!(
                        feed = %name,
                        error = %DataAcquisitionError::SourceTimeout { source_id },
                        timeout_ms = self.config.per_source_timeout_ms,
                        "Source fetch timed out"
                    );
                }
            }
        }

        collection
            .observations
            .sort_unstable_by_key(|o| (o.source_id, o.observation_slot, o.price));

        info!(
            pair = %pair,
            responded = collection.responded,
            unavailable = collection.unavailable,
            failed = collection.failed,
            timed_out = collection.timed_out,
            observations = collection.observations.len(),
            "Source fan-out complete"
        );

        collection
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
