//! In-memory collaborators for integration testing.
//!
//! Deterministic feeds, a scripted slot source, and a submission channel
//! that records every payload it receives. No network, no hardware.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sso1_function::attestation::software::SoftwareEnclave;
use sso1_function::attestation::AttestationBinder;
use sso1_function::context::{AggregationConfig, ContextBuilder};
use sso1_function::feeds::{FanoutConfig, FeedCollector, FeedReport, Quote, SourceFeed};
use sso1_function::pipeline::{Collaborators, Pipeline};
use sso1_function::scoring::{ScoringConfig, ScoringEngine};
use sso1_function::slot::SlotProvider;
use sso1_function::submission::SubmissionChannel;
use sso1_function::types::{AssetPair, ModelVersion};

pub const CURRENT_SLOT: u64 = 250_000_000;
pub const MEASUREMENT: [u8; 32] = [0x5f; 32];
pub const SIGNER: [u8; 32] = [0x9a; 32];
pub const ROOT_KEY: [u8; 32] = [0x42; 32];

// ---------------------------------------------------------------------------
// Feeds
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum Behaviour {
    Quotes(Vec<Quote>),
    Unavailable,
    Fail,
}

/// A feed that returns a fixed report after an optional delay.
pub struct MockFeed {
    id: u8,
    behaviour: Behaviour,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl MockFeed {
    pub fn new(id: u8, behaviour: Behaviour) -> Self {
        Self {
            id,
            behaviour,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_call_counter(mut self, calls: Arc<AtomicUsize>) -> Self {
        self.calls = calls;
        self
    }
}

#[async_trait]
impl SourceFeed for MockFeed {
    fn source_id(&self) -> u8 {
        self.id
    }

    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, _pair: &AssetPair) -> Result<FeedReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.behaviour {
            Behaviour::Quotes(quotes) => Ok(FeedReport::Quotes(quotes.clone())),
            Behaviour::Unavailable => Ok(FeedReport::Unavailable("no market".into())),
            Behaviour::Fail => Err(anyhow!("connection reset")),
        }
    }
}

/// Two quotes per source: one 40 slots back, one 2 slots back, the latter
/// `move_bps` away from `price`.
pub fn trending_quotes(price: u64, move_bps: i64, volume: u64, liquidity: u64) -> Vec<Quote> {
    let moved = (price as i128 + price as i128 * move_bps as i128 / 10_000) as u64;
    vec![
        Quote {
            price,
            volume_24h: volume,
            liquidity,
            slot: CURRENT_SLOT - 40,
        },
        Quote {
            price: moved,
            volume_24h: volume,
            liquidity,
            slot: CURRENT_SLOT - 2,
        },
    ]
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Returns the scripted slots in order, then repeats the last one.
pub struct ScriptedSlots {
    slots: Vec<u64>,
    next: AtomicUsize,
}

impl ScriptedSlots {
    pub fn fixed(slot: u64) -> Self {
        Self::sequence(vec![slot])
    }

    pub fn sequence(slots: Vec<u64>) -> Self {
        Self {
            slots,
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SlotProvider for ScriptedSlots {
    async fn current_slot(&self) -> Result<u64> {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        self.slots
            .get(i)
            .or_else(|| self.slots.last())
            .copied()
            .ok_or_else(|| anyhow!("no slots scripted"))
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[derive(Default, Clone)]
pub struct RecordingChannel {
    pub submitted: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingChannel {
    pub fn count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl SubmissionChannel for RecordingChannel {
    async fn submit(&self, payload: &[u8]) -> Result<()> {
        self.submitted.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

pub struct Harness {
    pub feeds: Vec<MockFeed>,
    pub slots: ScriptedSlots,
    pub enclave_measurement: [u8; 32],
    pub trusted: Vec<[u8; 32]>,
    pub scoring: ScoringConfig,
    pub aggregation: AggregationConfig,
    pub deadline: Duration,
}

impl Harness {
    pub fn new(feeds: Vec<MockFeed>) -> Self {
        Self {
            feeds,
            slots: ScriptedSlots::fixed(CURRENT_SLOT),
            enclave_measurement: MEASUREMENT,
            trusted: vec![MEASUREMENT],
            scoring: ScoringConfig::default(),
            aggregation: AggregationConfig::default(),
            deadline: Duration::from_secs(5),
        }
    }

    pub fn build(self, channel: RecordingChannel) -> Pipeline {
        let feeds = self
            .feeds
            .into_iter()
            .map(|f| Arc::new(f) as Arc<dyn SourceFeed>)
            .collect();
        Pipeline::new(
            Collaborators {
                slots: Arc::new(self.slots),
                feeds: FeedCollector::new(
                    feeds,
                    FanoutConfig {
                        max_concurrent_fetches: 4,
                        per_source_timeout_ms: 10_000,
                    },
                ),
                enclave: Arc::new(SoftwareEnclave::new(
                    SIGNER,
                    self.enclave_measurement,
                    2,
                    ROOT_KEY,
                )),
                submission: Arc::new(channel),
            },
            ContextBuilder::new(self.aggregation),
            ScoringEngine::new(Arc::new(self.scoring)),
            AttestationBinder::new(self.trusted, 10),
            model_version(),
            self.deadline,
        )
    }
}

pub fn model_version() -> ModelVersion {
    "00000001".parse().unwrap()
}

pub fn pair() -> AssetPair {
    "SOL/USDC".parse().unwrap()
}
