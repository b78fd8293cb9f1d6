//! Pipeline orchestrator.
//!
//! One invocation: current slot → source fan-out → snapshot → score →
//! enclave evidence → capture slot → bind → assemble → submit.
//!
//! Every stage up to and including binding runs under a single wall-clock
//! deadline. When it fires, the in-flight stage future is dropped (which
//! cancels any pending source fetches) and the invocation fails with
//! `Timeout`. Nothing is ever submitted without a validated receipt.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::attestation::{attestation_hash, AttestationBinder, TeeIdentityProvider};
use crate::context::ContextBuilder;
use crate::feeds::FeedCollector;
use crate::scoring::ScoringEngine;
use crate::slot::SlotProvider;
use crate::submission::SubmissionChannel;
use crate::types::{
    AssetPair, AttestationError, DataAcquisitionError, FunctionResult, MarketContext, ModelVersion,
    PipelineError, SignalAssessment, TeeReceipt,
};

/// What the caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalRequest {
    pub asset_pair: AssetPair,
    /// Requested validity window in slots; `None` uses the configured default.
    pub validity_slots: Option<i64>,
}

/// External collaborators, all behind traits.
pub struct Collaborators {
    pub slots: Arc<dyn SlotProvider>,
    pub feeds: FeedCollector,
    pub enclave: Arc<dyn TeeIdentityProvider>,
    pub submission: Arc<dyn SubmissionChannel>,
}

pub struct Pipeline {
    slots: Arc<dyn SlotProvider>,
    feeds: FeedCollector,
    enclave: Arc<dyn TeeIdentityProvider>,
    submission: Arc<dyn SubmissionChannel>,
    builder: ContextBuilder,
    engine: ScoringEngine,
    binder: AttestationBinder,
    model_version: ModelVersion,
    deadline: Duration,
}

impl Pipeline {
    pub fn new(
        collaborators: Collaborators,
        builder: ContextBuilder,
        engine: ScoringEngine,
        binder: AttestationBinder,
        model_version: ModelVersion,
        deadline: Duration,
    ) -> Self {
        Self {
            slots: collaborators.slots,
            feeds: collaborators.feeds,
            enclave: collaborators.enclave,
            submission: collaborators.submission,
            builder,
            engine,
            binder,
            model_version,
            deadline,
        }
    }

    /// Produce an attested result without submitting it.
    pub async fn execute(&self, request: &SignalRequest) -> Result<FunctionResult, PipelineError> {
        let span = invocation_span(request);
        self.produce(request).instrument(span).await
    }

    /// Produce an attested result and hand it to the submission channel.
    pub async fn run(&self, request: &SignalRequest) -> Result<FunctionResult, PipelineError> {
        let span = invocation_span(request);
        async {
            let result = self.produce(request).await?;
            self.submit(&result).await?;
            Ok(result)
        }
        .instrument(span)
        .await
    }

    async fn produce(&self, request: &SignalRequest) -> Result<FunctionResult, PipelineError> {
        let deadline = Instant::now() + self.deadline;
        let deadline_ms = u64::try_from(self.deadline.as_millis()).unwrap_or(u64::MAX);

        let outcome = tokio::time::timeout_at(deadline, self.stages(request)).await;
        let (context, assessment, receipt) = match outcome {
            Ok(Ok(staged)) => staged,
            Ok(Err(e)) => {
                warn!(reason = e.reason(), error = %e, "Invocation aborted");
                return Err(e);
            }
            Err(_) => {
                warn!(deadline_ms, "Deadline expired before binding completed");
                return Err(PipelineError::Timeout { deadline_ms });
            }
        };

        // Binding may have finished right at the deadline.
        if Instant::now() >= deadline {
            warn!(deadline_ms, "Deadline expired after binding");
            return Err(PipelineError::Timeout { deadline_ms });
        }

        let result = FunctionResult::assemble(context, assessment, receipt);
        info!(
            model = self.engine.model_name(),
            signal_type = %assessment.signal_type,
            direction = %assessment.direction,
            magnitude = assessment.magnitude,
            confidence = assessment.confidence,
            valid_until_slot = assessment.valid_until_slot,
            receipt = %receipt,
            "Signal attested"
        );
        Ok(result)
    }

    async fn stages(
        &self,
        request: &SignalRequest,
    ) -> Result<(MarketContext, SignalAssessment, TeeReceipt), PipelineError> {
        let current_slot = self
            .slots
            .current_slot()
            .await
            .map_err(|e| DataAcquisitionError::SlotUnavailable(format!("{e:#}")))?;

        let collection = self.feeds.collect(&request.asset_pair).await;
        let snapshot = self
            .builder
            .build(collection.observations, request.asset_pair, current_slot)?;

        let assessment = self
            .engine
            .score(&snapshot, self.model_version, request.validity_slots)?;
        let context = snapshot.context;

        let evidence = self
            .enclave
            .evidence(attestation_hash(&context, &assessment))
            .await
            .map_err(|e| AttestationError::EvidenceUnavailable(format!("{e:#}")))?;

        let capture_slot = self
            .slots
            .current_slot()
            .await
            .map_err(|e| DataAcquisitionError::SlotUnavailable(format!("{e:#}")))?;

        let receipt = self.binder.bind(
            &context,
            &assessment,
            &evidence,
            capture_slot,
            self.enclave.as_ref(),
        )?;

        Ok((context, assessment, receipt))
    }

    async fn submit(&self, result: &FunctionResult) -> Result<(), PipelineError> {
        let payload = result.to_bytes();
        self.submission.submit(&payload).await.map_err(|e| {
            let err = PipelineError::Submission(format!("{e:#}"));
            warn!(reason = err.reason(), error = %err, "Submission failed");
            err
        })?;
        info!(bytes = payload.len(), "Result submitted");
        Ok(())
    }
}

/// Whole-pipeline retry for data acquisition failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

/// `Pipeline::run`, re-run from scratch while the error is retryable.
pub async fn run_with_retry(
    pipeline: &Pipeline,
    request: &SignalRequest,
    policy: RetryPolicy,
) -> Result<FunctionResult, PipelineError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match pipeline.run(request).await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!(
                    attempt,
                    max_attempts,
                    reason = e.reason(),
                    backoff_ms = u64::try_from(policy.backoff.as_millis()).unwrap_or(u64::MAX),
                    "Retryable failure, running pipeline again"
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn invocation_span(request: &SignalRequest) -> tracing::Span {
    info_span!(
        "invocation",
        invocation_id = %Uuid::new_v4(),
        asset_pair = %request.asset_pair,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::software::SoftwareEnclave;
    use crate::context::AggregationConfig;
    use crate::feeds::{FanoutConfig, FeedReport, Quote, SourceFeed};
    use crate::scoring::ScoringConfig;
    use crate::slot::MockSlotProvider;
    use crate::submission::MockSubmissionChannel;
    use anyhow::Result;
    use async_trait::async_trait;

    const MEASUREMENT: [u8; 32] = [0xaa; 32];
    const SLOT: u64 = 5_000;

    struct FixedFeed {
        id: u8,
        price: u64,
        delay: Duration,
    }

    #[async_trait]
    impl SourceFeed for FixedFeed {
        fn source_id(&self) -> u8 {
            self.id
        }

        fn name(&self) -> &str {
            "fixed"
        }

        async fn fetch(&self, _pair: &AssetPair) -> Result<FeedReport> {
            tokio::time::sleep(self.delay).await;
            Ok(FeedReport::Quotes(vec![
                Quote {
                    price: self.price,
                    volume_24h: 200_000,
                    liquidity: 500_000,
                    slot: SLOT - 20,
                },
                Quote {
                    price: self.price + self.price / 1_000,
                    volume_24h: 200_000,
                    liquidity: 500_000,
                    slot: SLOT - 2,
                },
            ]))
        }
    }

    fn feeds(count: u8, delay: Duration) -> FeedCollector {
        FeedCollector::new(
            (0..count)
                .map(|id| {
                    Arc::new(FixedFeed {
                        id,
                        price: 100_000_000_000,
                        delay,
                    }) as Arc<dyn SourceFeed>
                })
                .collect(),
            FanoutConfig {
                max_concurrent_fetches: 4,
                per_source_timeout_ms: 10_000,
            },
        )
    }

    fn slots() -> Arc<MockSlotProvider> {
        let mut slots = MockSlotProvider::new();
        slots.expect_current_slot().returning(|| Ok(SLOT));
        Arc::new(slots)
    }

    fn pipeline(
        feeds: FeedCollector,
        slots: Arc<dyn SlotProvider>,
        submission: MockSubmissionChannel,
        deadline: Duration,
    ) -> Pipeline {
        Pipeline::new(
            Collaborators {
                slots,
                feeds,
                enclave: Arc::new(SoftwareEnclave::new([0xbb; 32], MEASUREMENT, 1, [0xcc; 32])),
                submission: Arc::new(submission),
            },
            ContextBuilder::new(AggregationConfig::default()),
            ScoringEngine::new(Arc::new(ScoringConfig::default())),
            AttestationBinder::new([MEASUREMENT], 10),
            "00000001".parse().unwrap(),
            deadline,
        )
    }

    fn request() -> SignalRequest {
        SignalRequest {
            asset_pair: "SOL/USDC".parse().unwrap(),
            validity_slots: None,
        }
    }

    #[tokio::test]
    async fn test_run_submits_one_full_record() {
        let mut submission = MockSubmissionChannel::new();
        submission
            .expect_submit()
            .withf(|payload| payload.len() == FunctionResult::ENCODED_LEN)
            .times(1)
            .returning(|_| Ok(()));

        let p = pipeline(feeds(5, Duration::ZERO), slots(), submission, Duration::from_secs(5));
        let result = p.run(&request()).await.unwrap();

        assert_eq!(result.market_context().source_count, 5);
        assert_eq!(result.market_context().slot, SLOT);
        assert_eq!(result.tee_receipt().timestamp_slot, SLOT);
        assert!(crate::attestation::verify_receipt(
            result.market_context(),
            result.signal_assessment(),
            result.tee_receipt()
        ));
    }

    #[tokio::test]
    async fn test_execute_does_not_submit() {
        let mut submission = MockSubmissionChannel::new();
        submission.expect_submit().never();

        let p = pipeline(feeds(5, Duration::ZERO), slots(), submission, Duration::from_secs(5));
        assert!(p.execute(&request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_insufficient_sources_never_submits() {
        let mut submission = MockSubmissionChannel::new();
        submission.expect_submit().never();

        let p = pipeline(feeds(2, Duration::ZERO), slots(), submission, Duration::from_secs(5));
        let err = p.run(&request()).await.unwrap_err();
        assert_eq!(err.reason(), "insufficient_sources");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_slot_failure_is_retryable() {
        let mut slots = MockSlotProvider::new();
        slots
            .expect_current_slot()
            .returning(|| Err(anyhow::anyhow!("node unreachable")));
        let mut submission = MockSubmissionChannel::new();
        submission.expect_submit().never();

        let p = pipeline(
            feeds(5, Duration::ZERO),
            Arc::new(slots),
            submission,
            Duration::from_secs(5),
        );
        let err = p.run(&request()).await.unwrap_err();
        assert_eq!(err.reason(), "slot_unavailable");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_late_capture_slot_is_stale_attestation() {
        let mut slots = MockSlotProvider::new();
        let mut calls = 0u64;
        slots.expect_current_slot().returning(move || {
            calls += 1;
            Ok(if calls == 1 { SLOT } else { SLOT + 11 })
        });
        let mut submission = MockSubmissionChannel::new();
        submission.expect_submit().never();

        let p = pipeline(
            feeds(5, Duration::ZERO),
            Arc::new(slots),
            submission,
            Duration::from_secs(5),
        );
        let err = p.run(&request()).await.unwrap_err();
        assert_eq!(err.reason(), "stale_attestation");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_deadline_cancels_pending_fanout() {
        let mut submission = MockSubmissionChannel::new();
        submission.expect_submit().never();

        let p = pipeline(
            feeds(5, Duration::from_secs(30)),
            slots(),
            submission,
            Duration::from_millis(50),
        );
        let started = std::time::Instant::now();
        let err = p.run(&request()).await.unwrap_err();
        assert_eq!(err, PipelineError::Timeout { deadline_ms: 50 });
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_submission_failure_is_tagged() {
        let mut submission = MockSubmissionChannel::new();
        submission
            .expect_submit()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("rpc rejected transaction")));

        let p = pipeline(feeds(5, Duration::ZERO), slots(), submission, Duration::from_secs(5));
        let err = p.run(&request()).await.unwrap_err();
        assert_eq!(err.reason(), "submission_failed");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_retry_reruns_after_acquisition_failure() {
        let mut slots = MockSlotProvider::new();
        let mut calls = 0u32;
        slots.expect_current_slot().returning(move || {
            calls += 1;
            if calls == 1 {
                Err(anyhow::anyhow!("node behind"))
            } else {
                Ok(SLOT)
            }
        });
        let mut submission = MockSubmissionChannel::new();
        submission.expect_submit().times(1).returning(|_| Ok(()));

        let p = pipeline(
            feeds(5, Duration::ZERO),
            Arc::new(slots),
            submission,
            Duration::from_secs(5),
        );
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        };
        assert!(run_with_retry(&p, &request(), policy).await.is_ok());
    }

    #[tokio::test]
    async fn test_retry_gives_up_and_skips_terminal_errors() {
        let mut submission = MockSubmissionChannel::new();
        submission.expect_submit().never();
        let p = pipeline(feeds(2, Duration::ZERO), slots(), submission, Duration::from_secs(5));
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff: Duration::from_millis(1),
        };
        let err = run_with_retry(&p, &request(), policy).await.unwrap_err();
        assert_eq!(err.reason(), "insufficient_sources");

        let mut slots = MockSlotProvider::new();
        let mut calls = 0u64;
        slots.expect_current_slot().times(2).returning(move || {
            calls += 1;
            Ok(if calls == 1 { SLOT } else { SLOT + 50 })
        });
        let mut submission = MockSubmissionChannel::new();
        submission.expect_submit().never();
        let p = pipeline(
            feeds(5, Duration::ZERO),
            Arc::new(slots),
            submission,
            Duration::from_secs(5),
        );
        let err = run_with_retry(&p, &request(), policy).await.unwrap_err();
        assert_eq!(err.reason(), "stale_attestation");
    }
}
