use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sso1_function::attestation::verify_receipt;
use sso1_function::pipeline::SignalRequest;
use sso1_function::types::{
    AttestationError, DataAcquisitionError, Direction, FunctionResult, MarketContext,
    PipelineError, SignalAssessment, SignalType,
};

use crate::mock_collaborators::*;

const PRICE: u64 = 142_500_000_000;

fn agreeing_feeds(count: u8, move_bps: i64) -> Vec<MockFeed> {
    (0..count)
        .map(|id| {
            MockFeed::new(
                id,
                Behaviour::Quotes(trending_quotes(PRICE, move_bps, 200_000, 500_000)),
            )
        })
        .collect()
}

fn request(validity_slots: Option<i64>) -> SignalRequest {
    SignalRequest {
        asset_pair: pair(),
        validity_slots,
    }
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_five_agreeing_sources_produce_attested_momentum_signal() {
    let channel = RecordingChannel::default();
    let pipeline = Harness::new(agreeing_feeds(5, 10)).build(channel.clone());

    let result = pipeline.run(&request(None)).await.unwrap();
    let ctx = result.market_context();
    let asmt = result.signal_assessment();

    assert_eq!(ctx.source_count, 5);
    assert_eq!(ctx.source_bitmap, 0b1_1111);
    assert_eq!(ctx.volume_24h, 1_000_000);
    assert_eq!(ctx.liquidity_depth, 500_000);
    assert_eq!(ctx.slot, CURRENT_SLOT);
    assert!(asmt.confidence > 0);
    assert_eq!(asmt.signal_type, SignalType::Momentum);
    assert_eq!(asmt.direction, Direction::Long);
    assert_eq!(asmt.valid_from_slot, CURRENT_SLOT);
    assert_eq!(asmt.window_len(), 25);

    assert_eq!(channel.count(), 1);
}

#[tokio::test]
async fn test_falling_market_reads_short() {
    let pipeline = Harness::new(agreeing_feeds(5, -10)).build(RecordingChannel::default());
    let result = pipeline.run(&request(None)).await.unwrap();
    assert_eq!(result.signal_assessment().signal_type, SignalType::Momentum);
    assert_eq!(result.signal_assessment().direction, Direction::Short);
}

#[tokio::test]
async fn test_submitted_record_decodes_and_hash_recomputes() {
    let channel = RecordingChannel::default();
    let pipeline = Harness::new(agreeing_feeds(5, 10)).build(channel.clone());
    let result = pipeline.run(&request(None)).await.unwrap();

    let submitted = channel.submitted.lock().unwrap()[0].clone();
    assert_eq!(submitted.len(), FunctionResult::ENCODED_LEN);
    assert_eq!(FunctionResult::from_bytes(&submitted).unwrap(), result);

    // An independent verifier only needs the first two record parts.
    let payload_len = MarketContext::ENCODED_LEN + SignalAssessment::ENCODED_LEN;
    let recomputed: [u8; 32] = Sha256::digest(&submitted[..payload_len]).into();
    let receipt = result.tee_receipt();
    assert_eq!(recomputed, receipt.attestation_hash);
    assert_eq!(receipt.mr_enclave, MEASUREMENT);
    assert_eq!(receipt.enclave_signer, SIGNER);
    assert!(verify_receipt(
        result.market_context(),
        result.signal_assessment(),
        receipt
    ));
}

#[tokio::test]
async fn test_identical_inputs_give_identical_bytes() {
    let first = Harness::new(agreeing_feeds(5, 10))
        .build(RecordingChannel::default())
        .execute(&request(None))
        .await
        .unwrap();
    let second = Harness::new(agreeing_feeds(5, 10))
        .build(RecordingChannel::default())
        .execute(&request(None))
        .await
        .unwrap();

    assert_eq!(
        first.market_context().to_bytes(),
        second.market_context().to_bytes()
    );
    assert_eq!(
        first.signal_assessment().to_bytes(),
        second.signal_assessment().to_bytes()
    );
    assert_eq!(
        first.tee_receipt().attestation_hash,
        second.tee_receipt().attestation_hash
    );
}

#[tokio::test]
async fn test_outlier_source_excluded_from_bitmap() {
    let mut feeds = agreeing_feeds(4, 10);
    feeds.push(MockFeed::new(
        7,
        Behaviour::Quotes(trending_quotes(PRICE + PRICE / 10, 10, 200_000, 500_000)),
    ));
    let result = Harness::new(feeds)
        .build(RecordingChannel::default())
        .run(&request(None))
        .await
        .unwrap();

    let ctx = result.market_context();
    assert_eq!(ctx.source_count, 4);
    assert_eq!(ctx.source_bitmap & (1 << 7), 0);
    assert_eq!(ctx.volume_24h, 800_000);
}

#[tokio::test]
async fn test_manipulated_earlier_quote_leaves_signal_unchanged() {
    let baseline = Harness::new(agreeing_feeds(5, 10))
        .build(RecordingChannel::default())
        .execute(&request(None))
        .await
        .unwrap();

    // Source 4 reports an honest latest quote after a 10x quote earlier on.
    let mut quotes = trending_quotes(PRICE, 10, 200_000, 500_000);
    quotes[0].price = PRICE * 10;
    let mut feeds = agreeing_feeds(4, 10);
    feeds.push(MockFeed::new(4, Behaviour::Quotes(quotes)));

    let attacked = Harness::new(feeds)
        .build(RecordingChannel::default())
        .execute(&request(None))
        .await
        .unwrap();

    assert_eq!(attacked.market_context().source_count, 5);
    assert_eq!(
        attacked.market_context().volatility_1h,
        baseline.market_context().volatility_1h
    );
    assert_eq!(
        attacked.signal_assessment().to_bytes(),
        baseline.signal_assessment().to_bytes()
    );
}

// ---------------------------------------------------------------------------
// Acquisition failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_two_of_five_sources_is_insufficient() {
    let quotes = trending_quotes(PRICE, 10, 200_000, 500_000);
    let feeds = vec![
        MockFeed::new(0, Behaviour::Quotes(quotes.clone())),
        MockFeed::new(1, Behaviour::Quotes(quotes)),
        MockFeed::new(2, Behaviour::Fail),
        MockFeed::new(3, Behaviour::Unavailable),
        MockFeed::new(4, Behaviour::Fail),
    ];
    let channel = RecordingChannel::default();
    let err = Harness::new(feeds)
        .build(channel.clone())
        .run(&request(None))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        PipelineError::DataAcquisition(DataAcquisitionError::InsufficientSources {
            required: 3,
            available: 2
        })
    );
    assert!(err.is_retryable());
    assert_eq!(channel.count(), 0);
}

#[tokio::test]
async fn test_only_old_quotes_is_stale_data() {
    let old = trending_quotes(PRICE, 10, 200_000, 500_000)
        .into_iter()
        .map(|mut q| {
            q.slot -= 1_000;
            q
        })
        .collect::<Vec<_>>();
    let feeds = (0..5)
        .map(|id| MockFeed::new(id, Behaviour::Quotes(old.clone())))
        .collect();

    let channel = RecordingChannel::default();
    let err = Harness::new(feeds)
        .build(channel.clone())
        .run(&request(None))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "stale_data");
    assert!(err.is_retryable());
    assert_eq!(channel.count(), 0);
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_requested_validity_is_capped() {
    let result = Harness::new(agreeing_feeds(5, 10))
        .build(RecordingChannel::default())
        .run(&request(Some(500)))
        .await
        .unwrap();
    assert_eq!(result.signal_assessment().window_len(), 100);
}

#[tokio::test]
async fn test_non_positive_validity_rejected() {
    let channel = RecordingChannel::default();
    let err = Harness::new(agreeing_feeds(5, 10))
        .build(channel.clone())
        .run(&request(Some(0)))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "invalid_validity_window");
    assert!(!err.is_retryable());
    assert_eq!(channel.count(), 0);
}

// ---------------------------------------------------------------------------
// Attestation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_untrusted_enclave_never_submits() {
    let mut harness = Harness::new(agreeing_feeds(5, 10));
    harness.enclave_measurement = [0x01; 32];
    let channel = RecordingChannel::default();

    let err = harness
        .build(channel.clone())
        .run(&request(None))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Attestation(AttestationError::UnverifiedEnclave { .. })
    ));
    assert!(!err.is_retryable());
    assert_eq!(channel.count(), 0);
}

#[tokio::test]
async fn test_capture_slot_too_far_ahead() {
    let mut harness = Harness::new(agreeing_feeds(5, 10));
    harness.slots = ScriptedSlots::sequence(vec![CURRENT_SLOT, CURRENT_SLOT + 11]);
    let channel = RecordingChannel::default();

    let err = harness
        .build(channel.clone())
        .run(&request(None))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "stale_attestation");
    assert_eq!(channel.count(), 0);
}

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_deadline_during_fanout_times_out() {
    let calls = Arc::new(AtomicUsize::new(0));
    let feeds = (0..5)
        .map(|id| {
            MockFeed::new(
                id,
                Behaviour::Quotes(trending_quotes(PRICE, 10, 200_000, 500_000)),
            )
            .with_delay(Duration::from_secs(30))
            .with_call_counter(calls.clone())
        })
        .collect();
    let mut harness = Harness::new(feeds);
    harness.deadline = Duration::from_millis(100);
    let channel = RecordingChannel::default();

    let started = Instant::now();
    let err = harness
        .build(channel.clone())
        .run(&request(None))
        .await
        .unwrap_err();

    assert_eq!(err, PipelineError::Timeout { deadline_ms: 100 });
    assert!(!err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(calls.load(Ordering::SeqCst) > 0);
    assert_eq!(channel.count(), 0);
}
