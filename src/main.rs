//! SSO-1 function entry point.
//!
//! Loads configuration once, initialises structured logging, wires the
//! collaborators, runs one attested invocation (re-running the whole
//! pipeline on retryable acquisition failures) and exits non-zero with a
//! tagged reason on failure.

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use sso1_function::attestation::software::SoftwareEnclave;
use sso1_function::attestation::AttestationBinder;
use sso1_function::config::{self, AppConfig};
use sso1_function::context::ContextBuilder;
use sso1_function::feeds::http::HttpFeed;
use sso1_function::feeds::{FeedCollector, SourceFeed};
use sso1_function::pipeline::{self, Collaborators, Pipeline, RetryPolicy, SignalRequest};
use sso1_function::scoring::ScoringEngine;
use sso1_function::slot::RpcSlotProvider;
use sso1_function::submission::StdoutChannel;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    let path = std::env::var("SSO1_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = config::AppConfig::load(&path)?;

    let request = SignalRequest {
        asset_pair: cfg.asset_pair()?,
        validity_slots: cfg.function.validity_slots,
    };
    info!(
        asset_pair = %request.asset_pair,
        model_version = %cfg.model_version()?,
        sources = cfg.sources.len(),
        deadline_ms = cfg.function.deadline_ms,
        "SSO-1 function starting"
    );

    let pipeline = build_pipeline(&cfg)?;
    let policy = RetryPolicy {
        max_attempts: cfg.function.max_attempts,
        backoff: Duration::from_millis(cfg.function.retry_backoff_ms),
    };

    match pipeline::run_with_retry(&pipeline, &request, policy).await {
        Ok(result) => {
            info!(
                slot = result.market_context().slot,
                signal_type = %result.signal_assessment().signal_type,
                confidence = result.signal_assessment().confidence,
                "Invocation complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(reason = e.reason(), error = %e, "Invocation failed");
            eprintln!(
                "{}",
                json!({ "status": "error", "reason": e.reason(), "message": e.to_string() })
            );
            std::process::exit(1);
        }
    }
}

fn build_pipeline(cfg: &AppConfig) -> Result<Pipeline> {
    let feeds = cfg
        .sources
        .iter()
        .map(|s| Ok(Arc::new(HttpFeed::new(s.id, &s.name, &s.url)?) as Arc<dyn SourceFeed>))
        .collect::<Result<Vec<_>>>()?;

    let slots = RpcSlotProvider::new(
        &cfg.slot_rpc.url,
        &cfg.slot_rpc.commitment,
        cfg.slot_rpc.timeout_ms,
    )?;

    Ok(Pipeline::new(
        Collaborators {
            slots: Arc::new(slots),
            feeds: FeedCollector::new(feeds, cfg.fanout.clone()),
            enclave: Arc::new(SoftwareEnclave::from_config(&cfg.enclave)?),
            submission: Arc::new(StdoutChannel),
        },
        ContextBuilder::new(cfg.aggregation.clone()),
        ScoringEngine::new(Arc::new(cfg.scoring.clone())),
        AttestationBinder::from_config(&cfg.attestation)?,
        cfg.model_version()?,
        Duration::from_millis(cfg.function.deadline_ms),
    ))
}

/// `RUST_LOG` first, then `LOG_LEVEL`, then `sso1_function=info`.
/// JSON output when `SSO1_LOG_JSON` is set.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            std::env::var("LOG_LEVEL")
                .map_err(|e| e.to_string())
                .and_then(|level| {
                    EnvFilter::try_new(format!("sso1_function={}", level.to_lowercase()))
                        .map_err(|e| e.to_string())
                })
        })
        .unwrap_or_else(|_| EnvFilter::new("sso1_function=info"));

    let json_logging = std::env::var("SSO1_LOG_JSON").is_ok();

    // stdout carries the submitted record, so logs go to stderr.
    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }
}
