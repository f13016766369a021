//! # Cardshow Crawler
//!
//! An ingestion pipeline that discovers card-show events from third-party
//! web sources, extracts structured records through an LLM, normalizes
//! and geocodes them, deduplicates them against prior candidates, and
//! queues them for human review.
//!
//! ## Usage
//!
//! ```sh
//! cardshow_crawler --all
//! cardshow_crawler --url https://example.com/shows --dry-run
//! cardshow_crawler --add-source https://example.com/shows --priority 80
//! ```
//!
//! ## Architecture
//!
//! One invocation drives one crawl cycle:
//! 1. **Fetching**: download each enabled source's page (one attempt, bounded timeout)
//! 2. **Chunking**: split the flattened text into model-sized chunks
//! 3. **Extracting**: one LLM call per chunk, chunks failing independently
//! 4. **Normalizing + Deduping**: map candidates onto the canonical schema
//!    and merge them into the pending-show queue
//!
//! Individual source failures are recorded against source health, never
//! fatal; the process exits non-zero only for configuration or
//! credential errors that prevent any work from starting.

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod chunker;
mod cli;
mod config;
mod dedupe;
mod error;
mod extractor;
mod fetcher;
mod geocoder;
mod models;
mod normalizer;
mod orchestrator;
mod store;

use api::{ChatClient, RetryAsk};
use cli::Cli;
use config::PipelineConfig;
use error::ConfigError;
use fetcher::HttpFetcher;
use geocoder::NominatimGeocoder;
use orchestrator::{CycleReport, Orchestrator, SourceStatus};
use store::pending::PendingQueue;
use store::sources::{HealthPolicy, SourceRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    // --- Tracing init ---
    let default_filter = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("cardshow_crawler starting up");
    debug!(?args, "Parsed CLI arguments");

    // Early check: the data directory must exist and be writable before
    // anything else touches it.
    let data_dir = PathBuf::from(&args.data_dir);
    if let Err(e) = store::ensure_writable_dir(&data_dir).await {
        error!(path = %data_dir.display(), error = %e, "Data directory is not writable");
        return Err(e.into());
    }

    let mut config = PipelineConfig::load(args.config.as_deref())?;
    info!(config_path = args.config.as_deref().unwrap_or("<defaults>"), "Loaded configuration");

    let registry = Arc::new(
        SourceRegistry::open(
            &data_dir,
            HealthPolicy {
                decay_step: config.decay_step,
                attention_threshold: config.attention_threshold,
            },
        )
        .await?,
    );
    let queue = Arc::new(PendingQueue::open(&data_dir).await?);

    // ---- Administrative mode: register a seed URL and exit ----
    if let Some(url) = args.add_source.as_deref() {
        let added = registry.add_source(url, args.priority).await?;
        if added {
            info!(url, priority = args.priority, "Source registered");
        } else {
            warn!(url, "Source already registered; nothing changed");
        }
        return Ok(());
    }

    // ---- Batch mode: centroid backfill for unlocated pending rows ----
    if args.backfill_geocode {
        let updated = queue
            .backfill_coordinates(|show| match (show.city.as_deref(), show.state.as_deref()) {
                (Some(city), Some(state)) => geocoder::centroid_fallback(city, state),
                _ => None,
            })
            .await?;
        info!(updated, "Backfilled coordinates from city/state centroids");
        return Ok(());
    }

    // ---- Crawl mode ----
    if args.url.is_none() && !args.all {
        return Err(ConfigError::NothingToCrawl(
            "pass --url <URL> or --all to select what to crawl".to_string(),
        )
        .into());
    }

    // The extraction step needs credentials; failing here is the one
    // fatal path, before any source work starts.
    config.resolve_api_key(args.api_key.clone())?;

    if args.all && registry.list_enabled().await.is_empty() {
        return Err(ConfigError::NothingToCrawl(
            "the source catalog has no enabled sources; register one with --add-source".to_string(),
        )
        .into());
    }

    let fetcher = HttpFetcher::new(config.fetch_timeout_secs);
    let client = RetryAsk::new(
        ChatClient::new(
            &config.ai_endpoint,
            &config.api_key,
            &config.model,
            config.extract_timeout_secs,
        ),
        &config.retry,
    );
    let geocoder = if args.no_geocode {
        info!("Geocoding disabled for this run");
        None
    } else {
        Some(NominatimGeocoder::new(
            &config.geocode_endpoint,
            config.geocode_timeout_secs,
            config.min_geocode_importance,
        ))
    };

    let orchestrator = Orchestrator::new(
        config,
        fetcher,
        client,
        geocoder,
        Arc::clone(&registry),
        Arc::clone(&queue),
        args.dry_run,
    );

    let report = match args.url.as_deref() {
        Some(url) => orchestrator.run_single(url).await,
        None => orchestrator.run_cycle().await,
    };

    print_summary(&report);

    let flagged = registry.flagged().await;
    for source in &flagged {
        warn!(
            url = %source.url,
            error_streak = source.error_streak,
            "Source needs human attention"
        );
    }

    let elapsed = start_time.elapsed();
    info!(
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Crawl cycle complete"
    );

    // Individual source failures are recorded, not fatal.
    Ok(())
}

/// Per-run summary: one line per source, then totals. Chunk-level
/// detail stays in the debug logs.
fn print_summary(report: &CycleReport) {
    for source in &report.sources {
        let status = match source.status {
            SourceStatus::Succeeded => "ok",
            SourceStatus::FetchFailed => "fetch-failed",
            SourceStatus::AllChunksFailed => "all-chunks-failed",
        };
        info!(
            url = %source.url,
            status,
            chunks = source.chunks_total,
            chunks_failed = source.chunks_failed,
            candidates = source.candidates,
            rejected = source.rejected,
            inserted = source.inserted,
            merged = source.merged,
            unchanged = source.unchanged,
            "Source summary"
        );
    }
    info!(
        sources = report.sources.len(),
        succeeded = report.succeeded(),
        failed = report.failed(),
        inserted = report.total_inserted(),
        merged = report.total_merged(),
        "Run summary"
    );
}
