//! One crawl cycle, composed with failure isolation at every boundary.
//!
//! Per source the cycle runs FETCHING → CHUNKING → EXTRACTING (N chunks,
//! each independently ok or failed) → NORMALIZING → DEDUPING → PERSISTED.
//! Sources run with bounded concurrency; within one source, chunk
//! extraction calls run concurrently up to their own cap. The failure
//! containment boundaries are "one source" for fetch errors and "one
//! chunk" for extraction errors; nothing blocks the rest of the run.
//!
//! A source's overall outcome reports to the health tracker: success if
//! the fetch succeeded and at least one chunk extracted without a fatal
//! error, failure if the fetch failed or every chunk failed.

use crate::api::CompleteAsync;
use crate::chunker;
use crate::config::PipelineConfig;
use crate::extractor::Extractor;
use crate::fetcher::PageFetcher;
use crate::geocoder::Geocode;
use crate::models::{ExtractedCandidate, NormalizedShow, Source};
use crate::normalizer;
use crate::store::pending::{PendingQueue, UpsertOutcome};
use crate::store::sources::SourceRegistry;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Terminal state of one source's pass through the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Succeeded,
    FetchFailed,
    AllChunksFailed,
}

/// Per-source accounting for the run summary.
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub url: String,
    pub status: SourceStatus,
    pub chunks_total: usize,
    pub chunks_failed: usize,
    pub candidates: usize,
    pub rejected: usize,
    pub inserted: usize,
    pub merged: usize,
    pub unchanged: usize,
}

impl SourceReport {
    fn new(url: &str, status: SourceStatus) -> Self {
        Self {
            url: url.to_string(),
            status,
            chunks_total: 0,
            chunks_failed: 0,
            candidates: 0,
            rejected: 0,
            inserted: 0,
            merged: 0,
            unchanged: 0,
        }
    }
}

/// The whole cycle's outcome, one report per source attempted.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub sources: Vec<SourceReport>,
}

impl CycleReport {
    pub fn succeeded(&self) -> usize {
        self.sources.iter().filter(|s| s.status == SourceStatus::Succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.sources.len() - self.succeeded()
    }

    pub fn total_inserted(&self) -> usize {
        self.sources.iter().map(|s| s.inserted).sum()
    }

    pub fn total_merged(&self) -> usize {
        self.sources.iter().map(|s| s.merged).sum()
    }
}

/// Drives one crawl cycle over the injected collaborators.
pub struct Orchestrator<F, C, G> {
    config: PipelineConfig,
    fetcher: F,
    client: C,
    geocoder: Option<G>,
    registry: Arc<SourceRegistry>,
    queue: Arc<PendingQueue>,
    dry_run: bool,
}

impl<F, C, G> Orchestrator<F, C, G>
where
    F: PageFetcher,
    C: CompleteAsync + Clone,
    G: Geocode,
{
    /// Wire up one cycle's collaborators.
    ///
    /// # Arguments
    ///
    /// * `config` - Tunables for timeouts, chunking, concurrency, and matching
    /// * `fetcher` - Page fetcher, one attempt per source
    /// * `client` - Completion client, already wrapped in its retry policy
    /// * `geocoder` - `None` disables geocoding for the run
    /// * `registry` - Source catalog receiving per-source outcomes
    /// * `queue` - Review queue receiving candidates
    /// * `dry_run` - Run the full pipeline but persist nothing
    pub fn new(
        config: PipelineConfig,
        fetcher: F,
        client: C,
        geocoder: Option<G>,
        registry: Arc<SourceRegistry>,
        queue: Arc<PendingQueue>,
        dry_run: bool,
    ) -> Self {
        Self {
            config,
            fetcher,
            client,
            geocoder,
            registry,
            queue,
            dry_run,
        }
    }

    /// Run one cycle over every enabled source, highest priority first.
    /// Disabled sources are never fetched.
    #[instrument(level = "info", skip_all)]
    pub async fn run_cycle(&self) -> CycleReport {
        let sources = self.registry.list_enabled().await;
        info!(count = sources.len(), dry_run = self.dry_run, "Starting crawl cycle");

        let reports: Vec<SourceReport> = stream::iter(sources)
            .map(|source| self.process_source(source))
            .buffer_unordered(self.config.source_concurrency)
            .collect()
            .await;

        CycleReport { sources: reports }
    }

    /// Run the cycle for a single target URL. An uncataloged URL runs
    /// as a one-off crawl with no health tracking; a cataloged but
    /// disabled URL is refused.
    pub async fn run_single(&self, url: &str) -> CycleReport {
        let source = match self.registry.get(url).await {
            Some(source) if !source.enabled => {
                warn!(url, "Source is disabled; refusing to fetch it");
                return CycleReport::default();
            }
            Some(source) => source,
            None => {
                info!(url, "URL not in the source catalog; running a one-off crawl");
                Source::new(url.to_string(), 50)
            }
        };

        let report = self.process_source(source).await;
        CycleReport { sources: vec![report] }
    }

    #[instrument(level = "info", skip_all, fields(url = %source.url))]
    async fn process_source(&self, source: Source) -> SourceReport {
        let url = source.url.as_str();

        let text = match self.fetcher.fetch(url).await {
            Ok(text) => text,
            Err(e) => {
                warn!(url, error = %e, "Fetch failed; skipping source this cycle");
                self.record_outcome(url, false).await;
                return SourceReport::new(url, SourceStatus::FetchFailed);
            }
        };

        let chunks = chunker::chunk(url, &text, self.config.max_chunk_bytes);
        let mut report = SourceReport::new(url, SourceStatus::Succeeded);
        report.chunks_total = chunks.len();

        if chunks.is_empty() {
            info!(url, "Page flattened to no text; nothing to extract");
            self.record_outcome(url, true).await;
            return report;
        }

        let extractor = Extractor::new(self.client.clone(), self.config.prompt_for(url));

        // Each chunk call is independent: its own timeout, its own
        // retries, its own failure.
        let chunk_results: Vec<(usize, Result<Vec<ExtractedCandidate>, _>)> =
            stream::iter(chunks.iter())
                .map(|chunk| {
                    let extractor = &extractor;
                    async move { (chunk.sequence_index, extractor.extract(chunk).await) }
                })
                .buffer_unordered(self.config.chunk_concurrency)
                .collect()
                .await;

        let mut candidates = Vec::new();
        for (index, result) in chunk_results {
            match result {
                Ok(mut extracted) => {
                    debug!(url, chunk = index, count = extracted.len(), "Chunk extracted");
                    candidates.append(&mut extracted);
                }
                Err(e) => {
                    warn!(url, chunk = index, error = %e, "Chunk extraction failed; continuing with remaining chunks");
                    report.chunks_failed += 1;
                }
            }
        }

        if report.chunks_failed == report.chunks_total {
            warn!(url, chunks = report.chunks_total, "Every chunk failed; reporting source failure");
            report.status = SourceStatus::AllChunksFailed;
            self.record_outcome(url, false).await;
            return report;
        }

        report.candidates = candidates.len();
        for candidate in candidates {
            match normalizer::normalize(&candidate) {
                Ok(mut show) => {
                    show.coordinates = self.geocode_show(&show).await;
                    self.persist(url, candidate.raw_payload, show, &mut report).await;
                }
                Err(reason) => {
                    report.rejected += 1;
                    warn!(url, reason = %reason, "Rejected candidate");
                }
            }
        }

        self.record_outcome(url, true).await;
        info!(
            url,
            chunks = report.chunks_total,
            chunks_failed = report.chunks_failed,
            candidates = report.candidates,
            inserted = report.inserted,
            merged = report.merged,
            "Source processed"
        );
        report
    }

    async fn geocode_show(&self, show: &NormalizedShow) -> Option<crate::models::Coordinates> {
        let geocoder = self.geocoder.as_ref()?;
        let query = geocode_query(show)?;
        geocoder.geocode(&query).await
    }

    async fn persist(
        &self,
        url: &str,
        raw_payload: serde_json::Value,
        show: NormalizedShow,
        report: &mut SourceReport,
    ) {
        if self.dry_run {
            info!(url, name = %show.name, start = %show.start_date, "Dry run; not persisting candidate");
            return;
        }
        match self
            .queue
            .insert_or_merge(url, raw_payload, show, self.config.title_match_threshold)
            .await
        {
            Ok(UpsertOutcome::Inserted(_)) => report.inserted += 1,
            Ok(UpsertOutcome::Merged(_)) => report.merged += 1,
            Ok(UpsertOutcome::Unchanged(_)) => report.unchanged += 1,
            Err(e) => warn!(url, error = %e, "Failed to persist candidate"),
        }
    }

    async fn record_outcome(&self, url: &str, success: bool) {
        if self.dry_run {
            return;
        }
        if let Err(e) = self.registry.record_outcome(url, success).await {
            warn!(url, error = %e, "Failed to record source outcome");
        }
    }
}

/// Build the geocoding query for a show: structured street/city/state
/// when available, raw address text otherwise.
fn geocode_query(show: &NormalizedShow) -> Option<String> {
    let address = show.address.as_deref()?.trim();
    if address.is_empty() {
        return None;
    }
    let mut parts = vec![address.to_string()];
    if let Some(city) = show.city.as_deref() {
        parts.push(city.to_string());
    }
    if let Some(state) = show.state.as_deref() {
        parts.push(state.to_string());
    }
    Some(parts.join(", "))
}
