//! Pipeline Orchestrator
//!
//! One run: for each selected source, fetch → normalize → deduplicate →
//! enrich → persist.
//!
//! Features:
//! - Sources processed concurrently, bounded by the number of credentials
//! - Articles of one source handled in fetch order
//! - A failing source is recorded and never stops the others
//! - Wall-clock deadline and signal-driven graceful stop

pub mod report;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Config, DegradedPolicy, RunMode, SourceCount};
use crate::dedup::Deduplicator;
use crate::enrich::EnrichmentPool;
use crate::error::Result;
use crate::http_client::{HttpClientConfig, ResilientHttpClient};
use crate::normalize::{Normalizer, SentenceTokenizer};
use crate::schemas::{ArticleCandidate, PersistedArticle};
use crate::sources::{build_source, FetchOptions, Source};
use crate::storage::PersistenceGateway;

pub use report::{RunStatus, RunSummary, SourceReport, SourceStatus, Totals};

// ============================================
// RUN CONTROL
// ============================================

/// Deadline and stop flag shared by all workers
#[derive(Debug, Clone)]
pub struct RunControl {
    deadline: Option<Instant>,
    stop: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            deadline: budget.map(|b| Instant::now() + b),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag a signal handler can set to stop the run
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// True once no new article may start
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

// ============================================
// PIPELINE
// ============================================

/// Run-level behaviour
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub run_id: String,
    pub mode: RunMode,
    pub degraded_policy: DegradedPolicy,
    pub max_concurrency: usize,
}

impl PipelineSettings {
    pub fn new(run_id: impl Into<String>, mode: RunMode) -> Self {
        Self {
            run_id: run_id.into(),
            mode,
            degraded_policy: DegradedPolicy::Persist,
            max_concurrency: 4,
        }
    }
}

pub struct Pipeline {
    sources: Vec<(Arc<dyn Source>, FetchOptions)>,
    normalizer: Normalizer,
    /// `None` when the mode never calls a provider
    enrichment: Option<Arc<EnrichmentPool>>,
    gateway: Arc<PersistenceGateway>,
    settings: PipelineSettings,
    control: RunControl,
    status: RunStatus,
}

impl Pipeline {
    pub fn new(
        sources: Vec<(Arc<dyn Source>, FetchOptions)>,
        normalizer: Normalizer,
        enrichment: Option<Arc<EnrichmentPool>>,
        gateway: Arc<PersistenceGateway>,
        settings: PipelineSettings,
        control: RunControl,
    ) -> Self {
        Self {
            sources,
            normalizer,
            enrichment,
            gateway,
            settings,
            control,
            status: RunStatus::Pending,
        }
    }

    /// Wires every component from configuration.
    ///
    /// Any error here is a setup-level fault and the run is `Failed`.
    pub async fn from_config(
        config: &Config,
        count: SourceCount,
        mode: RunMode,
        run_id: &str,
    ) -> Result<Self> {
        config.check(mode)?;

        let selected = config.select_sources(count);
        info!(sources = selected.len(), mode = ?mode, "Initializing pipeline...");

        let languages: Vec<&str> = selected
            .iter()
            .map(|s| s.language.as_str())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let tokenizer = SentenceTokenizer::load(&config.tokenizer_path, &languages)?;
        let normalizer = Normalizer::new(Arc::new(tokenizer));

        let http = Arc::new(ResilientHttpClient::new(HttpClientConfig {
            max_concurrent_requests: config.max_concurrent_requests,
            request_timeout: Duration::from_secs(config.http_timeout_secs),
            connect_timeout: Duration::from_secs(config.http_connect_timeout_secs),
            retry: config.retry_policy(),
            proxy_url: config.proxy_url.clone(),
            ..Default::default()
        })?);

        let sources = selected
            .iter()
            .map(|s| Ok((build_source(s, http.clone())?, FetchOptions::from_config(s))))
            .collect::<Result<Vec<_>>>()?;

        let enrichment = if mode.enriches() {
            Some(Arc::new(EnrichmentPool::from_config(config)?))
        } else {
            None
        };

        let gateway = Arc::new(PersistenceGateway::connect(config, mode).await?);

        let settings = PipelineSettings {
            run_id: run_id.to_string(),
            mode,
            degraded_policy: config.degraded_policy,
            max_concurrency: config.max_concurrency,
        };

        Ok(Self::new(
            sources,
            normalizer,
            enrichment,
            gateway,
            settings,
            RunControl::new(config.run_deadline()?),
        ))
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Number of sources processed at the same time
    pub fn worker_count(&self) -> usize {
        let credentials = self
            .enrichment
            .as_ref()
            .map_or(self.settings.max_concurrency, |pool| pool.credentials().len());

        self.sources
            .len()
            .min(credentials)
            .min(self.settings.max_concurrency)
            .max(1)
    }

    /// Executes the run and returns its summary
    #[instrument(skip(self), fields(run_id = %self.settings.run_id))]
    pub async fn run(&mut self) -> RunSummary {
        let started_at = Utc::now();
        self.status = RunStatus::Running;
        info!(sources = self.sources.len(), workers = self.worker_count(), "Run started");

        let summary = match self.execute().await {
            Ok(reports) => RunSummary::new(&self.settings.run_id, self.settings.mode, started_at, reports),
            Err(e) => {
                error!(error = %e, "Run failed");
                RunSummary::failed(&self.settings.run_id, self.settings.mode, started_at, e)
            }
        };

        self.status = summary.status;
        info!(
            status = summary.status.as_str(),
            fetched = summary.totals.fetched,
            deduplicated = summary.totals.deduplicated,
            enriched = summary.totals.enriched,
            degraded = summary.totals.degraded,
            persisted = summary.totals.persisted,
            failed = summary.totals.failed,
            "Run finished"
        );
        summary
    }

    async fn execute(&self) -> Result<Vec<SourceReport>> {
        let known = self.gateway.load_known_fingerprints().await?;
        let dedup = Deduplicator::new(known);

        let mut reports: Vec<(usize, SourceReport)> = stream::iter(self.sources.iter().enumerate())
            .map(|(index, (source, options))| {
                let dedup = &dedup;
                async move { (index, self.process_source(source.as_ref(), options.clone(), dedup).await) }
            })
            .buffer_unordered(self.worker_count())
            .collect()
            .await;

        reports.sort_by_key(|(index, _)| *index);
        Ok(reports.into_iter().map(|(_, report)| report).collect())
    }

    /// Runs one source to completion; never returns an error
    #[instrument(skip_all, fields(source = %source.id()))]
    async fn process_source(
        &self,
        source: &dyn Source,
        options: FetchOptions,
        dedup: &Deduplicator,
    ) -> SourceReport {
        let mut report = SourceReport::new(source.id());

        if self.control.should_stop() {
            warn!("Stop requested before source started");
            report.interrupted = true;
            return report.finish();
        }

        let mut candidates = match source.fetch(options).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Source fetch failed");
                return report.fetch_failed(e).finish();
            }
        };
        let language = source.metadata().language.clone();

        while let Some(candidate) = candidates.next().await {
            if self.control.should_stop() {
                warn!(fetched = report.fetched, "Deadline reached, stopping source");
                report.interrupted = true;
                break;
            }
            report.fetched += 1;
            self.process_article(candidate, &language, dedup, &mut report).await;
        }

        info!(
            fetched = report.fetched,
            deduplicated = report.deduplicated,
            enriched = report.enriched,
            degraded = report.degraded,
            persisted = report.persisted,
            failed = report.failed,
            "Source done"
        );
        report.finish()
    }

    async fn process_article(
        &self,
        candidate: ArticleCandidate,
        language: &str,
        dedup: &Deduplicator,
        report: &mut SourceReport,
    ) {
        let article = match self.normalizer.normalize(&candidate, language) {
            Ok(article) => article,
            Err(e) => {
                warn!(url = %candidate.url, error = %e, "Normalization failed");
                report.failed += 1;
                return;
            }
        };

        if dedup.check_and_mark(&article.content_fingerprint) {
            report.deduplicated += 1;
            return;
        }

        let enrichment = match &self.enrichment {
            Some(pool) => match pool.enrich(&article).await {
                Ok(result) => {
                    report.enriched += 1;
                    Some(result)
                }
                Err(e) => {
                    warn!(url = %article.url, error = %e, "Enrichment failed, article degraded");
                    report.degraded += 1;
                    None
                }
            },
            None => {
                report.degraded += 1;
                None
            }
        };

        if enrichment.is_none() && self.settings.degraded_policy == DegradedPolicy::Skip {
            debug!(url = %article.url, "Skipping degraded article");
            return;
        }

        let row = PersistedArticle::from_parts(&article, enrichment.as_ref(), Utc::now());
        match self.gateway.upsert(&row).await {
            Ok(()) if self.gateway.is_read_only() => {}
            Ok(()) => report.persisted += 1,
            Err(e) => {
                error!(url = %row.url, error = %e, "Article not persisted");
                report.failed += 1;
                report.unpersisted.push(row.url);
            }
        }
    }
}
