//! Run reporting

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;

use crate::config::RunMode;

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::CompletedWithErrors | Self::Failed)
    }

    /// Process exit code; only a failed setup is non-zero
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Failed => 1,
            _ => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Completed,
    CompletedWithErrors,
    /// The listing could not be fetched
    Failed,
}

/// Counters and failures for one source
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub status: SourceStatus,
    pub fetched: usize,
    pub deduplicated: usize,
    pub enriched: usize,
    pub degraded: usize,
    pub persisted: usize,
    pub failed: usize,
    /// Articles that could not be written after retries
    pub unpersisted: Vec<String>,
    /// Stopped early by the deadline or a signal
    pub interrupted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceReport {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            status: SourceStatus::Completed,
            fetched: 0,
            deduplicated: 0,
            enriched: 0,
            degraded: 0,
            persisted: 0,
            failed: 0,
            unpersisted: Vec::new(),
            interrupted: false,
            error: None,
        }
    }

    pub fn fetch_failed(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self.status = SourceStatus::Failed;
        self
    }

    /// Settles the status from the counters
    pub fn finish(mut self) -> Self {
        if self.status != SourceStatus::Failed && (self.failed > 0 || self.interrupted) {
            self.status = SourceStatus::CompletedWithErrors;
        }
        self
    }

    pub fn is_clean(&self) -> bool {
        self.status == SourceStatus::Completed
    }
}

/// Sum of all source counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub fetched: usize,
    pub deduplicated: usize,
    pub enriched: usize,
    pub degraded: usize,
    pub persisted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub totals: Totals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub fn new(
        run_id: &str,
        mode: RunMode,
        started_at: DateTime<Utc>,
        sources: Vec<SourceReport>,
    ) -> Self {
        let status = if sources.iter().all(SourceReport::is_clean) {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithErrors
        };
        let totals = sources.iter().fold(Totals::default(), |mut t, s| {
            t.fetched += s.fetched;
            t.deduplicated += s.deduplicated;
            t.enriched += s.enriched;
            t.degraded += s.degraded;
            t.persisted += s.persisted;
            t.failed += s.failed;
            t
        });

        Self {
            run_id: run_id.to_string(),
            mode: mode_name(mode).to_string(),
            status,
            started_at,
            finished_at: Utc::now(),
            sources,
            totals,
            error: None,
        }
    }

    /// Summary of a run that never got going
    pub fn failed(run_id: &str, mode: RunMode, started_at: DateTime<Utc>, error: impl ToString) -> Self {
        Self {
            run_id: run_id.to_string(),
            mode: mode_name(mode).to_string(),
            status: RunStatus::Failed,
            started_at,
            finished_at: Utc::now(),
            sources: Vec::new(),
            totals: Totals::default(),
            error: Some(error.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Plain-text table for terminals
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {} ({}) {} in {}s",
            self.run_id,
            self.mode,
            self.status.as_str(),
            (self.finished_at - self.started_at).num_seconds()
        );
        if let Some(error) = &self.error {
            let _ = writeln!(out, "error: {error}");
        }
        if self.sources.is_empty() {
            return out;
        }

        let _ = writeln!(
            out,
            "{:<20} {:<22} {:>7} {:>7} {:>8} {:>8} {:>9} {:>6}",
            "source", "status", "fetched", "dedup", "enriched", "degraded", "persisted", "failed"
        );
        for s in &self.sources {
            let status = match (s.status, s.interrupted) {
                (SourceStatus::Completed, _) => "completed",
                (SourceStatus::CompletedWithErrors, true) => "interrupted",
                (SourceStatus::CompletedWithErrors, false) => "completed_with_errors",
                (SourceStatus::Failed, _) => "failed",
            };
            let _ = writeln!(
                out,
                "{:<20} {:<22} {:>7} {:>7} {:>8} {:>8} {:>9} {:>6}",
                s.source_id, status, s.fetched, s.deduplicated, s.enriched, s.degraded, s.persisted, s.failed
            );
        }
        let t = &self.totals;
        let _ = writeln!(
            out,
            "{:<20} {:<22} {:>7} {:>7} {:>8} {:>8} {:>9} {:>6}",
            "total", "", t.fetched, t.deduplicated, t.enriched, t.degraded, t.persisted, t.failed
        );

        for s in &self.sources {
            if let Some(error) = &s.error {
                let _ = writeln!(out, "{}: {error}", s.source_id);
            }
            for url in &s.unpersisted {
                let _ = writeln!(out, "{}: not persisted {url}", s.source_id);
            }
        }
        out
    }
}

fn mode_name(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Pipeline => "pipeline",
        RunMode::DryRun => "dry-run",
        RunMode::ScrapeOnly => "scrape-only",
    }
}
