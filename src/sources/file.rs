//! Local file source
//!
//! Replays an export of `{title, url, body}` records, either as a JSON array
//! or as JSON lines.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::{into_candidates, ArticlePageFetcher, CandidateStream, FetchOptions, RawEntry, Source, SourceMetadata};
use crate::config::SourceKind;
use crate::error::{PipelineError, Result};

enum Backing {
    Path(PathBuf),
    Inline(Vec<RawEntry>),
}

pub struct FileSource {
    backing: Backing,
    metadata: SourceMetadata,
    page: Option<Arc<ArticlePageFetcher>>,
}

impl FileSource {
    pub fn new(id: &str, path: impl Into<PathBuf>, language: &str) -> Self {
        Self {
            backing: Backing::Path(path.into()),
            metadata: Self::metadata_for(id, language),
            page: None,
        }
    }

    /// Source over in-memory entries
    pub fn from_entries(id: &str, entries: Vec<RawEntry>) -> Self {
        Self {
            backing: Backing::Inline(entries),
            metadata: Self::metadata_for(id, "english"),
            page: None,
        }
    }

    /// Downloads each record's page for its full text
    pub fn with_page(mut self, page: Option<Arc<ArticlePageFetcher>>) -> Self {
        self.metadata.fetches_full_text = page.is_some();
        self.page = page;
        self
    }

    fn metadata_for(id: &str, language: &str) -> SourceMetadata {
        SourceMetadata {
            id: id.to_string(),
            name: format!("File {id}"),
            kind: SourceKind::File,
            language: language.to_string(),
            fetches_full_text: false,
        }
    }
}

/// Parses a JSON array or JSON-lines document; bad records are skipped
pub fn parse_records(source_id: &str, text: &str) -> Result<Vec<RawEntry>> {
    let trimmed = text.trim_start();

    let values: Vec<serde_json::Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(line_no, line)| match serde_json::from_str(line) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(source = %source_id, line = line_no + 1, error = %e, "Skipping malformed line");
                    None
                }
            })
            .collect()
    };

    Ok(values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<RawEntry>(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(source = %source_id, index, error = %e, "Skipping malformed record");
                None
            }
        })
        .collect())
}

#[async_trait]
impl Source for FileSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    async fn fetch(&self, options: FetchOptions) -> Result<CandidateStream> {
        let entries = match &self.backing {
            Backing::Inline(entries) => entries.clone(),
            Backing::Path(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| PipelineError::fetch(self.id(), format!("{}: {e}", path.display())))?;
                parse_records(self.id(), &text).map_err(|e| PipelineError::fetch(self.id(), e))?
            }
        };

        info!(source = %self.id(), records = entries.len(), "Loaded file records");

        Ok(into_candidates(self.id(), entries, options.limit, self.page.clone()))
    }
}
