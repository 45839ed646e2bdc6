//! News sources
//!
//! Each source implements the `Source` trait and yields a lazy, finite stream
//! of `ArticleCandidate`s. A source either fails as a whole (`FetchError`) or
//! produces a stream; malformed items inside the stream are skipped and logged.

pub mod file;
pub mod newsapi;
pub mod page;
pub mod rss;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{SourceConfig, SourceKind};
use crate::error::Result;
use crate::http_client::{ResilientHttpClient, SourceHttpClient};
use crate::schemas::ArticleCandidate;

pub use file::FileSource;
pub use newsapi::NewsApiSource;
pub use page::ArticlePageFetcher;
pub use rss::RssSource;

/// Candidates in fetch order; consumed once
pub type CandidateStream = BoxStream<'static, ArticleCandidate>;

/// Metadata about a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Unique identifier for the source
    pub id: String,
    /// Human-readable name
    pub name: String,
    pub kind: SourceKind,
    /// Tokenizer language for the articles of this source
    pub language: String,
    /// Whether article pages are downloaded for their full text
    pub fetches_full_text: bool,
}

/// Options for fetching data
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Maximum number of candidates to yield
    pub limit: Option<usize>,
    /// Query/search term
    pub query: Option<String>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Options declared on a source's configuration
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            limit: config.max_items,
            query: config.query.clone(),
        }
    }
}

/// Trait for all news sources
#[async_trait]
pub trait Source: Send + Sync {
    /// Gets metadata about this source
    fn metadata(&self) -> &SourceMetadata;

    /// Fetches the listing and returns the candidate stream.
    ///
    /// Errors here are source-level failures; per-item problems never surface
    /// as errors.
    async fn fetch(&self, options: FetchOptions) -> Result<CandidateStream>;

    /// Gets the source ID
    fn id(&self) -> &str {
        &self.metadata().id
    }
}

/// One listing item before validation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "RawRecord")]
pub struct RawEntry {
    pub title: Option<String>,
    pub url: Option<String>,
    pub body: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl RawEntry {
    pub fn new(title: &str, url: &str, body: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            url: Some(url.to_string()),
            body: Some(body.to_string()),
            published_at: None,
        }
    }
}

/// Exported record shape; exports often carry several body and link columns
#[derive(Debug, Default, Deserialize)]
struct RawRecord {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default, rename = "publishedAt")]
    published_at_camel: Option<String>,
    #[serde(default, rename = "pubDate")]
    pub_date: Option<String>,
}

impl From<RawRecord> for RawEntry {
    fn from(record: RawRecord) -> Self {
        Self {
            title: record.title,
            url: non_empty(record.url).or(record.link),
            body: non_empty(record.body)
                .or_else(|| non_empty(record.content))
                .or(record.description),
            published_at: [record.published_at, record.published_at_camel, record.pub_date]
                .into_iter()
                .flatten()
                .find_map(|date| parse_date(&date)),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// RFC 3339 (`2024-05-01T14:30:00Z`) or RFC 2822 (`Wed, 01 May 2024 14:30:00 GMT`)
pub(crate) fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Turns listing entries into the candidate stream shared by all adapters.
///
/// Entries without a URL or without a body are skipped. When a page fetcher
/// is given, each article page is downloaded as the stream is polled and its
/// text replaces the listing body; a failed download keeps the listing body.
pub(crate) fn into_candidates(
    source_id: &str,
    entries: Vec<RawEntry>,
    limit: Option<usize>,
    page: Option<Arc<ArticlePageFetcher>>,
) -> CandidateStream {
    let source_id: Arc<str> = Arc::from(source_id);
    let limit = limit.unwrap_or(usize::MAX);

    stream::iter(entries.into_iter().enumerate())
        .filter_map(move |(index, entry)| {
            let source_id = source_id.clone();
            let page = page.clone();
            async move {
                let Some(url) = non_empty(entry.url) else {
                    warn!(source = %source_id, index, "Skipping entry without URL");
                    return None;
                };
                let title = non_empty(entry.title).unwrap_or_default();
                let mut body = non_empty(entry.body);

                if let Some(page) = page {
                    match page.fetch_article_text(&url).await {
                        Ok(Some(text)) => body = Some(text),
                        Ok(None) => {
                            debug!(source = %source_id, url = %url, "No article text found on page");
                        }
                        Err(e) => {
                            warn!(source = %source_id, url = %url, error = %e, "Article page fetch failed");
                        }
                    }
                }

                let Some(body) = body else {
                    warn!(source = %source_id, url = %url, title = %title, "Skipping entry without body");
                    return None;
                };

                Some(ArticleCandidate::new(source_id.as_ref(), url, title, body).with_published_at(entry.published_at))
            }
        })
        .take(limit)
        .boxed()
}

/// Builds the adapter for a configured source
pub fn build_source(
    config: &SourceConfig,
    http: Arc<ResilientHttpClient>,
) -> Result<Arc<dyn Source>> {
    let client = Arc::new(SourceHttpClient::new(http, &config.id, config.rate_limit_rpm));
    let page = if config.fetch_full_text {
        Some(Arc::new(ArticlePageFetcher::new(
            client.clone(),
            config.body_selector.as_deref(),
        )?))
    } else {
        None
    };

    let source: Arc<dyn Source> = match config.kind {
        SourceKind::Rss => Arc::new(RssSource::new(config, client, page)),
        SourceKind::NewsApi => Arc::new(NewsApiSource::new(config, client, page)),
        SourceKind::File => Arc::new(FileSource::new(&config.id, &config.url, &config.language).with_page(page)),
    };
    Ok(source)
}
