//! NewsAPI Data Source
//!
//! Reads any NewsAPI-compatible endpoint
//! https://newsapi.org/docs/endpoints/everything

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{into_candidates, parse_date, ArticlePageFetcher, CandidateStream, FetchOptions, RawEntry, Source, SourceMetadata};
use crate::config::{SourceConfig, SourceKind};
use crate::error::{PipelineError, Result};
use crate::http_client::SourceHttpClient;

/// Matches the "… [+1234 chars]" tail NewsAPI appends to truncated content
static TRUNCATION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(…|\.\.\.)?\s*\[\+\d+ chars\]\s*$").expect("static regex is valid"));

/// NewsAPI response structures
#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    status: String,
    #[serde(rename = "totalResults")]
    total_results: Option<u32>,
    #[serde(default)]
    articles: Vec<serde_json::Value>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsArticle {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "publishedAt")]
    pub published_at: Option<String>,
}

impl NewsArticle {
    fn into_entry(self) -> RawEntry {
        let content = self
            .content
            .map(|c| TRUNCATION_MARKER.replace(&c, "").into_owned())
            .filter(|c| !c.trim().is_empty());

        RawEntry {
            title: self.title,
            url: self.url,
            body: content.or(self.description),
            published_at: self.published_at.as_deref().and_then(parse_date),
        }
    }
}

/// NewsAPI data source
pub struct NewsApiSource {
    client: Arc<SourceHttpClient>,
    endpoint: String,
    api_key: Option<String>,
    metadata: SourceMetadata,
    page: Option<Arc<ArticlePageFetcher>>,
}

impl NewsApiSource {
    /// Creates a new NewsAPI source
    pub fn new(
        config: &SourceConfig,
        client: Arc<SourceHttpClient>,
        page: Option<Arc<ArticlePageFetcher>>,
    ) -> Self {
        let metadata = SourceMetadata {
            id: config.id.clone(),
            name: format!("NewsAPI {}", config.id),
            kind: SourceKind::NewsApi,
            language: config.language.clone(),
            fetches_full_text: page.is_some(),
        };

        Self {
            client,
            endpoint: config.url.clone(),
            api_key: config.api_key.clone(),
            metadata,
            page,
        }
    }

    /// Fetches the article listing
    pub async fn fetch_listing(&self, options: &FetchOptions) -> Result<Vec<RawEntry>> {
        let mut params: Vec<(&str, String)> = vec![
            ("sortBy", "publishedAt".to_string()),
            ("pageSize", options.limit.unwrap_or(100).min(100).to_string()),
        ];
        if let Some(query) = &options.query {
            params.push(("q", query.clone()));
        }
        if let Some(code) = language_code(&self.metadata.language) {
            params.push(("language", code.to_string()));
        }

        debug!(source = %self.id(), query = ?options.query, "Fetching news");

        let text = self
            .client
            .fetch_text(|c| {
                let request = c.get(&self.endpoint).query(&params);
                match &self.api_key {
                    Some(key) => request.header("X-Api-Key", key),
                    None => request,
                }
            })
            .await?;

        let response: NewsApiResponse = serde_json::from_str(&text)?;

        if response.status != "ok" {
            return Err(PipelineError::ApiError {
                code: response.code.unwrap_or_else(|| "unknown".to_string()),
                message: response.message.unwrap_or_else(|| "Unknown error".to_string()),
            });
        }

        debug!(source = %self.id(), total = ?response.total_results, "NewsAPI listing received");

        let entries = response
            .articles
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| match serde_json::from_value::<NewsArticle>(value) {
                Ok(article) => Some(article.into_entry()),
                Err(e) => {
                    warn!(source = %self.id(), index, error = %e, "Skipping malformed article");
                    None
                }
            })
            .collect();

        Ok(entries)
    }
}

/// ISO-639-1 code for the tokenizer language names NewsAPI understands
fn language_code(language: &str) -> Option<&'static str> {
    match language.to_lowercase().as_str() {
        "english" => Some("en"),
        "german" => Some("de"),
        "french" => Some("fr"),
        "spanish" => Some("es"),
        "italian" => Some("it"),
        "dutch" => Some("nl"),
        "norwegian" => Some("no"),
        "portuguese" => Some("pt"),
        "russian" => Some("ru"),
        "swedish" => Some("sv"),
        _ => None,
    }
}

#[async_trait]
impl Source for NewsApiSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    async fn fetch(&self, options: FetchOptions) -> Result<CandidateStream> {
        let entries = self
            .fetch_listing(&options)
            .await
            .map_err(|e| PipelineError::fetch(self.id(), e))?;

        info!(source = %self.id(), articles = entries.len(), "Fetched news articles");

        Ok(into_candidates(self.id(), entries, options.limit, self.page.clone()))
    }
}
