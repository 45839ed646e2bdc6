//! Article schemas
//!
//! Represents an article at each stage of a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::{Fingerprint, Sentiment};
use super::enrichment::{Dimensions, EnrichmentResult};

/// Raw article as produced by a source adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleCandidate {
    pub source_id: String,
    pub url: String,
    pub raw_title: String,
    pub raw_body: String,
    /// Publication time reported by the source, when it has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

impl ArticleCandidate {
    pub fn new(
        source_id: impl Into<String>,
        url: impl Into<String>,
        raw_title: impl Into<String>,
        raw_body: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            url: url.into(),
            raw_title: raw_title.into(),
            raw_body: raw_body.into(),
            published_at: None,
            fetched_at: Utc::now(),
        }
    }

    pub fn with_published_at(mut self, published_at: Option<DateTime<Utc>>) -> Self {
        self.published_at = published_at;
        self
    }
}

/// Cleaned, segmented and fingerprinted article
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedArticle {
    pub source_id: String,
    /// Canonical URL
    pub url: String,
    pub title: String,
    /// Sentences in document order
    pub sentences: Vec<String>,
    pub content_fingerprint: Fingerprint,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl NormalizedArticle {
    /// Normalized body text, sentences joined by single spaces
    pub fn body(&self) -> String {
        self.sentences.join(" ")
    }

    /// Host of the article URL without a leading `www.`
    pub fn domain(&self) -> Option<String> {
        let url = url::Url::parse(&self.url).ok()?;
        let host = url.host_str()?;
        Some(host.strip_prefix("www.").unwrap_or(host).to_string())
    }
}

/// The durable row, keyed by fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PersistedArticle {
    pub fingerprint: Fingerprint,
    pub url: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subsector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enriched_by: Option<String>,
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl PersistedArticle {
    /// Builds the row for an article; `enrichment` is `None` for degraded articles
    pub fn from_parts(
        article: &NormalizedArticle,
        enrichment: Option<&EnrichmentResult>,
        now: DateTime<Utc>,
    ) -> Self {
        let title = if article.title.is_empty() {
            enrichment
                .and_then(|e| e.headline.clone())
                .or_else(|| article.sentences.first().cloned())
                .unwrap_or_default()
        } else {
            article.title.clone()
        };

        Self {
            fingerprint: article.content_fingerprint.clone(),
            url: article.url.clone(),
            title,
            summary: enrichment.map(|e| e.summary.clone()),
            tags: enrichment.map(|e| e.tags.clone()).unwrap_or_default(),
            tickers: enrichment.map(|e| e.tickers.clone()).unwrap_or_default(),
            subsector: enrichment.and_then(|e| e.subsector.clone()),
            dimensions: enrichment.map(|e| e.dimensions),
            sentiment: enrichment.and_then(|e| e.sentiment),
            score: enrichment.and_then(|e| e.score).map(i32::from),
            enriched_by: enrichment.map(|e| e.provider_used.clone()),
            source_id: article.source_id.clone(),
            published_at: article.published_at,
            first_seen_at: now,
            last_updated_at: now,
        }
    }

    /// True when the row carries no enrichment fields
    pub fn is_degraded(&self) -> bool {
        self.summary.is_none()
    }

    /// Applies a re-write of the same fingerprint onto an existing row.
    ///
    /// `first_seen_at` never moves and a degraded re-write keeps the existing
    /// enrichment.
    pub fn merge_update(&mut self, incoming: &PersistedArticle) {
        self.url = incoming.url.clone();
        self.title = incoming.title.clone();
        self.source_id = incoming.source_id.clone();
        self.published_at = incoming.published_at.or(self.published_at);
        self.last_updated_at = incoming.last_updated_at;
        if !incoming.is_degraded() {
            self.summary = incoming.summary.clone();
            self.tags = incoming.tags.clone();
            self.tickers = incoming.tickers.clone();
            self.subsector = incoming.subsector.clone();
            self.dimensions = incoming.dimensions;
            self.sentiment = incoming.sentiment;
            self.score = incoming.score;
            self.enriched_by = incoming.enriched_by.clone();
        }
    }
}
