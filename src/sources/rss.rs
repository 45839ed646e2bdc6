//! RSS / Atom feed source

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{into_candidates, ArticlePageFetcher, CandidateStream, FetchOptions, RawEntry, Source, SourceMetadata};
use crate::config::{SourceConfig, SourceKind};
use crate::error::{PipelineError, Result};
use crate::http_client::SourceHttpClient;

/// Feed source parsed with `feed-rs`
pub struct RssSource {
    client: Arc<SourceHttpClient>,
    feed_url: String,
    metadata: SourceMetadata,
    page: Option<Arc<ArticlePageFetcher>>,
}

impl RssSource {
    pub fn new(
        config: &SourceConfig,
        client: Arc<SourceHttpClient>,
        page: Option<Arc<ArticlePageFetcher>>,
    ) -> Self {
        let metadata = SourceMetadata {
            id: config.id.clone(),
            name: format!("RSS feed {}", config.id),
            kind: SourceKind::Rss,
            language: config.language.clone(),
            fetches_full_text: page.is_some(),
        };

        Self {
            client,
            feed_url: config.url.clone(),
            metadata,
            page,
        }
    }
}

/// Parses a feed document into listing entries
pub fn parse_feed(bytes: &[u8]) -> std::result::Result<Vec<RawEntry>, feed_rs::parser::ParseFeedError> {
    let feed = feed_rs::parser::parse(bytes)?;

    Ok(feed
        .entries
        .into_iter()
        .map(|entry| RawEntry {
            title: entry.title.map(|t| t.content),
            url: entry.links.first().map(|l| l.href.clone()),
            body: entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content)),
            published_at: entry.published.or(entry.updated),
        })
        .collect())
}

#[async_trait]
impl Source for RssSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    async fn fetch(&self, options: FetchOptions) -> Result<CandidateStream> {
        let body = self
            .client
            .get_text(&self.feed_url)
            .await
            .map_err(|e| PipelineError::fetch(self.id(), e))?;

        let entries = parse_feed(body.as_bytes()).map_err(|e| PipelineError::fetch(self.id(), e))?;

        info!(source = %self.id(), entries = entries.len(), "Fetched feed");

        Ok(into_candidates(self.id(), entries, options.limit, self.page.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Markets</title>
    <link>https://example.com</link>
    <description>Market news</description>
    <item>
      <title>Acme beats estimates</title>
      <link>https://example.com/acme</link>
      <description>Acme Corp (ACME) reported record revenue.</description>
      <pubDate>Wed, 01 May 2024 14:30:00 GMT</pubDate>
    </item>
    <item>
      <title>No link here</title>
      <description>Orphan item.</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_rss_entries() {
        let entries = parse_feed(RSS.as_bytes()).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title.as_deref(), Some("Acme beats estimates"));
        assert_eq!(entries[0].url.as_deref(), Some("https://example.com/acme"));
        assert_eq!(
            entries[0].body.as_deref(),
            Some("Acme Corp (ACME) reported record revenue.")
        );
        assert_eq!(
            entries[0].published_at.map(|d| d.to_rfc3339()).as_deref(),
            Some("2024-05-01T14:30:00+00:00")
        );
        assert!(entries[1].url.is_none());
        assert!(entries[1].published_at.is_none());
    }

    #[test]
    fn test_invalid_feed_is_error() {
        assert!(parse_feed(b"not a feed").is_err());
    }
}
