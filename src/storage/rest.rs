//! PostgREST backend (Supabase and friends)
//!
//! Upserts go through `POST /{table}?on_conflict=fingerprint` with
//! `Prefer: resolution=merge-duplicates`. PostgREST only updates the columns
//! present in the payload, so `first_seen_at` is never sent (the column
//! default fills it on insert) and degraded rows omit the enrichment columns.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use super::{ArticleStore, StoreError, StoreResult};
use crate::error::{PipelineError, Result};
use crate::http_client::truncate;
use crate::schemas::{Fingerprint, PersistedArticle};

const PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
struct FingerprintRow {
    fingerprint: String,
}

pub struct RestStore {
    client: Client,
    endpoint: String,
    key: Option<String>,
}

impl RestStore {
    /// `base_url` is the project URL or its `/rest/v1` root
    pub fn new(base_url: &str, key: Option<&str>, table: &str, timeout: Duration) -> Result<Self> {
        super::postgres::validate_table_name(table)
            .map_err(|e| PipelineError::ConfigError(e.to_string()))?;

        let base = base_url.trim_end_matches('/');
        let root = if base.ends_with("/rest/v1") {
            base.to_string()
        } else {
            format!("{base}/rest/v1")
        };

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{root}/{table}"),
            key: key.map(str::to_string),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }

    /// Payload for one row
    pub fn row_payload(article: &PersistedArticle) -> Value {
        let mut row = Map::new();
        row.insert("fingerprint".into(), json!(article.fingerprint));
        row.insert("url".into(), json!(article.url));
        row.insert("title".into(), json!(article.title));
        row.insert("source_id".into(), json!(article.source_id));
        row.insert("last_updated_at".into(), json!(article.last_updated_at));
        if let Some(published_at) = article.published_at {
            row.insert("published_at".into(), json!(published_at));
        }

        if !article.is_degraded() {
            row.insert("summary".into(), json!(article.summary));
            row.insert("tags".into(), json!(article.tags));
            row.insert("tickers".into(), json!(article.tickers));
            row.insert("subsector".into(), json!(article.subsector));
            row.insert("dimensions".into(), json!(article.dimensions));
            row.insert("sentiment".into(), json!(article.sentiment));
            row.insert("score".into(), json!(article.score));
            row.insert("enriched_by".into(), json!(article.enriched_by));
        }

        Value::Object(row)
    }
}

async fn check_status(response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{status}: {}", truncate(&body, 300));
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Err(StoreError::Transient(message))
    } else {
        Err(StoreError::Permanent(message))
    }
}

#[async_trait]
impl ArticleStore for RestStore {
    fn backend(&self) -> &'static str {
        "rest"
    }

    async fn upsert(&self, article: &PersistedArticle) -> StoreResult<()> {
        let request = self
            .client
            .post(&self.endpoint)
            .query(&[("on_conflict", "fingerprint")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[Self::row_payload(article)]);

        check_status(self.authorize(request).send().await?).await?;
        Ok(())
    }

    async fn load_known_fingerprints(&self) -> StoreResult<HashSet<Fingerprint>> {
        let mut known = HashSet::new();
        let mut offset = 0usize;

        loop {
            let request = self.client.get(&self.endpoint).query(&[
                ("select", "fingerprint".to_string()),
                ("summary", "not.is.null".to_string()),
                ("order", "fingerprint".to_string()),
                ("limit", PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
            ]);

            let response = check_status(self.authorize(request).send().await?).await?;
            let rows: Vec<FingerprintRow> = response.json().await?;
            let count = rows.len();
            known.extend(rows.into_iter().map(|r| Fingerprint::from_hex(r.fingerprint)));

            debug!(offset, count, "Loaded fingerprint page");
            if count < PAGE_SIZE {
                return Ok(known);
            }
            offset += count;
        }
    }

    async fn health_check(&self) -> StoreResult<()> {
        let request = self
            .client
            .get(&self.endpoint)
            .query(&[("select", "fingerprint"), ("limit", "1")]);
        check_status(self.authorize(request).send().await?).await?;
        Ok(())
    }
}
