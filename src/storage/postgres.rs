//! PostgreSQL backend

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use super::{ArticleStore, StoreError, StoreResult};
use crate::schemas::{Fingerprint, PersistedArticle};

static TABLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("static regex is valid"));

#[derive(Clone)]
pub struct PostgresStore {
    db: PgPool,
    table: String,
}

/// Rejects anything that cannot be interpolated as a plain identifier
pub fn validate_table_name(table: &str) -> StoreResult<()> {
    if TABLE_NAME.is_match(table) {
        Ok(())
    } else {
        Err(StoreError::Permanent(format!("invalid table name: {table:?}")))
    }
}

impl PostgresStore {
    pub async fn connect(database_url: &str, table: &str, max_connections: u32) -> StoreResult<Self> {
        validate_table_name(table)?;
        info!("Connecting to database...");

        let db = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        Ok(Self {
            db,
            table: table.to_string(),
        })
    }

    /// Creates the article table when missing
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                fingerprint     TEXT PRIMARY KEY,
                url             TEXT NOT NULL,
                title           TEXT NOT NULL,
                summary         TEXT,
                tags            TEXT[] NOT NULL DEFAULT '{{}}',
                tickers         TEXT[] NOT NULL DEFAULT '{{}}',
                subsector       TEXT,
                dimensions      JSONB,
                sentiment       TEXT,
                score           INTEGER,
                enriched_by     TEXT,
                source_id       TEXT NOT NULL,
                published_at    TIMESTAMPTZ,
                first_seen_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            table = self.table
        );
        sqlx::query(&ddl).execute(&self.db).await?;
        debug!(table = %self.table, "Schema ensured");
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn upsert(&self, article: &PersistedArticle) -> StoreResult<()> {
        // runtime query; enrichment columns only move when the new row has a summary
        let sql = format!(
            r#"
            INSERT INTO {table} AS t
                (fingerprint, url, title, summary, tags, tickers, subsector, dimensions,
                 sentiment, score, enriched_by, source_id, published_at, first_seen_at, last_updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (fingerprint) DO UPDATE SET
                url = EXCLUDED.url,
                title = EXCLUDED.title,
                source_id = EXCLUDED.source_id,
                published_at = COALESCE(EXCLUDED.published_at, t.published_at),
                last_updated_at = EXCLUDED.last_updated_at,
                summary = COALESCE(EXCLUDED.summary, t.summary),
                tags = CASE WHEN EXCLUDED.summary IS NULL THEN t.tags ELSE EXCLUDED.tags END,
                tickers = CASE WHEN EXCLUDED.summary IS NULL THEN t.tickers ELSE EXCLUDED.tickers END,
                subsector = CASE WHEN EXCLUDED.summary IS NULL THEN t.subsector ELSE EXCLUDED.subsector END,
                dimensions = CASE WHEN EXCLUDED.summary IS NULL THEN t.dimensions ELSE EXCLUDED.dimensions END,
                sentiment = CASE WHEN EXCLUDED.summary IS NULL THEN t.sentiment ELSE EXCLUDED.sentiment END,
                score = CASE WHEN EXCLUDED.summary IS NULL THEN t.score ELSE EXCLUDED.score END,
                enriched_by = CASE WHEN EXCLUDED.summary IS NULL THEN t.enriched_by ELSE EXCLUDED.enriched_by END
            "#,
            table = self.table
        );

        sqlx::query(&sql)
            .bind(article.fingerprint.as_str())
            .bind(&article.url)
            .bind(&article.title)
            .bind(&article.summary)
            .bind(&article.tags)
            .bind(&article.tickers)
            .bind(&article.subsector)
            .bind(article.dimensions.map(Json))
            .bind(article.sentiment.map(|s| s.as_str()))
            .bind(article.score)
            .bind(&article.enriched_by)
            .bind(&article.source_id)
            .bind(article.published_at)
            .bind(article.first_seen_at)
            .bind(article.last_updated_at)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn load_known_fingerprints(&self) -> StoreResult<HashSet<Fingerprint>> {
        let sql = format!("SELECT fingerprint FROM {} WHERE summary IS NOT NULL", self.table);
        let rows: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&self.db).await?;
        Ok(rows.into_iter().map(Fingerprint::from_hex).collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}
