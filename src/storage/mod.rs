//! Persistence Gateway
//!
//! Upserts articles keyed by content fingerprint. The backing store enforces
//! fingerprint uniqueness; the gateway adds bounded retries and the dry-run
//! switch.

pub mod memory;
pub mod postgres;
pub mod rest;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, RunMode, StoreBackend};
use crate::error::{PipelineError, Result};
use crate::retry::{with_jitter, FailureKind, RetryAction, RetryPolicy};
use crate::schemas::{Fingerprint, PersistedArticle};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use rest::RestStore;

/// Store failure, classified for the retry policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(String),

    #[error("permanent store error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StoreError::Transient(_) => FailureKind::Transient,
            StoreError::Permanent(_) => FailureKind::Permanent,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        let transient = match &e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            // connection exceptions, serialization failures, insufficient resources
            sqlx::Error::Database(db) => db
                .code()
                .is_some_and(|code| code.starts_with("08") || code.starts_with("40") || code.starts_with("53")),
            _ => false,
        };
        if transient {
            StoreError::Transient(e.to_string())
        } else {
            StoreError::Permanent(e.to_string())
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            StoreError::Transient(e.to_string())
        } else {
            StoreError::Permanent(e.to_string())
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A store keyed by content fingerprint
#[async_trait]
pub trait ArticleStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Insert-or-update on fingerprint. `first_seen_at` is only written on
    /// insert and a degraded row never erases stored enrichment.
    async fn upsert(&self, article: &PersistedArticle) -> StoreResult<()>;

    /// Fingerprints of rows that already carry enrichment
    async fn load_known_fingerprints(&self) -> StoreResult<HashSet<Fingerprint>>;

    async fn health_check(&self) -> StoreResult<()>;
}

pub struct PersistenceGateway {
    store: Arc<dyn ArticleStore>,
    retry: RetryPolicy,
    read_only: bool,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn ArticleStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            read_only: false,
        }
    }

    /// Reads still go to the store; writes are logged and dropped
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Connects the configured backend and checks it is reachable
    pub async fn connect(config: &Config, mode: RunMode) -> Result<Self> {
        let backend = match config.resolved_backend() {
            Some(backend) => backend,
            None if config.database_url.is_none() => StoreBackend::Memory,
            None => {
                return Err(PipelineError::ConfigError(
                    "cannot infer store backend from DATABASE_URL; set store_backend".to_string(),
                ))
            }
        };

        let store: Arc<dyn ArticleStore> = match backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Postgres => {
                let url = required_url(config)?;
                let store = PostgresStore::connect(url, &config.database_table, config.max_concurrency as u32 + 1)
                    .await
                    .map_err(unreachable)?;
                if mode.writes() {
                    store.ensure_schema().await.map_err(unreachable)?;
                }
                Arc::new(store)
            }
            StoreBackend::Rest => {
                let url = required_url(config)?;
                Arc::new(RestStore::new(
                    url,
                    config.database_key.as_deref(),
                    &config.database_table,
                    Duration::from_secs(config.http_timeout_secs),
                )?)
            }
        };

        store.health_check().await.map_err(unreachable)?;
        info!(backend = store.backend(), "Store reachable");

        let gateway = Self::new(store, config.retry_policy());
        Ok(if mode.writes() { gateway } else { gateway.read_only() })
    }

    /// Loads the fingerprints used by the deduplicator, with retries
    pub async fn load_known_fingerprints(&self) -> Result<HashSet<Fingerprint>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.store.load_known_fingerprints().await {
                Ok(known) => {
                    info!(count = known.len(), "Loaded known fingerprints");
                    return Ok(known);
                }
                Err(e) => match self.retry.decide(attempt, e.kind(), false) {
                    RetryAction::RetrySame { delay } => {
                        warn!(attempt, error = %e, "Loading fingerprints failed, retrying");
                        tokio::time::sleep(with_jitter(delay)).await;
                    }
                    RetryAction::AdvanceNext | RetryAction::Fail => return Err(unreachable(e)),
                },
            }
        }
    }

    /// Upserts one article, retrying transient failures.
    ///
    /// A failure after the retry budget is returned as `PersistenceError` so
    /// the caller can report the article as unpersisted.
    #[instrument(skip(self, article), fields(fingerprint = %article.fingerprint.short()))]
    pub async fn upsert(&self, article: &PersistedArticle) -> Result<()> {
        if self.read_only {
            debug!(url = %article.url, degraded = article.is_degraded(), "Dry run, not writing");
            return Ok(());
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.store.upsert(article).await {
                Ok(()) => {
                    debug!(attempt, "Article persisted");
                    return Ok(());
                }
                Err(e) => match self.retry.decide(attempt, e.kind(), false) {
                    RetryAction::RetrySame { delay } => {
                        warn!(attempt, error = %e, "Upsert failed, retrying");
                        tokio::time::sleep(with_jitter(delay)).await;
                    }
                    RetryAction::AdvanceNext | RetryAction::Fail => {
                        return Err(PipelineError::PersistenceError {
                            fingerprint: article.fingerprint.to_string(),
                            message: e.to_string(),
                        });
                    }
                },
            }
        }
    }
}

fn required_url(config: &Config) -> Result<&str> {
    config
        .database_url
        .as_deref()
        .ok_or_else(|| PipelineError::ConfigError("DATABASE_URL is required for this backend".to_string()))
}

fn unreachable(e: StoreError) -> PipelineError {
    PipelineError::ResourceUnavailable(format!("database unreachable: {e}"))
}
