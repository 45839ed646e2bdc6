//! News Pipeline
//! Scheduled news ingestion with LLM enrichment and idempotent persistence
//!
//! Features:
//! - RSS, NewsAPI and file sources with optional full-text page fetching
//! - Punkt sentence tokenization and HTML/whitespace normalization
//! - Content-fingerprint deduplication against stored and in-run articles
//! - LLM enrichment over a rotating pool of credentials with cool-downs
//! - Exponential backoff with jitter for transient failures
//! - Idempotent upserts to PostgreSQL or a PostgREST endpoint
//! - Per-source reports, run status and process exit code
//! - Graceful shutdown with SIGTERM handling and a wall-clock deadline

pub mod config;
pub mod dedup;
pub mod enrich;
pub mod error;
pub mod http_client;
pub mod normalize;
pub mod pipeline;
pub mod retry;
pub mod schemas;
pub mod sources;
pub mod storage;

pub use config::{Config, RunMode, SourceCount};
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, RunStatus, RunSummary};
