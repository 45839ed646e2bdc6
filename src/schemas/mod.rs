//! Shared Schemas for the news pipeline
//!
//! Data flows through these types in order:
//! `ArticleCandidate` → `NormalizedArticle` → (`EnrichmentResult`) → `PersistedArticle`.
//! Only `PersistedArticle` outlives a run.

pub mod article;
pub mod common;
pub mod enrichment;

pub use article::*;
pub use common::*;
pub use enrichment::*;
