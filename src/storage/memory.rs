//! In-process store for dry runs and tests

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use super::{ArticleStore, StoreResult};
use crate::schemas::{Fingerprint, PersistedArticle};

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<Fingerprint, PersistedArticle>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with rows
    pub fn with_rows(rows: impl IntoIterator<Item = PersistedArticle>) -> Self {
        Self {
            rows: RwLock::new(rows.into_iter().map(|r| (r.fingerprint.clone(), r)).collect()),
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<PersistedArticle> {
        self.rows.read().get(fingerprint).cloned()
    }

    /// All rows, ordered by first sighting
    pub fn rows(&self) -> Vec<PersistedArticle> {
        let mut rows: Vec<_> = self.rows.read().values().cloned().collect();
        rows.sort_by(|a, b| a.first_seen_at.cmp(&b.first_seen_at).then(a.url.cmp(&b.url)));
        rows
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, article: &PersistedArticle) -> StoreResult<()> {
        let mut rows = self.rows.write();
        match rows.get_mut(&article.fingerprint) {
            Some(existing) => existing.merge_update(article),
            None => {
                rows.insert(article.fingerprint.clone(), article.clone());
            }
        }
        Ok(())
    }

    async fn load_known_fingerprints(&self) -> StoreResult<HashSet<Fingerprint>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|row| !row.is_degraded())
            .map(|row| row.fingerprint.clone())
            .collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
