//! Deduplication Module
//!
//! Drops articles whose content fingerprint is already known:
//! - fingerprints loaded from the store once per run
//! - fingerprints seen earlier in the same run, from any source
//!
//! The store's uniqueness constraint stays the authority; this filter only
//! avoids needless enrichment calls.

use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

use crate::schemas::Fingerprint;

/// Query parameters that never identify content
const TRACKING_PARAMS: &[&str] = &[
    "utm_source", "utm_medium", "utm_campaign", "utm_term", "utm_content",
    "fbclid", "gclid", "msclkid", "ref", "mc_cid", "mc_eid",
    "_ga", "_gl", "yclid", "twclid", "cmpid", "ocid", "guccounter",
];

/// Canonicalizes a URL for storage
pub fn canonicalize_url(url_str: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(url_str.trim())?;

    // Remove fragment
    url.set_fragment(None);

    // Parse, filter, and sort query params
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.to_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    // Clear and rebuild query string
    url.set_query(None);
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }

    Ok(url.to_string())
}

/// Fingerprint filter for one run
#[derive(Debug, Default)]
pub struct Deduplicator {
    /// Fingerprints already stored with enrichment
    known: HashSet<Fingerprint>,
    /// Fingerprints emitted during this run
    seen: RwLock<HashSet<Fingerprint>>,
}

impl Deduplicator {
    pub fn new(known: HashSet<Fingerprint>) -> Self {
        Self {
            known,
            seen: RwLock::new(HashSet::new()),
        }
    }

    /// Checks without marking
    pub fn is_duplicate(&self, fingerprint: &Fingerprint) -> bool {
        self.known.contains(fingerprint) || self.seen.read().contains(fingerprint)
    }

    /// Records a fingerprint as seen in this run
    pub fn mark_seen(&self, fingerprint: &Fingerprint) {
        self.seen.write().insert(fingerprint.clone());
    }

    /// Atomically checks and marks.
    ///
    /// Returns true if the fingerprint was already known or seen. Two sources
    /// racing on the same body get exactly one `false`.
    pub fn check_and_mark(&self, fingerprint: &Fingerprint) -> bool {
        if self.known.contains(fingerprint) {
            debug!(fingerprint = %fingerprint.short(), "Already stored");
            return true;
        }
        let duplicate = !self.seen.write().insert(fingerprint.clone());
        if duplicate {
            debug!(fingerprint = %fingerprint.short(), "Already seen this run");
        }
        duplicate
    }

    /// Number of fingerprints loaded from the store
    pub fn known_len(&self) -> usize {
        self.known.len()
    }

    /// Number of fingerprints seen this run
    pub fn seen_len(&self) -> usize {
        self.seen.read().len()
    }
}
