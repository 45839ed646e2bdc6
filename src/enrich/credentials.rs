//! Provider credential pool
//!
//! The pool is the only mutable state shared between workers. Each credential
//! sits in its own slot: exhaustion updates go through a short-lived lock on
//! the slot state, and an async lock serializes requests on the same key.

use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::provider::LlmProvider;

/// One API key for one provider
#[derive(Clone)]
pub struct ProviderCredential {
    pub provider_name: String,
    key: String,
    /// Unusable until this instant after a rate-limit response
    pub exhausted_until: Option<DateTime<Utc>>,
}

impl ProviderCredential {
    pub fn new(provider_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            key: key.into(),
            exhausted_until: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("provider_name", &self.provider_name)
            .field("key", &"<redacted>")
            .field("exhausted_until", &self.exhausted_until)
            .finish()
    }
}

/// A credential together with its provider and locks
pub struct CredentialSlot {
    label: String,
    provider: Arc<dyn LlmProvider>,
    state: Mutex<ProviderCredential>,
    in_flight: tokio::sync::Mutex<()>,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl CredentialSlot {
    pub fn new(label: impl Into<String>, provider: Arc<dyn LlmProvider>, key: impl Into<String>) -> Self {
        let credential = ProviderCredential::new(provider.name(), key);
        Self {
            label: label.into(),
            provider,
            state: Mutex::new(credential),
            in_flight: tokio::sync::Mutex::new(()),
            limiter: None,
        }
    }

    /// Caps requests per minute on this credential
    pub fn with_rate_limit(mut self, rpm: u32) -> Self {
        if let Some(rpm) = NonZeroU32::new(rpm) {
            self.limiter = Some(RateLimiter::direct(Quota::per_minute(rpm)));
        }
        self
    }

    /// Log label, e.g. `groq#2`; never the key itself
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn key(&self) -> String {
        self.state.lock().key().to_string()
    }

    pub fn exhausted_until(&self) -> Option<DateTime<Utc>> {
        self.state.lock().exhausted_until
    }

    /// True unless a cool-down is still running; clears an elapsed one
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        match state.exhausted_until {
            Some(until) if until > now => false,
            Some(_) => {
                state.exhausted_until = None;
                true
            }
            None => true,
        }
    }

    /// Marks the credential exhausted; an existing later deadline is kept
    pub fn mark_exhausted(&self, until: DateTime<Utc>) {
        let mut state = self.state.lock();
        if state.exhausted_until.map_or(true, |current| until > current) {
            state.exhausted_until = Some(until);
        }
    }

    /// Waits for the per-credential budget, if any
    pub async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Serializes requests on this credential
    pub async fn acquire(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.in_flight.lock().await
    }
}

impl fmt::Debug for CredentialSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSlot")
            .field("label", &self.label)
            .field("state", &*self.state.lock())
            .finish()
    }
}

/// Ordered credentials: one optional primary, then interchangeable fallbacks
pub struct CredentialPool {
    primary: Option<Arc<CredentialSlot>>,
    fallbacks: Vec<Arc<CredentialSlot>>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    pub fn new(primary: Option<CredentialSlot>, fallbacks: Vec<CredentialSlot>) -> Self {
        Self {
            primary: primary.map(Arc::new),
            fallbacks: fallbacks.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Attempt order for one article.
    ///
    /// The primary always comes first; fallbacks start at an offset that
    /// advances on every call so load spreads across fallback keys.
    pub fn rotation(&self) -> Vec<Arc<CredentialSlot>> {
        let mut order = Vec::with_capacity(self.len());
        order.extend(self.primary.iter().cloned());

        if !self.fallbacks.is_empty() {
            let offset = self.cursor.fetch_add(1, Ordering::Relaxed) % self.fallbacks.len();
            order.extend(self.fallbacks[offset..].iter().cloned());
            order.extend(self.fallbacks[..offset].iter().cloned());
        }
        order
    }

    pub fn len(&self) -> usize {
        usize::from(self.primary.is_some()) + self.fallbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Credentials not cooling down at `now`
    pub fn available_count(&self, now: DateTime<Utc>) -> usize {
        self.primary
            .iter()
            .chain(self.fallbacks.iter())
            .filter(|slot| slot.is_available(now))
            .count()
    }

    pub fn slot(&self, label: &str) -> Option<Arc<CredentialSlot>> {
        self.primary
            .iter()
            .chain(self.fallbacks.iter())
            .find(|slot| slot.label() == label)
            .cloned()
    }
}
