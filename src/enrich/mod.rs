//! Enrichment Pool
//!
//! Sends each article to one of several interchangeable LLM credentials:
//! - credentials tried in rotation order, cooling-down ones skipped
//! - rate limits mark the credential exhausted and move on
//! - transient errors retried on the same credential with backoff
//! - permanent errors move on immediately
//!
//! `EnrichmentFailed` is returned only once every credential was tried or
//! skipped for the article.

pub mod credentials;
pub mod prompt;
pub mod provider;

use chrono::Utc;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::retry::{with_jitter, FailureKind, RetryAction, RetryPolicy};
use crate::schemas::{Dimensions, EnrichmentResult, NormalizedArticle, Sentiment, MAX_DIMENSION, MAX_SCORE};

pub use credentials::{CredentialPool, CredentialSlot, ProviderCredential};
pub use prompt::{EnrichmentOutput, PromptBuilder, Vocabulary};
pub use provider::{EnrichmentPrompt, LlmProvider, OpenAiCompatibleProvider, ProviderReply};

/// Pool settings
#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    /// Cool-down when the provider gives no hint
    pub default_cool_down: Duration,
    pub max_cool_down: Duration,
    pub vocabulary: Vocabulary,
    pub max_prompt_chars: usize,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(60),
            default_cool_down: Duration::from_secs(60),
            max_cool_down: Duration::from_secs(3600),
            vocabulary: Vocabulary::default(),
            max_prompt_chars: 12_000,
        }
    }
}

impl EnrichmentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.retry_policy(),
            request_timeout: Duration::from_secs(config.llm_request_timeout_secs),
            default_cool_down: config.default_cool_down(),
            max_cool_down: config.max_cool_down(),
            vocabulary: Vocabulary {
                tags: config.allowed_tags.clone(),
                tickers: config.allowed_tickers.clone(),
                subsectors: config.allowed_subsectors.clone(),
            },
            max_prompt_chars: config.max_prompt_chars,
        }
    }
}

pub struct EnrichmentPool {
    credentials: Arc<CredentialPool>,
    prompts: PromptBuilder,
    settings: EnrichmentSettings,
}

impl EnrichmentPool {
    pub fn new(credentials: Arc<CredentialPool>, settings: EnrichmentSettings) -> Self {
        let prompts = PromptBuilder::new(settings.max_prompt_chars, settings.vocabulary.clone());
        Self {
            credentials,
            prompts,
            settings,
        }
    }

    /// Builds the primary and fallback credentials from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.llm_request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.http_connect_timeout_secs))
            .build()?;

        let primary_provider: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatibleProvider::new(
            &config.llm_primary_provider,
            &config.llm_primary_base_url,
            &config.llm_primary_model,
            client.clone(),
        ));
        let fallback_provider: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatibleProvider::new(
            &config.llm_fallback_provider,
            &config.llm_fallback_base_url,
            &config.llm_fallback_model,
            client,
        ));

        let limit = |slot: CredentialSlot| match config.llm_credential_rpm {
            Some(rpm) => slot.with_rate_limit(rpm),
            None => slot,
        };

        let primary = config
            .llm_primary_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|key| {
                limit(CredentialSlot::new(
                    format!("{}#0", config.llm_primary_provider),
                    primary_provider.clone(),
                    key,
                ))
            });

        let fallbacks = config
            .llm_fallback_keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .enumerate()
            .map(|(i, key)| {
                limit(CredentialSlot::new(
                    format!("{}#{}", config.llm_fallback_provider, i + 1),
                    fallback_provider.clone(),
                    key,
                ))
            })
            .collect();

        let pool = CredentialPool::new(primary, fallbacks);
        if pool.is_empty() {
            return Err(PipelineError::ConfigError("no LLM provider credentials configured".to_string()));
        }

        info!(credentials = pool.len(), "Credential pool ready");
        Ok(Self::new(Arc::new(pool), EnrichmentSettings::from_config(config)))
    }

    pub fn credentials(&self) -> &Arc<CredentialPool> {
        &self.credentials
    }

    /// Enriches one article, rotating through credentials as needed
    #[instrument(skip(self, article), fields(fingerprint = %article.content_fingerprint.short()))]
    pub async fn enrich(&self, article: &NormalizedArticle) -> Result<EnrichmentResult> {
        let prompt = self.prompts.build(article);
        let rotation = self.credentials.rotation();
        let mut attempts = 0u32;

        for (index, slot) in rotation.iter().enumerate() {
            let has_next = index + 1 < rotation.len();

            if !slot.is_available(Utc::now()) {
                debug!(credential = %slot.label(), "Skipping exhausted credential");
                continue;
            }

            let _in_flight = slot.acquire().await;
            // another worker may have exhausted it while we waited
            if !slot.is_available(Utc::now()) {
                debug!(credential = %slot.label(), "Credential exhausted while waiting");
                continue;
            }

            let mut tries = 0u32;
            loop {
                slot.throttle().await;
                tries += 1;
                attempts += 1;

                let key = slot.key();
                let request = slot.provider().request(&key, &prompt);
                let reply = match tokio::time::timeout(self.settings.request_timeout, request).await {
                    Ok(reply) => reply,
                    Err(_) => ProviderReply::TransientError("request timed out".to_string()),
                };

                let kind = match reply {
                    ProviderReply::Success(output) => {
                        debug!(credential = %slot.label(), attempts, "Article enriched");
                        return Ok(self.finish(output, slot.label(), attempts));
                    }
                    ProviderReply::RateLimited { retry_after } => {
                        let cool_down = self.cool_down(retry_after);
                        let until = Utc::now()
                            + chrono::Duration::from_std(cool_down).unwrap_or_else(|_| chrono::Duration::days(1));
                        slot.mark_exhausted(until);
                        warn!(
                            credential = %slot.label(),
                            cool_down_secs = cool_down.as_secs(),
                            "Credential rate limited, rotating"
                        );
                        FailureKind::RateLimited
                    }
                    ProviderReply::TransientError(message) => {
                        warn!(credential = %slot.label(), attempt = tries, error = %message, "Transient provider error");
                        FailureKind::Transient
                    }
                    ProviderReply::PermanentError(message) => {
                        warn!(credential = %slot.label(), error = %message, "Permanent provider error, rotating");
                        FailureKind::Permanent
                    }
                };

                match self.settings.retry.decide(tries, kind, has_next) {
                    RetryAction::RetrySame { delay } => tokio::time::sleep(with_jitter(delay)).await,
                    RetryAction::AdvanceNext | RetryAction::Fail => break,
                }
            }
        }

        warn!(attempts, credentials = rotation.len(), "All credentials failed");
        Err(PipelineError::EnrichmentFailed {
            attempts,
            credentials: rotation.len(),
        })
    }

    fn cool_down(&self, retry_after: Option<Duration>) -> Duration {
        retry_after
            .filter(|d| !d.is_zero())
            .unwrap_or(self.settings.default_cool_down)
            .min(self.settings.max_cool_down)
    }

    /// Validates and normalizes a provider reply
    fn finish(&self, output: EnrichmentOutput, provider_used: &str, attempt_count: u32) -> EnrichmentResult {
        let vocabulary = &self.settings.vocabulary;
        let mut dimensions = Dimensions::default();
        for (name, rating) in &output.dimensions {
            dimensions.set(name, Some(clamp_dimension(*rating)));
        }

        EnrichmentResult {
            headline: output.headline,
            summary: output.summary,
            tags: filter_tags(output.tags, &vocabulary.tags),
            tickers: filter_tickers(output.tickers, &vocabulary.tickers),
            subsector: output
                .subsector
                .and_then(|s| filter_subsector(&s, &vocabulary.subsectors)),
            dimensions,
            sentiment: output.sentiment.as_deref().and_then(Sentiment::from_label),
            score: output.score.map(clamp_score),
            provider_used: provider_used.to_string(),
            attempt_count,
        }
    }
}

/// Trims, restricts to `allowed` (case-insensitive, canonical spelling) and
/// deduplicates preserving first occurrence
pub fn filter_tags(tags: Vec<String>, allowed: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter_map(|t| {
            if allowed.is_empty() {
                Some(t)
            } else {
                allowed.iter().find(|a| a.eq_ignore_ascii_case(&t)).cloned()
            }
        })
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect()
}

/// Upper-cases, strips exchange prefixes (`NASDAQ:ACME`), restricts to
/// `allowed` and deduplicates preserving first occurrence
pub fn filter_tickers(tickers: Vec<String>, allowed: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tickers
        .into_iter()
        .map(|t| {
            let symbol = t.rsplit(':').next().unwrap_or_default();
            symbol.trim().trim_start_matches('$').to_uppercase()
        })
        .filter(|t| !t.is_empty() && !t.contains(char::is_whitespace))
        .filter(|t| allowed.is_empty() || allowed.iter().any(|a| a.eq_ignore_ascii_case(t)))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Slugifies (`Oil & Gas` becomes `oil-gas`) and checks against `allowed`
pub fn filter_subsector(subsector: &str, allowed: &[String]) -> Option<String> {
    let slug = subsector
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-");

    if slug.is_empty() || (!allowed.is_empty() && !allowed.contains(&slug)) {
        None
    } else {
        Some(slug)
    }
}

pub fn clamp_dimension(rating: f64) -> u8 {
    if rating.is_nan() {
        return 0;
    }
    rating.round().clamp(0.0, f64::from(MAX_DIMENSION)) as u8
}

pub fn clamp_score(score: f64) -> u16 {
    if score.is_nan() {
        return 0;
    }
    score.round().clamp(0.0, f64::from(MAX_SCORE)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::Fingerprint;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};

    /// Replays scripted replies per API key and records every call
    #[derive(Default)]
    struct ScriptedProvider {
        script: Mutex<HashMap<String, VecDeque<ProviderReply>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn push(&self, key: &str, reply: ProviderReply) {
            self.script.lock().entry(key.to_string()).or_default().push_back(reply);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn request(&self, api_key: &str, _prompt: &EnrichmentPrompt) -> ProviderReply {
            self.calls.lock().push(api_key.to_string());
            self.script
                .lock()
                .get_mut(api_key)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| success("default"))
        }
    }

    fn success(summary: &str) -> ProviderReply {
        ProviderReply::Success(EnrichmentOutput {
            headline: None,
            summary: summary.to_string(),
            tags: vec!["Earnings".to_string(), "earnings".to_string(), "macro".to_string()],
            tickers: vec!["acme".to_string(), "NYSE:ACME".to_string(), "INTC".to_string()],
            subsector: Some("Semiconductors".to_string()),
            dimensions: [("dividend".to_string(), 14.0), ("future".to_string(), 6.4)].into_iter().collect(),
            sentiment: Some("positive".to_string()),
            score: Some(180.0),
        })
    }

    fn rate_limited() -> ProviderReply {
        ProviderReply::RateLimited { retry_after: None }
    }

    fn article(body: &str) -> NormalizedArticle {
        NormalizedArticle {
            source_id: "wire".to_string(),
            url: "https://example.com/a".to_string(),
            title: "Title".to_string(),
            sentences: vec![body.to_string()],
            content_fingerprint: Fingerprint::of_body(body),
            language: "english".to_string(),
            published_at: None,
        }
    }

    fn pool(provider: &Arc<ScriptedProvider>, fallbacks: &[&str]) -> EnrichmentPool {
        let p: Arc<dyn LlmProvider> = provider.clone();
        let primary = CredentialSlot::new("primary#0", p.clone(), "primary");
        let fallbacks = fallbacks
            .iter()
            .enumerate()
            .map(|(i, key)| CredentialSlot::new(format!("fallback#{}", i + 1), p.clone(), *key))
            .collect();
        let settings = EnrichmentSettings {
            retry: RetryPolicy::immediate(2),
            ..Default::default()
        };
        EnrichmentPool::new(Arc::new(CredentialPool::new(Some(primary), fallbacks)), settings)
    }

    #[tokio::test]
    async fn test_rate_limited_primary_rotates_to_fallback() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push("primary", rate_limited());
        provider.push("f1", success("via fallback"));
        let pool = pool(&provider, &["f1"]);

        let result = pool.enrich(&article("First.")).await.unwrap();
        assert_eq!(result.summary, "via fallback");
        assert_eq!(result.provider_used, "fallback#1");
        assert_eq!(result.attempt_count, 2);

        let primary = pool.credentials().slot("primary#0").unwrap();
        assert!(!primary.is_available(Utc::now()));

        // next article skips the exhausted primary entirely
        pool.enrich(&article("Second.")).await.unwrap();
        assert_eq!(provider.calls(), vec!["primary", "f1", "f1"]);
    }

    #[tokio::test]
    async fn test_transient_errors_retry_same_credential() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push("primary", ProviderReply::TransientError("503".to_string()));
        provider.push("primary", ProviderReply::TransientError("503".to_string()));
        provider.push("primary", success("third time"));
        let pool = pool(&provider, &["f1"]);

        let result = pool.enrich(&article("Body.")).await.unwrap();
        assert_eq!(result.provider_used, "primary#0");
        assert_eq!(result.attempt_count, 3);
        assert_eq!(provider.calls(), vec!["primary", "primary", "primary"]);
    }

    #[tokio::test]
    async fn test_transient_bound_then_advance() {
        let provider = Arc::new(ScriptedProvider::default());
        for _ in 0..3 {
            provider.push("primary", ProviderReply::TransientError("timeout".to_string()));
        }
        let pool = pool(&provider, &["f1"]);

        let result = pool.enrich(&article("Body.")).await.unwrap();
        assert_eq!(result.provider_used, "fallback#1");
        assert_eq!(provider.calls(), vec!["primary", "primary", "primary", "f1"]);
    }

    #[tokio::test]
    async fn test_permanent_error_advances_immediately() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push("primary", ProviderReply::PermanentError("bad json".to_string()));
        let pool = pool(&provider, &["f1"]);

        let result = pool.enrich(&article("Body.")).await.unwrap();
        assert_eq!(result.provider_used, "fallback#1");
        assert_eq!(provider.calls(), vec!["primary", "f1"]);
        // permanent errors do not exhaust the credential
        assert!(pool.credentials().slot("primary#0").unwrap().is_available(Utc::now()));
    }

    #[tokio::test]
    async fn test_all_credentials_exhausted_fails() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push("primary", rate_limited());
        provider.push("f1", rate_limited());
        provider.push("f2", ProviderReply::PermanentError("rejected".to_string()));
        provider.push("f2", ProviderReply::PermanentError("rejected".to_string()));
        let pool = pool(&provider, &["f1", "f2"]);

        let err = pool.enrich(&article("Body.")).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::EnrichmentFailed { attempts: 3, credentials: 3 }
        ));

        // exhausted credentials are skipped for the next article
        let err = pool.enrich(&article("Other.")).await.unwrap_err();
        assert!(matches!(err, PipelineError::EnrichmentFailed { .. }));
        assert_eq!(provider.calls(), vec!["primary", "f1", "f2", "f2"]);
    }

    #[tokio::test]
    async fn test_result_is_post_processed() {
        let provider = Arc::new(ScriptedProvider::default());
        let pool = pool(&provider, &[]);

        let result = pool.enrich(&article("Body.")).await.unwrap();
        assert_eq!(result.tags, vec!["Earnings", "macro"]);
        assert_eq!(result.tickers, vec!["ACME", "INTC"]);
        assert_eq!(result.subsector.as_deref(), Some("semiconductors"));
        assert_eq!(result.dimensions.dividend, Some(MAX_DIMENSION));
        assert_eq!(result.dimensions.future, Some(6));
        assert_eq!(result.dimensions.valuation, None);
        assert_eq!(result.score, Some(MAX_SCORE));
        assert_eq!(result.sentiment, Some(Sentiment::Bullish));
    }

    #[tokio::test]
    async fn test_tickers_and_subsector_follow_vocabulary() {
        let provider = Arc::new(ScriptedProvider::default());
        let p: Arc<dyn LlmProvider> = provider.clone();
        let settings = EnrichmentSettings {
            vocabulary: Vocabulary {
                tickers: vec!["ACME".to_string()],
                subsectors: vec!["banks".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let pool = EnrichmentPool::new(
            Arc::new(CredentialPool::new(Some(CredentialSlot::new("primary#0", p, "primary")), vec![])),
            settings,
        );

        let result = pool.enrich(&article("Body.")).await.unwrap();
        assert_eq!(result.tickers, vec!["ACME"]);
        assert_eq!(result.subsector, None);
    }

    #[test]
    fn test_filter_tickers_normalizes_symbols() {
        let tickers = vec![
            " $acme ".to_string(),
            "NASDAQ: INTC".to_string(),
            "Acme Corp".to_string(),
            "ACME".to_string(),
            "".to_string(),
        ];
        assert_eq!(filter_tickers(tickers.clone(), &[]), vec!["ACME", "INTC"]);
        assert_eq!(filter_tickers(tickers, &["intc".to_string()]), vec!["INTC"]);
    }

    #[test]
    fn test_filter_subsector_slugs() {
        assert_eq!(filter_subsector("Oil & Gas", &[]).as_deref(), Some("oil-gas"));
        assert_eq!(filter_subsector("  ", &[]), None);
        assert_eq!(filter_subsector("Banks", &["banks".to_string()]).as_deref(), Some("banks"));
        assert_eq!(filter_subsector("Insurance", &["banks".to_string()]), None);
    }

    #[test]
    fn test_clamp_dimension() {
        assert_eq!(clamp_dimension(-2.0), 0);
        assert_eq!(clamp_dimension(7.6), 8);
        assert_eq!(clamp_dimension(99.0), MAX_DIMENSION);
        assert_eq!(clamp_dimension(f64::NAN), 0);
    }

    #[test]
    fn test_cool_down_uses_hint_with_cap() {
        let provider = Arc::new(ScriptedProvider::default());
        let pool = pool(&provider, &[]);

        assert_eq!(pool.cool_down(None), Duration::from_secs(60));
        assert_eq!(pool.cool_down(Some(Duration::from_secs(5))), Duration::from_secs(5));
        assert_eq!(pool.cool_down(Some(Duration::from_secs(90_000))), Duration::from_secs(3600));
    }

    #[test]
    fn test_filter_tags_against_vocabulary() {
        let allowed = vec!["Earnings".to_string(), "M&A".to_string()];
        let tags = vec![
            "m&a".to_string(),
            "crypto".to_string(),
            " earnings ".to_string(),
            "M&A".to_string(),
        ];
        assert_eq!(filter_tags(tags, &allowed), vec!["M&A", "Earnings"]);
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(-5.0), 0);
        assert_eq!(clamp_score(72.4), 72);
        assert_eq!(clamp_score(1e9), 150);
        assert_eq!(clamp_score(f64::NAN), 0);
    }

    /// Sleeps inside each request and records the peak number in flight
    #[derive(Default)]
    struct SlowProvider {
        in_flight: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn request(&self, _api_key: &str, _prompt: &EnrichmentPrompt) -> ProviderReply {
            use std::sync::atomic::Ordering;

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            success("slow")
        }
    }

    #[tokio::test]
    async fn test_requests_on_one_credential_are_serialized() {
        let provider = Arc::new(SlowProvider::default());
        let p: Arc<dyn LlmProvider> = provider.clone();
        let only = CredentialSlot::new("only#0", p, "only");
        let pool = EnrichmentPool::new(
            Arc::new(CredentialPool::new(Some(only), Vec::new())),
            EnrichmentSettings::default(),
        );

        let first = article("First worker.");
        let second = article("Second worker.");
        let (a, b) = tokio::join!(pool.enrich(&first), pool.enrich(&second));

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(provider.peak.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
