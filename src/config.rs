//! Configuration for the news pipeline
//!
//! Values come from an optional TOML file (`pipeline.toml` by default),
//! overlaid by environment variables (`DATABASE_URL`, `LLM_FALLBACK_KEYS`, ...).
//! Secrets are expected in the environment; source definitions in the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;

/// Adapter used to read a source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Rss,
    NewsApi,
    File,
}

/// What happens to an article once every credential failed
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DegradedPolicy {
    /// Persist the non-enriched fields
    #[default]
    Persist,
    /// Drop the article; it is picked up again by a later run
    Skip,
}

/// Persistence backend
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Postgres,
    Rest,
    Memory,
}

/// Pipeline behaviour selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RunMode {
    /// Fetch, enrich and persist
    Pipeline,
    /// Everything except store writes
    DryRun,
    /// No LLM calls; new articles are persisted degraded
    ScrapeOnly,
}

impl RunMode {
    pub fn enriches(&self) -> bool {
        !matches!(self, RunMode::ScrapeOnly)
    }

    pub fn writes(&self) -> bool {
        !matches!(self, RunMode::DryRun)
    }
}

/// How many configured sources a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCount {
    All,
    First(usize),
}

impl FromStr for SourceCount {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(SourceCount::All);
        }
        match s.parse::<usize>() {
            Ok(0) => Err("source count must be at least 1 (or \"all\")".to_string()),
            Ok(n) => Ok(SourceCount::First(n)),
            Err(_) => Err(format!("invalid source count: {s} (expected a number or \"all\")")),
        }
    }
}

/// One configured news source
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SourceConfig {
    #[validate(length(min = 1, max = 64))]
    pub id: String,
    pub kind: SourceKind,
    /// Feed/API URL, or a filesystem path for `file` sources
    #[validate(length(min = 1))]
    pub url: String,
    #[serde(default = "default_language")]
    pub language: String,
    pub api_key: Option<String>,
    pub query: Option<String>,
    pub max_items: Option<usize>,
    /// Download each article page and extract its text
    #[serde(default)]
    pub fetch_full_text: bool,
    /// CSS selector for the article text when `fetch_full_text` is set
    pub body_selector: Option<String>,
    #[serde(default = "default_source_rate_limit")]
    #[validate(range(min = 1, max = 6000))]
    pub rate_limit_rpm: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    // Database
    pub database_url: Option<String>,
    pub database_key: Option<String>,
    #[serde(default = "default_database_table")]
    #[validate(length(min = 1, max = 63))]
    pub database_table: String,
    pub store_backend: Option<StoreBackend>,

    // LLM providers
    pub llm_primary_key: Option<String>,
    #[serde(default)]
    pub llm_fallback_keys: Vec<String>,
    #[serde(default = "default_primary_provider")]
    pub llm_primary_provider: String,
    #[serde(default = "default_primary_base_url")]
    #[validate(url)]
    pub llm_primary_base_url: String,
    #[serde(default = "default_primary_model")]
    pub llm_primary_model: String,
    #[serde(default = "default_fallback_provider")]
    pub llm_fallback_provider: String,
    #[serde(default = "default_fallback_base_url")]
    #[validate(url)]
    pub llm_fallback_base_url: String,
    #[serde(default = "default_fallback_model")]
    pub llm_fallback_model: String,
    #[serde(default = "default_llm_timeout")]
    pub llm_request_timeout_secs: u64,
    /// Per-credential request budget; unlimited when unset
    pub llm_credential_rpm: Option<u32>,
    #[serde(default = "default_cool_down")]
    pub rate_limit_cool_down_secs: u64,
    #[serde(default = "default_max_cool_down")]
    pub max_cool_down_secs: u64,
    #[serde(default)]
    pub allowed_tags: Vec<String>,
    /// Symbols the model may return as tickers; any symbol when empty
    #[serde(default)]
    pub allowed_tickers: Vec<String>,
    /// Subsector slugs the model may choose from; any slug when empty
    #[serde(default)]
    pub allowed_subsectors: Vec<String>,
    #[serde(default = "default_max_prompt_chars")]
    #[validate(range(min = 200))]
    pub max_prompt_chars: usize,

    // Network
    pub proxy_url: Option<String>,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub http_connect_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_requests")]
    #[validate(range(min = 1))]
    pub max_concurrent_requests: usize,

    // Retries
    #[serde(default = "default_max_transient_retries")]
    #[validate(range(max = 10))]
    pub max_transient_retries: u32,
    #[serde(default = "default_retry_initial_delay")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    // NLP resources
    #[serde(default = "default_tokenizer_path")]
    pub tokenizer_path: PathBuf,

    // Run behaviour
    #[serde(default = "default_max_concurrency")]
    #[validate(range(min = 1, max = 64))]
    pub max_concurrency: usize,
    /// Wall-clock budget for one run, e.g. "45m"
    pub run_deadline: Option<String>,
    #[serde(default)]
    pub degraded_policy: DegradedPolicy,

    // Sources
    #[serde(default)]
    #[validate(nested)]
    pub sources: Vec<SourceConfig>,
}

fn default_language() -> String {
    "english".to_string()
}

fn default_source_rate_limit() -> u32 {
    30
}

fn default_enabled() -> bool {
    true
}

fn default_database_table() -> String {
    "news_articles".to_string()
}

fn default_primary_provider() -> String {
    "openai".to_string()
}

fn default_primary_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_primary_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_fallback_provider() -> String {
    "groq".to_string()
}

fn default_fallback_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_fallback_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_cool_down() -> u64 {
    60
}

fn default_max_cool_down() -> u64 {
    3600
}

fn default_max_prompt_chars() -> usize {
    12_000
}

fn default_http_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_concurrent_requests() -> usize {
    10
}

fn default_max_transient_retries() -> u32 {
    3
}

fn default_retry_initial_delay() -> u64 {
    500
}

fn default_retry_max_delay() -> u64 {
    30_000
}

fn default_tokenizer_path() -> PathBuf {
    PathBuf::from("./nltk_data/tokenizers/punkt_tab")
}

fn default_max_concurrency() -> usize {
    4
}

impl Config {
    /// Loads `.env`, the config file and the environment.
    ///
    /// An explicit `path` must exist; the default `pipeline.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name("pipeline").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("llm_fallback_keys")
                    .with_list_parse_key("allowed_tags")
                    .with_list_parse_key("allowed_tickers")
                    .with_list_parse_key("allowed_subsectors"),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Validates field values and the requirements of `mode`
    pub fn check(&self, mode: RunMode) -> Result<()> {
        self.validate()
            .map_err(|e| PipelineError::ConfigError(e.to_string()))?;

        if mode.enriches() && self.credential_count() == 0 {
            return Err(PipelineError::ConfigError(
                "no LLM provider credentials configured (set LLM_PRIMARY_KEY or LLM_FALLBACK_KEYS)"
                    .to_string(),
            ));
        }

        if mode.writes() && self.database_url.is_none() && self.store_backend != Some(StoreBackend::Memory) {
            return Err(PipelineError::ConfigError(
                "no database target configured (set DATABASE_URL)".to_string(),
            ));
        }

        if self.enabled_sources().next().is_none() {
            return Err(PipelineError::ConfigError("no enabled sources configured".to_string()));
        }

        let mut ids = std::collections::HashSet::new();
        for source in &self.sources {
            if !ids.insert(source.id.as_str()) {
                return Err(PipelineError::ConfigError(format!(
                    "duplicate source id: {}",
                    source.id
                )));
            }
        }

        self.run_deadline()?;
        Ok(())
    }

    /// Number of usable LLM credentials
    pub fn credential_count(&self) -> usize {
        let primary = self.llm_primary_key.as_ref().filter(|k| !k.trim().is_empty()).is_some();
        let fallbacks = self.llm_fallback_keys.iter().filter(|k| !k.trim().is_empty()).count();
        usize::from(primary) + fallbacks
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Picks the sources a run covers, in configured order
    pub fn select_sources(&self, count: SourceCount) -> Vec<SourceConfig> {
        let enabled = self.enabled_sources().cloned();
        match count {
            SourceCount::All => enabled.collect(),
            SourceCount::First(n) => enabled.take(n).collect(),
        }
    }

    /// Parsed wall-clock deadline
    pub fn run_deadline(&self) -> Result<Option<Duration>> {
        self.run_deadline
            .as_deref()
            .map(|raw| {
                humantime::parse_duration(raw.trim()).map_err(|e| {
                    PipelineError::ConfigError(format!("invalid run_deadline {raw:?}: {e}"))
                })
            })
            .transpose()
    }

    /// Resolves the store backend from the explicit setting or the URL scheme
    pub fn resolved_backend(&self) -> Option<StoreBackend> {
        if let Some(backend) = self.store_backend {
            return Some(backend);
        }
        let url = self.database_url.as_deref()?;
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(StoreBackend::Postgres)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            Some(StoreBackend::Rest)
        } else {
            None
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_transient_retries: self.max_transient_retries,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            multiplier: 2.0,
        }
    }

    pub fn default_cool_down(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cool_down_secs)
    }

    pub fn max_cool_down(&self) -> Duration {
        Duration::from_secs(self.max_cool_down_secs.max(self.rate_limit_cool_down_secs))
    }
}
