//! Integration Tests for the News Pipeline
//!
//! Uses wiremock for the feed, NewsAPI, LLM provider and PostgREST endpoints.
//! Run with: cargo test --test integration_tests

use std::fs;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use news_pipeline::config::{Config, RunMode, SourceCount};
use news_pipeline::enrich::EnrichmentPool;
use news_pipeline::error::PipelineError;
use news_pipeline::http_client::ResilientHttpClient;
use news_pipeline::normalize::{Normalizer, SentenceTokenizer};
use news_pipeline::pipeline::{Pipeline, RunStatus, RunSummary, SourceStatus};
use news_pipeline::schemas::{ArticleCandidate, PersistedArticle};
use news_pipeline::sources::{build_source, FetchOptions};
use news_pipeline::storage::{ArticleStore, RestStore};

const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Wire</title>
    <link>https://wire.example.com</link>
    <description>Business wire</description>
    <item>
      <title>Acme beats estimates</title>
      <link>https://wire.example.com/acme?utm_source=rss</link>
      <description>Acme Inc. reported record revenue. Shares rose 4% in early trading.</description>
      <pubDate>Tue, 30 Apr 2024 21:05:00 GMT</pubDate>
    </item>
    <item>
      <title>Rates on hold</title>
      <link>https://wire.example.com/rates</link>
      <description>The central bank held rates steady. Markets were calm.</description>
    </item>
  </channel>
</rss>"#;

fn listing() -> serde_json::Value {
    json!({
        "status": "ok",
        "totalResults": 3,
        "articles": [
            {
                "title": "Acme results",
                "url": "https://markets.example.com/acme",
                "content": "Acme Inc. reported record revenue.  Shares rose 4% in early trading."
            },
            {
                "title": "Oil slides",
                "url": "https://markets.example.com/oil",
                "description": "Short teaser.",
                "content": "Oil prices fell for a third day. Traders cited weak demand… [+1520 chars]"
            },
            { "title": 42 }
        ]
    })
}

fn completion() -> serde_json::Value {
    let content = json!({
        "summary": "Acme posted record revenue.",
        "tags": ["Earnings", "stocks"],
        "tickers": ["acme", "WIDG"],
        "subsector": "Software",
        "dimensions": { "financials": 9, "future": 6, "dividend": null },
        "sentiment": "bullish",
        "score": 180
    });
    json!({ "choices": [ { "message": { "role": "assistant", "content": content.to_string() } } ] })
}

/// Writes a minimal english Punkt model under `root`
fn write_tokenizer(root: &Path) {
    let english = root.join("english");
    fs::create_dir_all(&english).unwrap();
    fs::write(english.join("abbrev_types.txt"), "inc\ndr\nmr\n").unwrap();
}

fn load_config(dir: &Path, toml: &str) -> Config {
    let file = dir.join("pipeline.toml");
    fs::write(&file, toml).unwrap();
    Config::load(Some(&file)).unwrap()
}

fn base_toml(uri: &str, tokenizer: &Path) -> String {
    format!(
        r#"
database_url = "{uri}"
database_key = "service-key"
store_backend = "rest"
llm_primary_key = "pk"
llm_fallback_keys = ["fk"]
llm_primary_base_url = "{uri}/v1"
llm_fallback_base_url = "{uri}/v1"
allowed_tags = ["earnings", "stocks", "macro"]
allowed_tickers = ["ACME", "INITECH"]
tokenizer_path = "{tokenizer}"
max_transient_retries = 1
retry_initial_delay_ms = 1
retry_max_delay_ms = 5

[[sources]]
id = "wire"
kind = "rss"
url = "{uri}/feed.xml"

[[sources]]
id = "markets"
kind = "news_api"
url = "{uri}/v2/everything"
api_key = "news-key"
query = "markets"
"#,
        tokenizer = tokenizer.display()
    )
}

async fn mount_sources(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/everything"))
        .and(header("X-Api-Key", "news-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .mount(server)
        .await;
}

async fn mount_providers(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer pk"))
        .respond_with(ResponseTemplate::new(429))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer fk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion()))
        .mount(server)
        .await;
}

/// Test NewsAPI listing through the configured adapter
#[tokio::test]
async fn test_newsapi_source_skips_malformed_articles() {
    let server = MockServer::start().await;
    mount_sources(&server).await;
    let dir = tempfile::tempdir().unwrap();
    write_tokenizer(dir.path());
    let config = load_config(dir.path(), &base_toml(&server.uri(), dir.path()));

    let http = Arc::new(ResilientHttpClient::with_defaults().unwrap());
    let markets = &config.sources[1];
    let source = build_source(markets, http).unwrap();

    let candidates: Vec<ArticleCandidate> = source
        .fetch(FetchOptions::from_config(markets))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].source_id, "markets");
    assert_eq!(candidates[1].raw_body, "Oil prices fell for a third day. Traders cited weak demand");
}

/// Test RSS listing with full-text page fetching
#[tokio::test]
async fn test_rss_source_fetches_full_text() {
    let server = MockServer::start().await;
    let feed = format!(
        r#"<rss version="2.0"><channel><title>t</title><link>{uri}</link><description>d</description>
        <item><title>Story</title><link>{uri}/story</link><description>Teaser only.</description></item>
        </channel></rss>"#,
        uri = server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/story"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<html><body><nav>Menu</nav><article><p>Full story text.</p><p>Second paragraph.</p></article></body></html>",
        ))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let toml = format!(
        r#"
[[sources]]
id = "wire"
kind = "rss"
url = "{uri}/feed.xml"
fetch_full_text = true
body_selector = "article"
"#,
        uri = server.uri()
    );
    let config = load_config(dir.path(), &toml);

    let http = Arc::new(ResilientHttpClient::with_defaults().unwrap());
    let source = build_source(&config.sources[0], http).unwrap();
    assert!(source.metadata().fetches_full_text);

    let candidates: Vec<ArticleCandidate> = source.fetch(FetchOptions::new()).await.unwrap().collect().await;

    assert_eq!(candidates.len(), 1);
    assert!(candidates[0].raw_body.contains("Full story text."));
    assert!(!candidates[0].raw_body.contains("Menu"));
}

/// Test credential rotation over HTTP: the rate-limited primary is skipped
#[tokio::test]
async fn test_rate_limited_primary_falls_back() {
    let server = MockServer::start().await;
    mount_providers(&server).await;
    let dir = tempfile::tempdir().unwrap();
    write_tokenizer(dir.path());
    let config = load_config(dir.path(), &base_toml(&server.uri(), dir.path()));

    let pool = EnrichmentPool::from_config(&config).unwrap();
    let tokenizer = SentenceTokenizer::load(&config.tokenizer_path, &["english"]).unwrap();
    let article = Normalizer::new(Arc::new(tokenizer))
        .normalize(
            &ArticleCandidate::new("wire", "https://wire.example.com/a", "Acme", "Acme Inc. reported record revenue."),
            "english",
        )
        .unwrap();

    let result = pool.enrich(&article).await.unwrap();

    assert_eq!(result.provider_used, "groq#1");
    assert_eq!(result.summary, "Acme posted record revenue.");
    assert_eq!(result.tags, vec!["earnings", "stocks"]);
    assert_eq!(result.tickers, vec!["ACME"]);
    assert_eq!(result.subsector.as_deref(), Some("software"));
    assert_eq!(result.dimensions.financials, Some(9));
    assert_eq!(result.dimensions.dividend, None);
    assert_eq!(result.score, Some(150));
    assert_eq!(pool.credentials().available_count(chrono::Utc::now()), 1);
}

/// Test PostgREST upsert and fingerprint loading
#[tokio::test]
async fn test_rest_store_roundtrip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/news_articles"))
        .and(query_param("on_conflict", "fingerprint"))
        .and(header("apikey", "service-key"))
        .and(body_string_contains("\"summary\":\"Done.\""))
        .and(body_string_contains("\"tickers\":[\"ACME\"]"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/news_articles"))
        .and(query_param("summary", "not.is.null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "fingerprint": "aa11" },
            { "fingerprint": "bb22" }
        ])))
        .mount(&server)
        .await;

    let store = RestStore::new(&server.uri(), Some("service-key"), "news_articles", std::time::Duration::from_secs(5))
        .unwrap();

    let tokenizer = SentenceTokenizer::from_models([(
        "english".to_string(),
        news_pipeline::normalize::PunktModel::from_parts([], [], []),
    )]);
    let article = Normalizer::new(Arc::new(tokenizer))
        .normalize(&ArticleCandidate::new("wire", "https://a.example.com", "A", "Body."), "english")
        .unwrap();
    let enrichment = news_pipeline::schemas::EnrichmentResult {
        headline: None,
        summary: "Done.".to_string(),
        tags: vec![],
        tickers: vec!["ACME".to_string()],
        sentiment: None,
        score: None,
        provider_used: "openai#0".to_string(),
        attempt_count: 1,
        ..Default::default()
    };
    let row = PersistedArticle::from_parts(&article, Some(&enrichment), chrono::Utc::now());

    store.upsert(&row).await.unwrap();
    let known = store.load_known_fingerprints().await.unwrap();
    assert_eq!(known.len(), 2);
}

/// Test a whole run: two sources, a cross-source duplicate, rotation and REST writes
#[tokio::test]
async fn test_end_to_end_run() {
    let server = MockServer::start().await;
    mount_sources(&server).await;
    mount_providers(&server).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/news_articles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/news_articles"))
        .respond_with(ResponseTemplate::new(201))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    write_tokenizer(dir.path());
    let config = load_config(dir.path(), &base_toml(&server.uri(), dir.path()));

    let mut pipeline = Pipeline::from_config(&config, SourceCount::All, RunMode::Pipeline, "e2e")
        .await
        .unwrap();
    let summary = pipeline.run().await;

    assert_eq!(summary.status, RunStatus::Completed, "{}", summary.render_table());
    assert_eq!(summary.status.exit_code(), 0);
    assert_eq!(summary.sources.len(), 2);
    assert!(summary.sources.iter().all(|s| s.status == SourceStatus::Completed));
    assert_eq!(summary.totals.fetched, 4);
    assert_eq!(summary.totals.deduplicated, 1);
    assert_eq!(summary.totals.enriched, 3);
    assert_eq!(summary.totals.persisted, 3);
}

/// Test dry-run: enrichment happens but nothing is written
#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let server = MockServer::start().await;
    mount_sources(&server).await;
    mount_providers(&server).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/news_articles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/news_articles"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    write_tokenizer(dir.path());
    let config = load_config(dir.path(), &base_toml(&server.uri(), dir.path()));

    let mut pipeline = Pipeline::from_config(&config, SourceCount::First(1), RunMode::DryRun, "dry")
        .await
        .unwrap();
    let summary = pipeline.run().await;

    assert_eq!(summary.sources.len(), 1);
    assert_eq!(summary.totals.enriched, 2);
    assert_eq!(summary.totals.persisted, 0);
}

/// Test setup failures: no credentials and an unreachable store
#[tokio::test]
async fn test_setup_failures_fail_the_run() {
    let dir = tempfile::tempdir().unwrap();
    write_tokenizer(dir.path());
    let toml = base_toml("http://127.0.0.1:9", dir.path())
        .replace("llm_primary_key = \"pk\"\n", "")
        .replace("llm_fallback_keys = [\"fk\"]\n", "");
    let config = load_config(dir.path(), &toml);

    let err = Pipeline::from_config(&config, SourceCount::All, RunMode::Pipeline, "r1")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::ConfigError(_)));

    let summary = RunSummary::failed("r1", RunMode::Pipeline, chrono::Utc::now(), err);
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.status.exit_code(), 1);

    // scrape-only needs no credentials but the store is down
    let err = Pipeline::from_config(&config, SourceCount::All, RunMode::ScrapeOnly, "r2")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::ResourceUnavailable(_)));
}
