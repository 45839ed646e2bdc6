//! Prompt construction and reply parsing

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::provider::EnrichmentPrompt;
use crate::schemas::NormalizedArticle;

static PARENTHETICAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(([^()]*)\)").expect("static regex is valid"));

/// Ticker-like asides such as `(ACME)` or `(NASDAQ: ACME)` survive condensing
static TICKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Z]{2,10}:\s*)?[A-Z][A-Z0-9.\-]{0,9}$").expect("static regex is valid")
});

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").expect("static regex is valid"));

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "with", "of", "to", "and", "in", "on", "for", "as", "by",
];

const SYSTEM_PROMPT: &str = "You are a financial news editor. Read the article and reply with a single JSON object with these fields:\n\
- \"headline\": a one-sentence, non-misleading headline.\n\
- \"summary\": at most two sentences. Refer to companies as \"Company Name (TICKER)\" when a ticker is known.\n\
- \"tags\": a list of short topic tags.\n\
- \"tickers\": upper-case stock symbols of the companies the article is mainly about, or an empty list.\n\
- \"subsector\": the industry slug the article is about, or null.\n\
- \"dimensions\": an object rating from 0 to 10 how much the article informs each of valuation, future, technical, financials, dividend, management, ownership and sustainability; use null when it says nothing about one.\n\
- \"sentiment\": one of \"bullish\", \"bearish\" or \"neutral\".\n\
- \"score\": an integer from 0 to 100 rating newsworthiness for investors, plus up to 50 bonus points for market-moving news. \
Weigh the credibility of the source domain and penalize stale news by comparing the publish date with today.\n\
Reply with JSON only.";

/// Parsed reply before validation against the run's settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentOutput {
    pub headline: Option<String>,
    pub summary: String,
    pub tags: Vec<String>,
    pub tickers: Vec<String>,
    pub subsector: Option<String>,
    /// Ratings by dimension name, unclamped
    pub dimensions: BTreeMap<String, f64>,
    pub sentiment: Option<String>,
    pub score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    headline: Option<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    tags: Value,
    #[serde(default)]
    tickers: Value,
    #[serde(default)]
    subsector: Value,
    #[serde(default)]
    dimensions: Value,
    sentiment: Option<String>,
    #[serde(default)]
    score: Value,
}

/// Values the model may choose from; an empty list allows anything
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    pub tags: Vec<String>,
    pub tickers: Vec<String>,
    pub subsectors: Vec<String>,
}

/// Builds the messages for one article
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_chars: usize,
    vocabulary: Vocabulary,
}

impl PromptBuilder {
    pub fn new(max_chars: usize, vocabulary: Vocabulary) -> Self {
        Self {
            max_chars,
            vocabulary,
        }
    }

    pub fn build(&self, article: &NormalizedArticle) -> EnrichmentPrompt {
        self.build_at(article, Utc::now())
    }

    /// Builds the prompt as of `now`, which anchors the staleness judgement
    pub fn build_at(&self, article: &NormalizedArticle, now: DateTime<Utc>) -> EnrichmentPrompt {
        let mut system = SYSTEM_PROMPT.to_string();
        push_choices(&mut system, "tags", &self.vocabulary.tags);
        push_choices(&mut system, "tickers", &self.vocabulary.tickers);
        push_choices(&mut system, "the subsector", &self.vocabulary.subsectors);

        let mut user = String::new();
        if let Some(domain) = article.domain() {
            user.push_str(&format!("Source: {domain}\n"));
        }
        match article.published_at {
            Some(published) => user.push_str(&format!("Published: {}\n", published.format("%Y-%m-%d %H:%M UTC"))),
            None => user.push_str("Published: unknown\n"),
        }
        user.push_str(&format!("Today: {}\n\n", now.format("%Y-%m-%d %H:%M UTC")));

        if !article.title.is_empty() {
            user.push_str(&format!("Title: {}\n\n", article.title));
        }
        user.push_str(&condense(&article.sentences, self.max_chars));

        EnrichmentPrompt { system, user }
    }
}

fn push_choices(system: &mut String, what: &str, allowed: &[String]) {
    if !allowed.is_empty() {
        system.push_str(&format!("\nChoose {what} only from: {}.", allowed.join(", ")));
    }
}

/// Shortens article text for the prompt.
///
/// Parenthetical asides (tickers excepted) and stop words are dropped, then
/// whole sentences are kept while they fit in `max_chars`. A first sentence
/// longer than the limit is cut at a char boundary.
pub fn condense(sentences: &[String], max_chars: usize) -> String {
    let mut out = String::new();

    for sentence in sentences {
        let condensed = condense_sentence(sentence);
        if condensed.is_empty() {
            continue;
        }

        let needed = if out.is_empty() { condensed.len() } else { condensed.len() + 1 };
        if out.len() + needed > max_chars {
            if out.is_empty() {
                let cut = condensed
                    .char_indices()
                    .map(|(i, c)| i + c.len_utf8())
                    .take_while(|end| *end <= max_chars)
                    .last()
                    .unwrap_or(0);
                out.push_str(&condensed[..cut]);
            }
            break;
        }

        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&condensed);
    }

    out
}

fn condense_sentence(sentence: &str) -> String {
    let without_asides = PARENTHETICAL.replace_all(sentence, |caps: &Captures| {
        let inner = caps[1].trim();
        if TICKER.is_match(inner) {
            caps[0].to_string()
        } else {
            String::new()
        }
    });

    without_asides
        .split_whitespace()
        .filter(|word| !STOPWORDS.contains(&word.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses a provider reply; empty summaries and non-JSON text are errors
pub fn parse_enrichment(content: &str) -> Result<EnrichmentOutput, String> {
    let trimmed = content.trim();
    let json = CODE_FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str());

    let raw: RawOutput = serde_json::from_str(json).map_err(|e| format!("reply is not valid JSON: {e}"))?;

    let summary = raw.summary.trim().to_string();
    if summary.is_empty() {
        return Err("reply has an empty summary".to_string());
    }

    let dimensions = match raw.dimensions {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(name, v)| number(&v).map(|n| (name.trim().to_lowercase(), n)))
            .collect(),
        _ => BTreeMap::new(),
    };

    Ok(EnrichmentOutput {
        headline: raw.headline.map(|h| h.trim().to_string()).filter(|h| !h.is_empty()),
        summary,
        tags: string_list(raw.tags),
        tickers: string_list(raw.tickers),
        subsector: raw.subsector.as_str().map(str::to_string),
        dimensions,
        sentiment: raw.sentiment,
        score: number(&raw.score),
    })
}

/// A JSON array of strings or a comma-separated string
fn string_list(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
