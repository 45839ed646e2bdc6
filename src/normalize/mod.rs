//! Normalizer
//!
//! Turns an `ArticleCandidate` into a `NormalizedArticle`:
//! - HTML reduced to text, invisible characters dropped, whitespace collapsed
//! - URL canonicalized
//! - Body segmented with the pretrained sentence tokenizer
//! - Content fingerprint computed from the body only

pub mod tokenizer;

use scraper::Html;
use std::sync::Arc;
use tracing::debug;

use crate::dedup::canonicalize_url;
use crate::error::{PipelineError, Result};
use crate::schemas::{ArticleCandidate, Fingerprint, NormalizedArticle};

pub use tokenizer::{PunktModel, SentenceTokenizer};

/// Characters that render as nothing
const INVISIBLE: &[char] = &['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'];

#[derive(Clone)]
pub struct Normalizer {
    tokenizer: Arc<SentenceTokenizer>,
}

impl Normalizer {
    pub fn new(tokenizer: Arc<SentenceTokenizer>) -> Self {
        Self { tokenizer }
    }

    /// Normalizes one candidate. Deterministic for a given tokenizer.
    pub fn normalize(&self, candidate: &ArticleCandidate, language: &str) -> Result<NormalizedArticle> {
        let body = clean_text(&candidate.raw_body);
        if body.is_empty() {
            return Err(PipelineError::ParseError(format!(
                "empty body after cleaning: {}",
                candidate.url
            )));
        }

        let sentences = self.tokenizer.tokenize(language, &body)?;
        let content_fingerprint = Fingerprint::of_body(&body);

        let url = canonicalize_url(&candidate.url).unwrap_or_else(|e| {
            debug!(url = %candidate.url, error = %e, "Keeping non-canonical URL");
            candidate.url.trim().to_string()
        });

        Ok(NormalizedArticle {
            source_id: candidate.source_id.clone(),
            url,
            title: clean_text(&candidate.raw_title),
            sentences,
            content_fingerprint,
            language: language.to_lowercase(),
            published_at: candidate.published_at,
        })
    }
}

/// Reduces markup to text and collapses whitespace to single spaces
pub fn clean_text(raw: &str) -> String {
    let text = if looks_like_html(raw) {
        html_to_text(raw)
    } else {
        raw.to_string()
    };

    text.replace('\u{00A0}', " ")
        .replace(INVISIBLE, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn looks_like_html(raw: &str) -> bool {
    raw.contains('<') && raw.contains('>')
}

/// Text nodes of a fragment, skipping scripts and styles
fn html_to_text(raw: &str) -> String {
    let fragment = Html::parse_fragment(raw);
    let mut parts = Vec::new();

    for node in fragment.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let in_code = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript"));
        if !in_code {
            parts.push(String::from(&**text));
        }
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        let model = PunktModel::from_parts(["inc", "corp"], [], ["however"]);
        let tokenizer = SentenceTokenizer::from_models([("english".to_string(), model)]);
        Normalizer::new(Arc::new(tokenizer))
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Hello\u{00A0}\n\tworld\u{200B}! "), "Hello world!");
        assert_eq!(
            clean_text("<p>Acme &amp; Co <b>rallied</b>.</p><script>var x = 1;</script>"),
            "Acme & Co rallied ."
        );
    }

    #[test]
    fn test_fingerprint_ignores_case_whitespace_and_title() {
        let n = normalizer();
        let a = ArticleCandidate::new("a", "https://a.com/1", "Title A", "Hello World. Foo bar.");
        let b = ArticleCandidate::new("b", "https://b.com/2", "Other", "hello   world.  foo bar.");

        let na = n.normalize(&a, "english").unwrap();
        let nb = n.normalize(&b, "english").unwrap();

        assert_eq!(na.content_fingerprint, nb.content_fingerprint);
        assert_eq!(na.sentences, vec!["Hello World.", "Foo bar."]);
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let n = normalizer();
        let c = ArticleCandidate::new(
            "wire",
            "https://example.com/story?utm_source=x&id=7#top",
            " <h1>Acme  Corp. beats</h1> ",
            "<p>Acme Corp. raised guidance.</p><p>However, shares slipped.</p>",
        );

        let first = n.normalize(&c, "English").unwrap();
        let second = n.normalize(&c, "English").unwrap();

        assert_eq!(first.content_fingerprint, second.content_fingerprint);
        assert_eq!(first.title, "Acme Corp. beats");
        assert_eq!(first.url, "https://example.com/story?id=7");
        assert_eq!(first.language, "english");
        assert_eq!(first.sentences.len(), 2);
    }

    #[test]
    fn test_empty_body_rejected() {
        let c = ArticleCandidate::new("wire", "https://example.com", "Title", "<p> \u{200B} </p>");
        let err = normalizer().normalize(&c, "english").unwrap_err();
        assert!(matches!(err, PipelineError::ParseError(_)));
    }

    #[test]
    fn test_unknown_language_fails_closed() {
        let c = ArticleCandidate::new("wire", "https://example.com", "Titel", "Guten Tag. Wie geht's?");
        let err = normalizer().normalize(&c, "german").unwrap_err();
        assert!(matches!(err, PipelineError::ResourceUnavailable(_)));
    }
}
