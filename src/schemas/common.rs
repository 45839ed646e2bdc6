//! Common Schema Primitives
//!
//! Shared types used across all schemas

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ============================================
// FINGERPRINT
// ============================================

/// SHA-256 of an article body after case and whitespace normalization.
///
/// The fingerprint is the only deduplication key and the primary key of the
/// stored row. Titles never contribute to it.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of a body text
    pub fn of_body(body: &str) -> Self {
        let canonical = canonical_body(body);
        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex::encode(digest))
    }

    /// Wraps a fingerprint read back from the store
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for logs
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lowercases and collapses every whitespace run into one space
fn canonical_body(body: &str) -> String {
    body.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================
// COMMON ENUMS
// ============================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl Sentiment {
    /// Parses the labels LLMs tend to produce; unknown labels yield `None`
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "bullish" | "positive" => Some(Self::Bullish),
            "bearish" | "negative" => Some(Self::Bearish),
            "neutral" | "mixed" => Some(Self::Neutral),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bullish => "bullish",
            Self::Bearish => "bearish",
            Self::Neutral => "neutral",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_case_and_whitespace() {
        let a = Fingerprint::of_body("Hello World. Foo bar.");
        let b = Fingerprint::of_body("hello   world.  foo bar.");
        let c = Fingerprint::of_body("Hello World. Foo baz.");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64); // SHA-256 = 64 hex chars
    }

    #[test]
    fn test_fingerprint_trims_edges_and_newlines() {
        let a = Fingerprint::of_body("\n  Markets rallied\ttoday.\r\n");
        let b = Fingerprint::of_body("markets rallied today.");
        assert_eq!(a, b);
    }

    #[test]
    fn test_sentiment_labels() {
        assert_eq!(Sentiment::from_label(" Bullish "), Some(Sentiment::Bullish));
        assert_eq!(Sentiment::from_label("negative"), Some(Sentiment::Bearish));
        assert_eq!(Sentiment::from_label("sideways"), None);
    }
}
