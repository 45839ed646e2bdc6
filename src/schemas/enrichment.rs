//! EnrichmentResult Schema
//!
//! What an LLM provider adds to an article

use serde::{Deserialize, Serialize};

use super::common::Sentiment;

/// Upper bound of the quality score (100 base points plus bonus)
pub const MAX_SCORE: u16 = 150;

/// Upper bound of each dimension rating
pub const MAX_DIMENSION: u8 = 10;

/// Which aspects of a company the article informs, each rated `0..=MAX_DIMENSION`.
/// `None` means the article says nothing about that aspect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dimensions {
    pub valuation: Option<u8>,
    pub future: Option<u8>,
    pub technical: Option<u8>,
    pub financials: Option<u8>,
    pub dividend: Option<u8>,
    pub management: Option<u8>,
    pub ownership: Option<u8>,
    pub sustainability: Option<u8>,
}

impl Dimensions {
    pub const NAMES: [&'static str; 8] = [
        "valuation",
        "future",
        "technical",
        "financials",
        "dividend",
        "management",
        "ownership",
        "sustainability",
    ];

    pub fn get(&self, name: &str) -> Option<u8> {
        match name {
            "valuation" => self.valuation,
            "future" => self.future,
            "technical" => self.technical,
            "financials" => self.financials,
            "dividend" => self.dividend,
            "management" => self.management,
            "ownership" => self.ownership,
            "sustainability" => self.sustainability,
            _ => None,
        }
    }

    /// Sets a rating by name; unknown names are ignored
    pub fn set(&mut self, name: &str, rating: Option<u8>) {
        let slot = match name {
            "valuation" => &mut self.valuation,
            "future" => &mut self.future,
            "technical" => &mut self.technical,
            "financials" => &mut self.financials,
            "dividend" => &mut self.dividend,
            "management" => &mut self.management,
            "ownership" => &mut self.ownership,
            "sustainability" => &mut self.sustainability,
            _ => return,
        };
        *slot = rating;
    }

    pub fn is_empty(&self) -> bool {
        Self::NAMES.iter().all(|name| self.get(name).is_none())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResult {
    /// One-sentence, non-misleading headline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    /// At most two sentences
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Upper-case symbols of the companies the article is about
    #[serde(default)]
    pub tickers: Vec<String>,
    /// Industry slug, e.g. `semiconductors`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subsector: Option<String>,
    #[serde(default)]
    pub dimensions: Dimensions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    /// Quality score, clamped to `0..=MAX_SCORE`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u16>,
    /// Label of the credential that produced the result (e.g. `groq#2`)
    pub provider_used: String,
    /// Requests sent for this article across all credentials
    pub attempt_count: u32,
}
