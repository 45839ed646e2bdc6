//! Article page text extraction

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::http_client::SourceHttpClient;

static PARAGRAPHS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p").expect("static selector is valid"));

/// Downloads article pages and pulls the readable text out of them
pub struct ArticlePageFetcher {
    client: Arc<SourceHttpClient>,
    selector: Option<Selector>,
}

impl ArticlePageFetcher {
    /// `selector` narrows extraction to the article container; `<p>` elements
    /// are used when it is unset or matches nothing.
    pub fn new(client: Arc<SourceHttpClient>, selector: Option<&str>) -> Result<Self> {
        let selector = selector
            .map(|s| {
                Selector::parse(s).map_err(|e| {
                    PipelineError::ConfigError(format!("invalid body selector {s:?}: {e}"))
                })
            })
            .transpose()?;

        Ok(Self { client, selector })
    }

    /// Fetches a page and returns its article text, if any
    pub async fn fetch_article_text(&self, url: &str) -> Result<Option<String>> {
        let html = self.client.get_text(url).await?;
        Ok(extract_text(&html, self.selector.as_ref()))
    }
}

/// Text of the elements matched by `selector`, else of all paragraphs
pub fn extract_text(html: &str, selector: Option<&Selector>) -> Option<String> {
    let document = Html::parse_document(html);

    let collect = |sel: &Selector| -> String {
        document
            .select(sel)
            .map(|el| el.text().collect::<Vec<_>>().join(" "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    };

    let text = selector
        .map(collect)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| collect(&PARAGRAPHS));

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <nav><p>Subscribe now</p></nav>
          <article class="story">
            <p>Shares of Acme Corp rose 4% on Tuesday.</p>
            <p>The company raised its <b>full-year</b> guidance.</p>
          </article>
        </body></html>
    "#;

    #[test]
    fn test_selector_narrows_extraction() {
        let selector = Selector::parse("article.story p").unwrap();
        let text = extract_text(PAGE, Some(&selector)).unwrap();

        assert!(text.contains("Acme Corp rose 4%"));
        assert!(text.contains("full-year"));
        assert!(!text.contains("Subscribe"));
    }

    #[test]
    fn test_falls_back_to_paragraphs() {
        let selector = Selector::parse("div.missing").unwrap();
        let text = extract_text(PAGE, Some(&selector)).unwrap();
        assert!(text.contains("Subscribe now"));
        assert!(text.contains("guidance"));
    }

    #[test]
    fn test_page_without_text() {
        assert_eq!(extract_text("<html><body><img src=x></body></html>", None), None);
    }
}
