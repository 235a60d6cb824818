//! The two concrete search providers.
//!
//! A small closed set: the structured Instant Answer API first, the HTML
//! scrape second. Both make a single bounded attempt; the chain in
//! `engine.rs` owns timeouts and fallback ordering.

use async_trait::async_trait;
use keepsake_core::error::SearchError;
use keepsake_core::search::{SearchProvider, SearchResult};
use tracing::debug;

const USER_AGENT: &str = "keepsake/0.1 (+https://github.com/keepsake-ai/keepsake)";

/// Primary provider: DuckDuckGo Instant Answer API (JSON).
pub struct InstantAnswerProvider {
    client: reqwest::Client,
    endpoint: String,
    max_snippet_chars: usize,
}

impl InstantAnswerProvider {
    pub fn new(max_snippet_chars: usize) -> Self {
        Self::with_endpoint("https://api.duckduckgo.com", max_snippet_chars)
    }

    /// Point at a different base URL (used by tests).
    pub fn with_endpoint(endpoint: impl Into<String>, max_snippet_chars: usize) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            max_snippet_chars,
        }
    }
}

#[async_trait]
impl SearchProvider for InstantAnswerProvider {
    fn name(&self) -> &str {
        "instant_answer"
    }

    async fn resolve(&self, query: &str) -> Result<SearchResult, SearchError> {
        let url = format!("{}/?format=json&no_html=1&skip_disambig=1", self.endpoint);
        let response = self
            .client
            .get(&url)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| SearchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Http {
                status: status.as_u16(),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SearchError::Network(format!("body decode: {e}")))?;

        let snippet = extract_instant_answer(&body, self.max_snippet_chars)
            .ok_or(SearchError::EmptyAnswer)?;

        debug!(query, chars = snippet.len(), "Instant answer resolved");
        Ok(SearchResult {
            query: query.to_string(),
            provider: self.name().to_string(),
            snippet,
            stale: false,
        })
    }
}

/// Secondary provider: DuckDuckGo HTML results page, reduced to readable
/// text with html2text.
pub struct ScrapeProvider {
    client: reqwest::Client,
    endpoint: String,
    max_snippet_chars: usize,
}

impl ScrapeProvider {
    pub fn new(max_snippet_chars: usize) -> Self {
        Self::with_endpoint("https://html.duckduckgo.com/html", max_snippet_chars)
    }

    /// Point at a different base URL (used by tests).
    pub fn with_endpoint(endpoint: impl Into<String>, max_snippet_chars: usize) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            max_snippet_chars,
        }
    }
}

#[async_trait]
impl SearchProvider for ScrapeProvider {
    fn name(&self) -> &str {
        "scrape"
    }

    async fn resolve(&self, query: &str) -> Result<SearchResult, SearchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| SearchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Http {
                status: status.as_u16(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| SearchError::Network(format!("body read: {e}")))?;

        let snippet = extract_readable(&html, self.max_snippet_chars);
        if snippet.is_empty() {
            return Err(SearchError::EmptyAnswer);
        }

        debug!(query, chars = snippet.len(), "Scrape resolved");
        Ok(SearchResult {
            query: query.to_string(),
            provider: self.name().to_string(),
            snippet,
            stale: false,
        })
    }
}

/// Pull the best answer text out of an Instant Answer response.
/// Preference order: AbstractText, Answer, Definition, first RelatedTopic.
fn extract_instant_answer(body: &serde_json::Value, max_chars: usize) -> Option<String> {
    let candidates = [
        body.get("AbstractText").and_then(|v| v.as_str()),
        body.get("Answer").and_then(|v| v.as_str()),
        body.get("Definition").and_then(|v| v.as_str()),
        body.get("RelatedTopics")
            .and_then(|v| v.as_array())
            .and_then(|topics| topics.first())
            .and_then(|t| t.get("Text"))
            .and_then(|v| v.as_str()),
    ];

    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(|s| clip(s, max_chars))
}

/// Reduce an HTML results page to readable text.
fn extract_readable(html: &str, max_chars: usize) -> String {
    let text = match html2text::from_read(html.as_bytes(), 100) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_html_tags(html),
    };

    // Drop navigation noise: keep lines with actual sentence-like content.
    let cleaned: String = text
        .lines()
        .map(str::trim)
        .filter(|line| line.len() > 20 && !line.starts_with('['))
        .collect::<Vec<_>>()
        .join(" ");

    clip(cleaned.trim(), max_chars)
}

/// Minimal tag stripper used when html2text cannot handle the input.
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clip at a character boundary without splitting words where possible.
fn clip(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let clipped: String = s.chars().take(max_chars).collect();
    match clipped.rfind(' ') {
        Some(idx) if idx > max_chars / 2 => clipped[..idx].to_string(),
        _ => clipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_answer_prefers_abstract_text() {
        let body = serde_json::json!({
            "AbstractText": "Rust is a systems programming language.",
            "Answer": "secondary",
        });
        let snippet = extract_instant_answer(&body, 200).unwrap();
        assert!(snippet.starts_with("Rust is"));
    }

    #[test]
    fn instant_answer_falls_back_to_related_topics() {
        let body = serde_json::json!({
            "AbstractText": "",
            "Answer": "",
            "Definition": "",
            "RelatedTopics": [{"Text": "Topic text here"}],
        });
        assert_eq!(extract_instant_answer(&body, 200).unwrap(), "Topic text here");
    }

    #[test]
    fn instant_answer_empty_is_none() {
        let body = serde_json::json!({"AbstractText": "", "RelatedTopics": []});
        assert!(extract_instant_answer(&body, 200).is_none());
    }

    #[test]
    fn readable_extraction_drops_short_lines() {
        let html = "<html><body><p>This is a sufficiently long sentence of result text.</p>\
                    <a>nav</a></body></html>";
        let text = extract_readable(html, 500);
        assert!(text.contains("sufficiently long sentence"));
        assert!(!text.contains("nav"));
    }

    #[test]
    fn strip_tags_fallback() {
        assert_eq!(
            strip_html_tags("<div>hello <b>world</b></div>"),
            "hello world"
        );
    }

    #[test]
    fn clip_respects_word_boundary() {
        let clipped = clip("the quick brown fox jumps over the lazy dog", 20);
        assert!(clipped.chars().count() <= 20);
        assert!(!clipped.ends_with(' '));
        assert!("the quick brown fox jumps over the lazy dog".starts_with(&clipped));
    }

    #[test]
    fn clip_noop_under_limit() {
        assert_eq!(clip("short", 100), "short");
    }
}
