//! Page Extractor: fetch one page and pull goal-relevant findings out of it.
//!
//! Failures never escape as errors. A transport failure becomes
//! `"Error fetching page: …"`, a failing extraction step becomes
//! `"Error during extraction from <url>: …"`, and a page without relevant content yields
//! a statement that the information "could not be found".

use genie_core::{Extraction, LanguageModel, PageFetcher, Result};
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;

/// Upper bound on page text handed to an extraction step.
pub const DEFAULT_MAX_PAGE_CHARS: usize = 12_000;

const TEXT_WIDTH: usize = 100;

/// Convert HTML to readable plain text.
pub fn html_to_text(html: &str, width: usize) -> String {
    html2text::from_read(Cursor::new(html.as_bytes()), width).unwrap_or_else(|_| html.to_string())
}

fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let head: String = s.chars().take(2048).collect::<String>().to_ascii_lowercase();
    head.contains("<html") || head.contains("<!doctype html") || head.contains("<body") || head.contains("<p>")
}

fn class_or_id_lc(el: &html_scraper::ElementRef) -> String {
    let mut out = String::new();
    if let Some(c) = el.value().attr("class") {
        out.push_str(c);
        out.push(' ');
    }
    if let Some(i) = el.value().attr("id") {
        out.push_str(i);
    }
    out.to_ascii_lowercase()
}

const BOILERPLATE: [&str; 12] = [
    "nav", "menu", "sidebar", "footer", "header", "banner", "cookie", "consent", "advert",
    "promo", "subscribe", "newsletter",
];

fn is_boilerplate(el: &html_scraper::ElementRef) -> bool {
    let s = class_or_id_lc(el);
    !s.is_empty() && BOILERPLATE.iter().any(|b| s.contains(b))
}

fn element_text_chars(el: &html_scraper::ElementRef) -> usize {
    el.text().map(|t| t.chars().count()).sum()
}

fn element_link_text_chars(el: &html_scraper::ElementRef, links: &html_scraper::Selector) -> usize {
    el.select(links)
        .map(|a| a.text().map(|t| t.chars().count()).sum::<usize>())
        .sum()
}

/// Text of the densest non-navigation block, preferring `article` and `main`.
///
/// Government pages wrap the useful part in a lot of menus; scoring by non-link text
/// keeps the page body and drops the chrome.
pub fn main_block_text(html: &str) -> Option<String> {
    let doc = html_scraper::Html::parse_document(html);
    let blocks = html_scraper::Selector::parse("article, main, section, div").ok()?;
    let links = html_scraper::Selector::parse("a").ok()?;

    let mut best: Option<(i64, String)> = None;
    for el in doc.select(&blocks).take(20_000) {
        if is_boilerplate(&el) {
            continue;
        }
        let txt = element_text_chars(&el);
        if txt < 20 {
            continue;
        }
        let link_txt = element_link_text_chars(&el, &links);
        let mut score = txt as i64 - 2 * link_txt as i64;
        match el.value().name() {
            "article" => score += 500,
            "main" => score += 300,
            _ => {}
        }
        if link_txt > txt / 2 {
            score -= 500;
        }
        if score > 0 && best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, norm_ws(&el.text().collect::<Vec<_>>().join(" "))));
        }
    }
    best.map(|(_, t)| t).filter(|t| !t.trim().is_empty())
}

pub fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    let mut out = String::new();
    for (n, ch) in s.chars().enumerate() {
        if n >= max_chars {
            return (out, true);
        }
        out.push(ch);
    }
    (out, false)
}

/// Readable, bounded text for fetched markup.
///
/// The html2text rendering keeps paragraph breaks, which the keyword extractor relies
/// on; the main-block text is used when the full rendering is mostly navigation.
pub fn readable_text(markup: &str, max_chars: usize) -> String {
    let text = if looks_like_html(markup) {
        let full = html_to_text(markup, TEXT_WIDTH);
        match main_block_text(markup) {
            Some(main) if main.chars().count() * 3 >= full.chars().count() => full,
            Some(main) => main,
            None => full,
        }
    } else {
        markup.to_string()
    };
    truncate_chars(text.trim(), max_chars).0
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScoredChunk {
    /// Character offset into the provided `text`.
    pub start_char: usize,
    pub end_char: usize,
    /// Number of distinct query terms in the chunk.
    pub score: u64,
    pub text: String,
}

const STOPWORDS: [&str; 40] = [
    "the", "and", "for", "are", "what", "which", "how", "with", "about", "from", "this",
    "that", "there", "their", "into", "does", "can", "you", "your", "any", "all", "was",
    "were", "will", "have", "has", "extract", "information", "relevant", "query", "webpage",
    "focus", "factual", "data", "key", "points", "summaries", "directly", "addressing", "page",
];

/// Lower-case query terms of three or more characters, minus stopwords.
///
/// A quoted segment in `goal` narrows the terms to that segment.
pub fn query_terms(goal: &str) -> Vec<String> {
    let focus = match (goal.find('"'), goal.rfind('"')) {
        (Some(a), Some(b)) if b > a + 1 => &goal[a + 1..b],
        _ => goal,
    };
    let mut out: Vec<String> = Vec::new();
    for t in focus.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if t.chars().count() >= 3 && !STOPWORDS.contains(&t) && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}

fn byte_to_char_index(s: &str, byte: usize) -> usize {
    s.get(..byte).map(|p| p.chars().count()).unwrap_or(0)
}

fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\n' && bytes[i + 1] == b'\n' {
            if i > start {
                spans.push((start, i));
            }
            while i < bytes.len() && bytes[i] == b'\n' {
                i += 1;
            }
            start = i;
            continue;
        }
        i += 1;
    }
    if start < bytes.len() {
        spans.push((start, bytes.len()));
    }
    spans
}

/// Paragraphs of `text` ranked by how many query terms they contain. Ties keep page order.
pub fn best_chunks_for_query(
    text: &str,
    goal: &str,
    top_k: usize,
    max_chunk_chars: usize,
) -> Vec<ScoredChunk> {
    let terms = query_terms(goal);
    if terms.is_empty() {
        return Vec::new();
    }
    let mut scored = Vec::new();
    for (sb, eb) in paragraph_spans(text) {
        let slice = text.get(sb..eb).unwrap_or("").trim();
        if slice.is_empty() {
            continue;
        }
        let lc = slice.to_lowercase();
        let score = terms.iter().filter(|t| lc.contains(t.as_str())).count() as u64;
        if score == 0 {
            continue;
        }
        scored.push(ScoredChunk {
            start_char: byte_to_char_index(text, sb),
            end_char: byte_to_char_index(text, eb),
            score,
            text: truncate_chars(slice, max_chunk_chars.max(50)).0,
        });
    }
    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.start_char.cmp(&b.start_char))
    });
    scored.truncate(top_k.max(1));
    scored
}

fn not_found(url: &str) -> String {
    format!("The requested information could not be found on the page at {url}.")
}

/// Turns readable page text into a concise statement of findings for `goal`.
#[async_trait::async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, page_text: &str, url: &str, goal: &str) -> Result<String>;
}

/// Deterministic extraction: the paragraphs that share the most terms with the goal.
#[derive(Debug, Clone)]
pub struct KeywordContentExtractor {
    pub top_k: usize,
    pub max_chunk_chars: usize,
    /// Paragraphs must match at least this many distinct terms.
    pub min_score: u64,
}

impl Default for KeywordContentExtractor {
    fn default() -> Self {
        Self {
            top_k: 3,
            max_chunk_chars: 600,
            min_score: 2,
        }
    }
}

#[async_trait::async_trait]
impl ContentExtractor for KeywordContentExtractor {
    async fn extract(&self, page_text: &str, url: &str, goal: &str) -> Result<String> {
        let terms = query_terms(goal);
        // One-term goals cannot reach a higher threshold.
        let min_score = self.min_score.min(terms.len() as u64).max(1);
        let chunks: Vec<ScoredChunk> =
            best_chunks_for_query(page_text, goal, self.top_k, self.max_chunk_chars)
                .into_iter()
                .filter(|c| c.score >= min_score)
                .collect();
        if chunks.is_empty() {
            return Ok(not_found(url));
        }
        let mut chunks = chunks;
        chunks.sort_by_key(|c| c.start_char);
        Ok(chunks
            .iter()
            .map(|c| norm_ws(&c.text))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

const EXTRACTION_SYSTEM: &str = "You analyse the text of a single web page for an immigration and visa coach. \
Answer only from the page text you are given. Be concise and factual and address the extraction goal directly. \
If the page does not contain the requested information, reply with one sentence saying that the information could not be found on the page.";

pub struct LlmContentExtractor {
    llm: Arc<dyn LanguageModel>,
}

impl LlmContentExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl ContentExtractor for LlmContentExtractor {
    async fn extract(&self, page_text: &str, url: &str, goal: &str) -> Result<String> {
        let user = format!(
            "Page URL: {url}\nExtraction goal: {goal}\n\nPage text:\n---\n{page_text}\n---\n\nReturn only the extracted information."
        );
        let out = self.llm.complete(EXTRACTION_SYSTEM, &user).await?;
        let out = out.trim();
        if out.is_empty() {
            return Ok(not_found(url));
        }
        Ok(out.to_string())
    }
}

/// Fetch, render, then extract. One fetch per call, no retries.
#[derive(Clone)]
pub struct PageExtractor {
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn ContentExtractor>,
}

impl PageExtractor {
    pub fn new(fetcher: Arc<dyn PageFetcher>, extractor: Arc<dyn ContentExtractor>) -> Self {
        Self { fetcher, extractor }
    }

    pub async fn extract(&self, url: &str, goal: &str) -> Extraction {
        let markup = match self.fetcher.fetch_page(url).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(url, error = %e, "page fetch failed");
                return Extraction {
                    text: format!("Error fetching page: {e}"),
                    source_url: url.to_string(),
                };
            }
        };
        let page_text = readable_text(&markup, DEFAULT_MAX_PAGE_CHARS);
        let text = match self.extractor.extract(&page_text, url, goal).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(url, error = %e, "content extraction failed");
                format!("Error during extraction from {url}: {e}")
            }
        };
        tracing::debug!(url, chars = text.chars().count(), "extraction finished");
        Extraction {
            text,
            source_url: url.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genie_core::informative::extraction_succeeded;
    use genie_core::{Error, FetchError};
    use proptest::prelude::*;

    const PAGE: &str = r#"<html><body>
<div class="navbar"><a href="/">Home</a> <a href="/visas">Visas</a> <a href="/about">About us</a></div>
<article>
<p>The skilled worker visa fee is 719 pounds for applications made outside the UK.</p>
<p>Processing usually takes three weeks for skilled worker applications.</p>
<p>Our offices are closed on public holidays.</p>
</article>
<div class="footer">Copyright</div>
</body></html>"#;

    struct StaticFetcher(std::result::Result<String, FetchError>);

    #[async_trait::async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch_page(&self, _url: &str) -> std::result::Result<String, FetchError> {
            self.0.clone()
        }
    }

    struct FailingExtractor;

    #[async_trait::async_trait]
    impl ContentExtractor for FailingExtractor {
        async fn extract(&self, _t: &str, _u: &str, _g: &str) -> Result<String> {
            Err(Error::Llm("model offline".to_string()))
        }
    }

    fn extractor(fetch: std::result::Result<String, FetchError>) -> PageExtractor {
        PageExtractor::new(
            Arc::new(StaticFetcher(fetch)),
            Arc::new(KeywordContentExtractor::default()),
        )
    }

    #[test]
    fn main_block_prefers_article_over_navigation() {
        let t = main_block_text(PAGE).unwrap();
        assert!(t.contains("719 pounds"));
        assert!(!t.contains("About us"));
    }

    #[test]
    fn query_terms_use_quoted_segment_and_drop_stopwords() {
        let t = query_terms(
            "Extract information relevant to the query: \"What is the skilled worker visa fee?\" from the webpage",
        );
        assert_eq!(t, vec!["skilled", "worker", "visa", "fee"]);
    }

    #[test]
    fn chunks_rank_by_term_overlap_then_page_order() {
        let text = "Fees are listed below.\n\nThe visa fee is 719 pounds.\n\nSkilled worker visa fee rules.";
        let c = best_chunks_for_query(text, "skilled worker visa fee", 2, 200);
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].text, "Skilled worker visa fee rules.");
        assert_eq!(c[1].text, "The visa fee is 719 pounds.");
    }

    #[tokio::test]
    async fn keyword_extraction_finds_relevant_paragraphs() {
        let e = extractor(Ok(PAGE.to_string()))
            .extract("https://www.gov.uk/skilled-worker-visa", "\"skilled worker visa fee\"")
            .await;
        assert!(e.text.contains("719 pounds"), "{}", e.text);
        assert!(!e.text.contains("public holidays"));
        assert!(extraction_succeeded(&e));
    }

    #[tokio::test]
    async fn missing_information_is_stated_as_not_found() {
        let e = extractor(Ok(PAGE.to_string()))
            .extract("https://www.gov.uk/x", "\"australian partner visa backlog\"")
            .await;
        assert!(e.text.contains("could not be found"));
        assert!(!extraction_succeeded(&e));
    }

    #[tokio::test]
    async fn fetch_failure_becomes_marker_text() {
        let url = "https://www.gov.uk/slow";
        let e = extractor(Err(FetchError::Timeout {
            url: url.to_string(),
        }))
        .extract(url, "visa fee")
        .await;
        assert!(e.text.starts_with("Error fetching page:"));
        assert!(e.text.contains("timeout"));
        assert_eq!(e.source_url, url);
        assert!(!extraction_succeeded(&e));
    }

    #[tokio::test]
    async fn extraction_step_failure_becomes_marker_text() {
        let p = PageExtractor::new(
            Arc::new(StaticFetcher(Ok(PAGE.to_string()))),
            Arc::new(FailingExtractor),
        );
        let e = p.extract("https://www.gov.uk/a", "visa fee").await;
        assert!(e.text.starts_with("Error during extraction from https://www.gov.uk/a:"));
        assert!(!extraction_succeeded(&e));
    }

    proptest! {
        #[test]
        fn chunks_are_bounded_and_sorted(
            text in "(?s).{0,400}",
            goal in "[a-z ]{0,40}",
            top_k in 1usize..5,
        ) {
            let out = best_chunks_for_query(&text, &goal, top_k, 80);
            prop_assert!(out.len() <= top_k);
            let n_terms = query_terms(&goal).len() as u64;
            for c in &out {
                prop_assert!(c.score >= 1 && c.score <= n_terms);
                prop_assert!(c.text.chars().count() <= 80);
                prop_assert!(c.start_char <= c.end_char);
            }
            prop_assert!(out.windows(2).all(|w| w[0].score >= w[1].score));
        }

        #[test]
        fn readable_text_respects_char_bound(markup in "(?s).{0,600}", max in 1usize..200) {
            prop_assert!(readable_text(&markup, max).chars().count() <= max);
        }
    }
}
