//! Research Pipeline: suggest sources, extract from each, synthesize one summary.

use crate::extract::{truncate_chars, ContentExtractor, KeywordContentExtractor, LlmContentExtractor, PageExtractor};
use crate::llm::parse_json_reply;
use genie_core::informative::{extraction_succeeded, is_degenerate_summary};
use genie_core::signals::has_phrase;
use genie_core::{
    Extraction, LanguageModel, PageFetcher, ResearchOutcome, ResearchTool, Result,
    NO_URLS, NO_USABLE_SOURCES, SYNTHESIS_FAILED,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pages extracted per query.
pub const MAX_SOURCES: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[async_trait::async_trait]
pub trait SourceSuggester: Send + Sync {
    async fn suggest(&self, query: &str) -> Result<Suggestion>;
}

#[async_trait::async_trait]
pub trait Synthesizer: Send + Sync {
    /// `texts` are formatted `Source: <url>\nContent: <text>`.
    async fn synthesize(&self, query: &str, texts: &[String]) -> Result<String>;
}

/// Valid http(s) URLs, first occurrence only, at most [`MAX_SOURCES`].
pub fn normalize_urls(urls: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in urls {
        let Ok(u) = url::Url::parse(raw.trim()) else {
            tracing::debug!(url = %raw, "dropping unparseable suggested url");
            continue;
        };
        if !matches!(u.scheme(), "http" | "https") {
            continue;
        }
        let s = u.to_string();
        if !out.contains(&s) {
            out.push(s);
        }
        if out.len() == MAX_SOURCES {
            break;
        }
    }
    out
}

pub fn extraction_goal(query: &str) -> String {
    format!(
        "Extract information relevant to the query: \"{query}\". Focus on factual data, key points and summaries directly addressing the query."
    )
}

const SUGGEST_SYSTEM: &str = "You pick authoritative web pages for immigration research. \
Prefer official government immigration websites, then major reputable news outlets and international organisations. \
Respond with a JSON object only: {\"urls\": [\"https://...\"], \"reasoning\": \"...\"}. \
Suggest at most 2 URLs. If the query is too broad for specific pages, return an empty list and explain why in reasoning.";

pub struct LlmSourceSuggester {
    llm: Arc<dyn LanguageModel>,
}

impl LlmSourceSuggester {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl SourceSuggester for LlmSourceSuggester {
    async fn suggest(&self, query: &str) -> Result<Suggestion> {
        let raw = self
            .llm
            .complete(SUGGEST_SYSTEM, &format!("Query: \"{query}\""))
            .await?;
        parse_json_reply(&raw)
    }
}

/// Fixed map from destination names to official immigration sites.
#[derive(Debug, Clone)]
pub struct SeedSourceSuggester {
    seeds: Vec<(Vec<String>, Vec<String>)>,
}

fn seed(names: &[&str], urls: &[&str]) -> (Vec<String>, Vec<String>) {
    (
        names.iter().map(|s| s.to_string()).collect(),
        urls.iter().map(|s| s.to_string()).collect(),
    )
}

impl Default for SeedSourceSuggester {
    fn default() -> Self {
        Self::new(vec![
            seed(
                &["canada", "canadian"],
                &["https://www.canada.ca/en/immigration-refugees-citizenship.html"],
            ),
            seed(
                &["uk", "united kingdom", "britain", "british", "england"],
                &["https://www.gov.uk/browse/visas-immigration"],
            ),
            seed(
                &["germany", "german"],
                &["https://www.make-it-in-germany.com/en/visa-residence"],
            ),
            seed(
                &["australia", "australian"],
                &["https://immi.homeaffairs.gov.au/visas/getting-a-visa/visa-listing"],
            ),
            seed(
                &["usa", "united states", "america", "american", "h-1b", "h1b"],
                &[
                    "https://travel.state.gov/content/travel/en/us-visas.html",
                    "https://www.uscis.gov/working-in-the-united-states",
                ],
            ),
            seed(&["netherlands", "dutch"], &["https://ind.nl/en"]),
            seed(&["ireland", "irish"], &["https://www.irishimmigration.ie/"]),
            seed(&["new zealand"], &["https://www.immigration.govt.nz/new-zealand-visas"]),
            seed(&["portugal", "portuguese"], &["https://vistos.mne.gov.pt/en/"]),
        ])
    }
}

impl SeedSourceSuggester {
    pub fn new(seeds: Vec<(Vec<String>, Vec<String>)>) -> Self {
        Self { seeds }
    }
}

#[async_trait::async_trait]
impl SourceSuggester for SeedSourceSuggester {
    async fn suggest(&self, query: &str) -> Result<Suggestion> {
        let lc = query.to_lowercase();
        let mut urls = Vec::new();
        let mut matched = Vec::new();
        for (names, seed_urls) in &self.seeds {
            if let Some(n) = names.iter().find(|n| has_phrase(&lc, n, true)) {
                matched.push(n.clone());
                urls.extend(seed_urls.iter().cloned());
            }
        }
        let reasoning = if urls.is_empty() {
            "No official immigration source is known for this query; naming a destination country would narrow it down.".to_string()
        } else {
            format!("Official immigration sites for: {}.", matched.join(", "))
        };
        Ok(Suggestion {
            urls,
            reasoning: Some(reasoning),
        })
    }
}

const SYNTH_SYSTEM: &str = "You are a research analyst for a visa coach. \
Synthesize the extracted web texts into a concise, analytical summary that directly answers the original query. \
If the texts mostly say the information could not be found or accessed, clearly state that the information could not be retrieved and briefly say why. \
Do not invent figures that are not in the texts.";

pub struct LlmSynthesizer {
    llm: Arc<dyn LanguageModel>,
}

impl LlmSynthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(&self, query: &str, texts: &[String]) -> Result<String> {
        let user = format!(
            "Original query: \"{query}\"\n\nExtracted information from web sources:\n{}\n\nWrite the summary.",
            texts.join("\n---\n")
        );
        self.llm.complete(SYNTH_SYSTEM, &user).await
    }
}

/// Deterministic synthesis: the leading sentences of each source's content, in source
/// order, bounded in length.
#[derive(Debug, Clone)]
pub struct ExtractiveSynthesizer {
    pub sentences_per_source: usize,
    pub max_chars: usize,
}

impl Default for ExtractiveSynthesizer {
    fn default() -> Self {
        Self {
            sentences_per_source: 3,
            max_chars: 1_200,
        }
    }
}

fn leading_sentences(text: &str, n: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::new();
    let mut taken = 0usize;
    for piece in flat.split_inclusive(['.', '!', '?']) {
        if taken == n {
            break;
        }
        out.push_str(piece);
        taken += 1;
    }
    out.trim().to_string()
}

#[async_trait::async_trait]
impl Synthesizer for ExtractiveSynthesizer {
    async fn synthesize(&self, _query: &str, texts: &[String]) -> Result<String> {
        let parts: Vec<String> = texts
            .iter()
            .map(|t| t.split_once("\nContent: ").map_or(t.as_str(), |(_, c)| c))
            .map(|c| leading_sentences(c, self.sentences_per_source))
            .filter(|s| !s.is_empty())
            .collect();
        Ok(truncate_chars(&parts.join(" "), self.max_chars).0)
    }
}

/// The research tool: `suggest -> extract (concurrently) -> synthesize`.
pub struct ResearchPipeline {
    suggester: Arc<dyn SourceSuggester>,
    extractor: PageExtractor,
    synthesizer: Arc<dyn Synthesizer>,
}

impl ResearchPipeline {
    pub fn new(
        suggester: Arc<dyn SourceSuggester>,
        extractor: PageExtractor,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            suggester,
            extractor,
            synthesizer,
        }
    }

    /// LLM-backed steps when a model is available, deterministic ones otherwise.
    pub fn for_model(fetcher: Arc<dyn PageFetcher>, llm: Option<Arc<dyn LanguageModel>>) -> Self {
        match llm {
            Some(llm) => {
                let content: Arc<dyn ContentExtractor> =
                    Arc::new(LlmContentExtractor::new(llm.clone()));
                Self::new(
                    Arc::new(LlmSourceSuggester::new(llm.clone())),
                    PageExtractor::new(fetcher, content),
                    Arc::new(LlmSynthesizer::new(llm)),
                )
            }
            None => Self::new(
                Arc::new(SeedSourceSuggester::default()),
                PageExtractor::new(fetcher, Arc::new(KeywordContentExtractor::default())),
                Arc::new(ExtractiveSynthesizer::default()),
            ),
        }
    }

    pub fn extractor(&self) -> &PageExtractor {
        &self.extractor
    }

    /// Run the pipeline and keep the per-source extractions for inspection.
    pub async fn run(&self, query: &str) -> (ResearchOutcome, Vec<Extraction>) {
        let suggestion = match self.suggester.suggest(query).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(query, error = %e, "source suggestion failed");
                return (ResearchOutcome::total(NO_URLS, Some(e.to_string())), Vec::new());
            }
        };
        let urls = normalize_urls(&suggestion.urls);
        if urls.is_empty() {
            tracing::warn!(query, "no source urls suggested");
            return (ResearchOutcome::total(NO_URLS, suggestion.reasoning), Vec::new());
        }
        tracing::info!(query, urls = ?urls, "extracting from suggested sources");

        let goal = extraction_goal(query);
        let extractions: Vec<Extraction> = futures_util::future::join_all(
            urls.iter().map(|u| self.extractor.extract(u, &goal)),
        )
        .await;

        let successful: Vec<&Extraction> =
            extractions.iter().filter(|e| extraction_succeeded(e)).collect();
        if successful.is_empty() {
            tracing::warn!(query, attempted = extractions.len(), "no usable sources");
            let detail = extractions
                .iter()
                .map(|e| e.text.trim())
                .collect::<Vec<_>>()
                .join(" | ");
            return (
                ResearchOutcome::total(NO_USABLE_SOURCES, Some(detail)),
                extractions,
            );
        }

        let texts: Vec<String> = successful
            .iter()
            .map(|e| format!("Source: {}\nContent: {}", e.source_url, e.text.trim()))
            .collect();
        let sources: Vec<String> = successful.iter().map(|e| e.source_url.clone()).collect();

        let outcome = match self.synthesizer.synthesize(query, &texts).await {
            Ok(s) if !is_degenerate_summary(s.trim()) => ResearchOutcome::Informative {
                summary: s.trim().to_string(),
                sources,
            },
            Ok(s) => {
                tracing::warn!(query, "synthesis produced a degenerate summary");
                ResearchOutcome::PartialFailure {
                    reason: SYNTHESIS_FAILED.to_string(),
                    summary: Some(s.trim().to_string()).filter(|s| !s.is_empty()),
                }
            }
            Err(e) => {
                tracing::warn!(query, error = %e, "synthesis failed");
                ResearchOutcome::PartialFailure {
                    reason: SYNTHESIS_FAILED.to_string(),
                    summary: None,
                }
            }
        };
        (outcome, extractions)
    }
}

#[async_trait::async_trait]
impl ResearchTool for ResearchPipeline {
    async fn research(&self, query: &str) -> ResearchOutcome {
        self.run(query).await.0
    }
}
