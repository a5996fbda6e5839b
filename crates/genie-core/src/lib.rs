//! Backend-agnostic core of the Japa Genie visa coach.
//!
//! This crate holds the data model, the collaborator traits (transport, LLM, catalog,
//! research, option advice, reply generation) and all of the deterministic turn policy. It does no IO:
//! concrete fetchers and LLM clients live in `genie-local`.

use serde::{Deserialize, Serialize};

pub mod advice;
pub mod catalog;
pub mod informative;
pub mod matcher;
pub mod orchestrator;
pub mod policy;
pub mod reply;
pub mod signals;

pub use advice::{OptionAdvisor, TemplateAdvisor};
pub use catalog::BuiltinCatalog;
pub use orchestrator::{Conversation, DialogueState, Orchestrator, TurnPlan};
pub use policy::PolicyConfig;
pub use reply::{ReplyDraft, ReplyRequest, TemplateReplyGenerator, APOLOGY_REPLY};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("invalid reply: {0}")]
    InvalidReply(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "model")]
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            text: text.into(),
        }
    }
}

/// Append-only record of a conversation. Turns are never edited or removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the appended turn.
    pub fn push(&mut self, turn: Turn) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The last `n` turns, oldest first.
    pub fn tail(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn user_turns(&self) -> impl DoubleEndedIterator<Item = &Turn> {
        self.turns.iter().filter(|t| t.role == Role::User)
    }
}

impl From<Vec<Turn>> for History {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}

/// One entry of the visa option catalog.
///
/// Options are shown verbatim by the display layer, so they are always replaced as a
/// whole set and never patched field by field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisaOption {
    pub name: String,
    pub cost_usd: f64,
    pub min_education: String,
    pub min_work_experience: String,
    pub processing_time: String,
    /// Estimated success rate for a similar profile, 0..=100.
    pub success_rate_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result of running the Page Extractor against one URL.
///
/// Failures are encoded in `text` (see [`informative::FAILURE_MARKERS`]) rather than
/// raised, so downstream steps can reason about them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    pub text: String,
    pub source_url: String,
}

pub const NO_URLS: &str = "no URLs";
pub const NO_USABLE_SOURCES: &str = "no usable sources";
pub const SYNTHESIS_FAILED: &str = "extraction succeeded, synthesis failed";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResearchOutcome {
    Informative {
        summary: String,
        /// Successful source URLs in suggestion order, without duplicates.
        sources: Vec<String>,
    },
    PartialFailure {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    TotalFailure {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl ResearchOutcome {
    pub fn total(reason: &str, detail: Option<String>) -> Self {
        Self::TotalFailure {
            reason: reason.to_string(),
            detail,
        }
    }

    /// Degraded-but-never-failing view handed to a reply generator as a tool result.
    pub fn to_tool_output(&self, query: &str) -> ResearchToolOutput {
        match self {
            Self::Informative { summary, sources } => ResearchToolOutput {
                analysis_summary: summary.trim().to_string(),
                source_urls_used: (!sources.is_empty()).then(|| sources.clone()),
            },
            Self::PartialFailure { summary, .. } => ResearchToolOutput {
                analysis_summary: summary
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        format!(
                            "Information was extracted from web sources for the query \"{query}\", but the final summarization step did not produce a usable summary."
                        )
                    }),
                source_urls_used: None,
            },
            Self::TotalFailure { reason, detail } if reason == NO_URLS => ResearchToolOutput {
                analysis_summary: format!(
                    "Could not identify specific authoritative URLs for the query: \"{query}\". {}",
                    detail
                        .as_deref()
                        .unwrap_or("The query might be too broad or no URLs were suggested.")
                )
                .trim()
                .to_string(),
                source_urls_used: None,
            },
            Self::TotalFailure { .. } => ResearchToolOutput {
                analysis_summary: format!(
                    "Could not extract usable information from the suggested web sources for the query: \"{query}\". All attempted sources might have been inaccessible, returned errors, or contained no relevant content."
                ),
                source_urls_used: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResearchToolOutput {
    pub analysis_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_urls_used: Option<Vec<String>>,
}

/// The per-turn output contract consumed by the display layer.
///
/// `research_context == None` means "do not render a research panel"; empty `options`
/// means "do not render option cards".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub reply: String,
    #[serde(default)]
    pub options: Vec<VisaOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_context: Option<String>,
}

impl TurnResult {
    pub fn reply_only(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            options: Vec::new(),
            research_context: None,
        }
    }

    pub fn apology() -> Self {
        Self::reply_only(APOLOGY_REPLY)
    }

    pub fn has_structured(&self) -> bool {
        !self.options.is_empty() || self.research_context.is_some()
    }
}

/// Transport failure. Carries a human-readable reason; the Page Extractor turns it into
/// marker text instead of propagating it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to fetch content from {url} due to a timeout")]
    Timeout { url: String },
    #[error("failed to fetch content from {url}. Status: {status}")]
    Http { url: String, status: u16 },
    #[error("an unexpected error occurred while fetching {url}: {reason}")]
    Other { url: String, reason: String },
}

#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> std::result::Result<String, FetchError>;
}

#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Read-only source of the option superset consumed by the matcher.
pub trait OptionCatalog: Send + Sync {
    fn options(&self) -> Result<Vec<VisaOption>>;
}

#[async_trait::async_trait]
pub trait ResearchTool: Send + Sync {
    /// Never fails: every failure mode is a [`ResearchOutcome`] variant.
    async fn research(&self, query: &str) -> ResearchOutcome;
}

#[async_trait::async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, req: &ReplyRequest) -> Result<ReplyDraft>;
}
