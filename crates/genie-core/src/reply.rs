//! Reply-generation contract and the deterministic template generator.

use crate::orchestrator::DialogueState;
use crate::signals::{referenced_option, Profile, ProfileField};
use crate::{
    Error, ReplyGenerator, ResearchOutcome, ResearchToolOutput, Result, Turn, TurnResult,
    VisaOption,
};
use serde::{Deserialize, Serialize};

/// Returned whenever reply generation fails; the only error a user ever sees.
pub const APOLOGY_REPLY: &str =
    "I'm sorry, I encountered an issue while processing your request. Please try again in a moment.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchReport {
    pub budget: f64,
    pub background: String,
    pub options: Vec<VisaOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchReport {
    pub query: String,
    pub outcome: ResearchOutcome,
    pub tool_output: ResearchToolOutput,
    /// Whether the summary is shown as the turn's research context.
    pub surfaced: bool,
}

/// What the orchestrator decided and what the tools returned, handed to the reply step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyRequest {
    pub history: Vec<Turn>,
    pub message: String,
    pub state: DialogueState,
    pub profile: Profile,
    pub missing: Vec<ProfileField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<MatchReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research: Option<ResearchReport>,
    /// Structured output of an earlier turn that is being shown again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reemitted: Option<TurnResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyDraft {
    pub reply: String,
}

impl ReplyDraft {
    /// A draft without reply text is structurally invalid.
    pub fn validate(self) -> Result<Self> {
        let reply = self.reply.trim();
        if reply.is_empty() {
            return Err(Error::InvalidReply("empty reply".to_string()));
        }
        Ok(Self {
            reply: reply.to_string(),
        })
    }

    /// [`validate`](Self::validate), plus the display contract for freshly matched
    /// options: their details live in the option panel, so a reply naming any of them is
    /// invalid.
    pub fn validate_for(self, req: &ReplyRequest) -> Result<Self> {
        let draft = self.validate()?;
        if let Some(m) = &req.matched {
            let lc = draft.reply.to_lowercase();
            if let Some(o) = m
                .options
                .iter()
                .find(|o| lc.contains(&o.name.to_lowercase()))
            {
                return Err(Error::InvalidReply(format!(
                    "reply lists matched option \"{}\"",
                    o.name
                )));
            }
        }
        Ok(draft)
    }
}

fn field_phrase(f: ProfileField) -> &'static str {
    match f {
        ProfileField::Name => "your name",
        ProfileField::Budget => "your budget for the visa process (in USD)",
        ProfileField::Background => "your educational background and work experience",
        ProfileField::Destination => "your destination country",
    }
}

fn join_list(items: &[&str]) -> String {
    match items {
        [] => String::new(),
        [one] => one.to_string(),
        [rest @ .., last] => format!("{}, and {last}", rest.join(", ")),
    }
}

fn usd(n: f64) -> String {
    format!("${n:.0}")
}

const ACRONYMS: [&str; 3] = ["uk", "usa", "uae"];

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|w| {
            if ACRONYMS.contains(&w) {
                return w.to_uppercase();
            }
            let mut c = w.chars();
            match c.next() {
                Some(f) => f.to_uppercase().chain(c).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic replies composed from the turn plan. Used when no language model is
/// configured, and as the reference behaviour in tests.
#[derive(Debug, Clone, Default)]
pub struct TemplateReplyGenerator;

impl TemplateReplyGenerator {
    fn greeting(req: &ReplyRequest) -> Option<String> {
        if !req.history.is_empty() {
            return None;
        }
        Some("Welcome! I'm Japa Genie, your AI visa coach.".to_string())
    }

    fn ask_for_missing(req: &ReplyRequest) -> Option<String> {
        if req.missing.is_empty() {
            return None;
        }
        let phrases: Vec<&str> = req.missing.iter().map(|f| field_phrase(*f)).collect();
        Some(format!(
            "To help you best, could you tell me {}?",
            join_list(&phrases)
        ))
    }

    fn reemission(req: &ReplyRequest, prior: &TurnResult) -> String {
        let mut parts = Vec::new();
        if let Some(i) = referenced_option(&req.message, &prior.options) {
            let o = &prior.options[i];
            parts.push(format!(
                "Good choice to look closer at the {}. It costs about {}, typically takes {}, and needs {} with {}. For a profile like yours the estimated success rate is {:.0}%.",
                o.name,
                usd(o.cost_usd),
                o.processing_time,
                o.min_education,
                o.min_work_experience.to_lowercase(),
                o.success_rate_percent
            ));
            if let Some(reason) = &o.reason {
                parts.push(reason.clone());
            }
        } else if !prior.options.is_empty() {
            parts.push(format!(
                "Let's keep working with the {} options shown in the panel.",
                prior.options.len()
            ));
        }
        if prior.research_context.is_some() {
            parts.push(
                "The research findings from earlier are still in the research panel for reference."
                    .to_string(),
            );
        }
        parts.push("What would you like to know next?".to_string());
        parts.join(" ")
    }

    fn research(r: &ResearchReport) -> String {
        if r.surfaced {
            let summary = match &r.outcome {
                ResearchOutcome::Informative { summary, .. } => summary.trim(),
                ResearchOutcome::PartialFailure {
                    summary: Some(s), ..
                } => s.trim(),
                _ => r.tool_output.analysis_summary.trim(),
            };
            return format!(
                "I looked this up for you. {summary} You can review the findings and their sources in the research panel."
            );
        }
        format!(
            "I tried to research \"{}\" but couldn't get reliable results this time: {} You may want to check the official immigration website directly.",
            r.query,
            r.tool_output.analysis_summary.trim()
        )
    }

    fn matched(m: &MatchReport) -> String {
        if m.options.is_empty() {
            return format!(
                "I couldn't find visa options in my catalog that fit a budget of {} for your background. Would you like to adjust your budget or tell me more about your experience?",
                usd(m.budget)
            );
        }
        let noun = if m.options.len() == 1 { "option" } else { "options" };
        format!(
            "I've looked into this and found {} visa {noun} that fit a budget of {} and your background. You can see the details, including estimated success rates, in the panel. Which one interests you most, or would you like me to compare them?",
            m.options.len(),
            usd(m.budget)
        )
    }

    fn informational(req: &ReplyRequest) -> String {
        let who = req
            .profile
            .name
            .as_deref()
            .map(|n| format!(", {n}"))
            .unwrap_or_default();
        let place = req
            .profile
            .destination
            .as_deref()
            .map(title_case)
            .unwrap_or_else(|| "your destination".to_string());
        format!(
            "Thanks{who}! I can recommend visa routes that fit your budget, explain requirements, or look up the latest immigration statistics and policy changes for {place}. What would you like to explore?"
        )
    }

    pub fn compose(req: &ReplyRequest) -> String {
        if let Some(prior) = &req.reemitted {
            return Self::reemission(req, prior);
        }
        let mut parts: Vec<String> = Vec::new();
        if let Some(r) = &req.research {
            parts.push(Self::research(r));
        }
        if let Some(m) = &req.matched {
            parts.push(Self::matched(m));
        }
        if parts.is_empty() {
            match req.state {
                DialogueState::Discovery => {
                    parts.extend(Self::greeting(req));
                    parts.extend(Self::ask_for_missing(req));
                }
                _ => parts.push(Self::informational(req)),
            }
        }
        parts.join(" ")
    }
}

#[async_trait::async_trait]
impl ReplyGenerator for TemplateReplyGenerator {
    async fn generate(&self, req: &ReplyRequest) -> Result<ReplyDraft> {
        ReplyDraft {
            reply: Self::compose(req),
        }
        .validate()
    }
}
