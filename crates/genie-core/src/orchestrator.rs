//! Dialogue Orchestrator: the per-turn decision rules and output assembly.
//!
//! The dialogue "state" is never stored. Each turn it is re-derived from the message
//! and the conversation, so the stored history is the only source of truth.
//!
//! Rules, in priority order:
//! 1. re-emit the newest structured result of the last `reemit_window` agent turns when
//!    the message continues that discussion without introducing anything new;
//! 2. run research for time-sensitive questions;
//! 3. run the option matcher when budget and background are known and the message
//!    supplies one of them or asks for recommendations (2 and 3 may both fire); the
//!    matched set is then annotated with coaching reasons as a whole;
//! 4. otherwise reply conversationally.

use crate::advice::{with_reasons, OptionAdvisor, TemplateAdvisor};
use crate::informative::is_informative;
use crate::matcher::fetch_options;
use crate::reply::{MatchReport, ResearchReport};
use crate::signals::{mentions_option, research_query, MessageSignals, Profile, ProfileField};
use crate::{
    Error, History, OptionCatalog, PolicyConfig, ReplyGenerator, ReplyRequest, ResearchOutcome,
    ResearchTool, Result, Role, Turn, TurnResult, VisaOption,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueState {
    /// Budget, background or destination still unknown.
    Discovery,
    /// General Q&A, no tool needed.
    Informational,
    /// A tool call is outstanding within the current turn.
    AwaitingToolResult,
    /// Structured results were just produced or re-emitted.
    Presenting,
}

/// A structured result emitted for the agent turn at `turn` in the history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmittedResult {
    pub turn: usize,
    pub result: TurnResult,
}

/// History plus the results emitted for agent turns. Only appended to, by one writer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    history: History,
    #[serde(default)]
    emitted: Vec<EmittedResult>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A conversation whose earlier agent turns carried no structured output.
    pub fn from_history(history: History) -> Self {
        Self {
            history,
            emitted: Vec::new(),
        }
    }

    /// Rebuild a conversation from stored parts, checking that every emitted result
    /// belongs to an agent turn.
    pub fn from_parts(history: History, emitted: Vec<EmittedResult>) -> Result<Self> {
        let c = Self { history, emitted };
        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> Result<()> {
        let mut last: Option<usize> = None;
        for e in &self.emitted {
            match self.history.turns().get(e.turn) {
                Some(t) if t.role == Role::Agent => {}
                _ => {
                    return Err(Error::Config(format!(
                        "emitted result for turn {} does not point at an agent turn",
                        e.turn
                    )))
                }
            }
            if last.is_some_and(|l| l >= e.turn) {
                return Err(Error::Config(
                    "emitted results must be in increasing turn order".to_string(),
                ));
            }
            last = Some(e.turn);
        }
        Ok(())
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn emitted(&self) -> &[EmittedResult] {
        &self.emitted
    }

    /// Append the user's message and the agent's result as two new turns.
    pub fn record(&mut self, message: &str, result: &TurnResult) {
        self.history.push(Turn::user(message));
        let turn = self.history.push(Turn::agent(result.reply.clone()));
        self.emitted.push(EmittedResult {
            turn,
            result: result.clone(),
        });
    }

    pub fn result_for(&self, turn: usize) -> Option<&TurnResult> {
        self.emitted
            .iter()
            .find(|e| e.turn == turn)
            .map(|e| &e.result)
    }

    /// Newest result with options or research context among the last `window` agent
    /// turns.
    pub fn recent_structured(&self, window: usize) -> Option<(usize, &TurnResult)> {
        self.history
            .turns()
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, t)| t.role == Role::Agent)
            .take(window)
            .find_map(|(i, _)| {
                self.result_for(i)
                    .filter(|r| r.has_structured())
                    .map(|r| (i, r))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub budget: f64,
    pub background: String,
}

/// The decision for one turn, computed before any tool runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnPlan {
    pub state: DialogueState,
    pub signals: MessageSignals,
    pub profile: Profile,
    pub missing: Vec<ProfileField>,
    /// Agent turn whose structured output is re-emitted unchanged.
    pub reemit_from: Option<usize>,
    pub research_query: Option<String>,
    pub match_request: Option<MatchRequest>,
}

impl TurnPlan {
    pub fn invokes_tools(&self) -> bool {
        self.research_query.is_some() || self.match_request.is_some()
    }
}

pub struct Orchestrator {
    catalog: Arc<dyn OptionCatalog>,
    research: Arc<dyn ResearchTool>,
    replies: Arc<dyn ReplyGenerator>,
    advisor: Arc<dyn OptionAdvisor>,
    policy: PolicyConfig,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<dyn OptionCatalog>,
        research: Arc<dyn ResearchTool>,
        replies: Arc<dyn ReplyGenerator>,
    ) -> Self {
        Self {
            catalog,
            research,
            replies,
            advisor: Arc::new(TemplateAdvisor),
            policy: PolicyConfig::default(),
        }
    }

    /// Replace the default [`TemplateAdvisor`].
    pub fn with_advisor(mut self, advisor: Arc<dyn OptionAdvisor>) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Decide what this turn does. Pure: no tool is called.
    pub fn plan(&self, conversation: &Conversation, message: &str) -> TurnPlan {
        let cfg = &self.policy;
        let signals = MessageSignals::extract(message, cfg);
        let known = Profile::from_history(conversation.history(), cfg);
        let mut profile = known.clone();
        profile.apply(&signals);
        let missing = profile.missing();

        let prior = conversation.recent_structured(cfg.reemit_window);
        if let Some((turn, prior)) = prior {
            let refers = mentions_option(message, &prior.options);
            let new_destination = signals
                .destination
                .as_ref()
                .is_some_and(|d| known.destination.as_ref() != Some(d));
            // Option names contain background words ("Tech Talent"), so a reference to a
            // shown option does not count as a new background.
            let introduces_new = signals.budget.is_some()
                || signals.research
                || new_destination
                || (signals.background.is_some() && !refers);
            if !introduces_new && (signals.continuation || refers) {
                return TurnPlan {
                    state: DialogueState::Presenting,
                    signals,
                    profile,
                    missing,
                    reemit_from: Some(turn),
                    research_query: None,
                    match_request: None,
                };
            }
        }

        let research_query = signals
            .research
            .then(|| research_query(message, &signals, &known));

        let supplies_profile = signals.budget.is_some() || signals.background.is_some();
        let match_request = match (&profile.budget, &profile.background) {
            (Some(budget), Some(background))
                if supplies_profile || signals.asks_recommendation =>
            {
                Some(MatchRequest {
                    budget: *budget,
                    background: background.clone(),
                })
            }
            _ => None,
        };

        let state = if research_query.is_some() || match_request.is_some() {
            DialogueState::AwaitingToolResult
        } else if profile.needs_discovery() {
            DialogueState::Discovery
        } else {
            DialogueState::Informational
        };

        TurnPlan {
            state,
            signals,
            profile,
            missing,
            reemit_from: None,
            research_query,
            match_request,
        }
    }

    /// Whether a research outcome may be shown as structured context, and with which
    /// text. Partial failures are shown only when their summary is independently
    /// informative.
    pub fn admit_research(&self, outcome: &ResearchOutcome) -> Option<String> {
        match outcome {
            ResearchOutcome::Informative { summary, .. } => Some(summary.clone()),
            ResearchOutcome::PartialFailure {
                summary: Some(s), ..
            } if is_informative(s, self.policy.min_informative_chars) => Some(s.clone()),
            _ => None,
        }
    }

    /// Matched options with a reason on every entry. The advisor's set is used only if it
    /// covers exactly the matched options; otherwise the whole set gets template reasons.
    async fn advise(&self, request: &MatchRequest, options: Vec<VisaOption>) -> Vec<VisaOption> {
        if options.is_empty() {
            return options;
        }
        match self.advisor.advise(request, &options).await {
            Ok(advised) => match with_reasons(&options, &advised) {
                Some(v) => return v,
                None => tracing::warn!(
                    expected = options.len(),
                    got = advised.len(),
                    "advice does not cover the matched options; using template reasons"
                ),
            },
            Err(e) => tracing::warn!(error = %e, "option advice failed; using template reasons"),
        }
        TemplateAdvisor::annotate(request, &options)
    }

    /// Produce this turn's result without touching the conversation.
    ///
    /// Never fails: a failing or invalid reply step yields the fixed apology.
    pub async fn respond(&self, conversation: &Conversation, message: &str) -> TurnResult {
        let plan = self.plan(conversation, message);
        tracing::info!(
            state = ?plan.state,
            reemit_from = ?plan.reemit_from,
            research = plan.research_query.is_some(),
            matching = plan.match_request.is_some(),
            "turn planned"
        );

        let mut options = Vec::new();
        let mut research_context = None;
        let mut matched = None;
        let mut research = None;
        let mut reemitted = None;

        if let Some(prior) = plan.reemit_from.and_then(|t| conversation.result_for(t)) {
            options = prior.options.clone();
            research_context = prior.research_context.clone();
            reemitted = Some(prior.clone());
        }

        if let Some(query) = &plan.research_query {
            tracing::debug!(state = ?DialogueState::AwaitingToolResult, query, "research started");
            let outcome = self.research.research(query).await;
            research_context = self.admit_research(&outcome);
            if research_context.is_none() {
                tracing::info!(query, outcome = ?outcome, "research result omitted");
            }
            research = Some(ResearchReport {
                query: query.clone(),
                tool_output: outcome.to_tool_output(query),
                surfaced: research_context.is_some(),
                outcome,
            });
        }

        if let Some(m) = &plan.match_request {
            tracing::debug!(state = ?DialogueState::AwaitingToolResult, budget = m.budget, "option lookup started");
            let found = fetch_options(self.catalog.as_ref(), m.budget, &m.background);
            options = self.advise(m, found).await;
            matched = Some(MatchReport {
                budget: m.budget,
                background: m.background.clone(),
                options: options.clone(),
            });
        }

        let state = if plan.invokes_tools() || reemitted.is_some() {
            DialogueState::Presenting
        } else {
            plan.state
        };
        let req = ReplyRequest {
            history: conversation
                .history()
                .tail(self.policy.history_tail)
                .to_vec(),
            message: message.to_string(),
            state,
            profile: plan.profile,
            missing: plan.missing,
            matched,
            research,
            reemitted,
        };

        match self
            .replies
            .generate(&req)
            .await
            .and_then(|d| d.validate_for(&req))
        {
            Ok(draft) => TurnResult {
                reply: draft.reply,
                options,
                research_context,
            },
            Err(e) => {
                tracing::error!(error = %e, "reply generation failed; returning apology");
                TurnResult::apology()
            }
        }
    }

    /// Respond and append the exchange to the conversation.
    pub async fn turn(&self, conversation: &mut Conversation, message: &str) -> TurnResult {
        let result = self.respond(conversation, message).await;
        conversation.record(message, &result);
        result
    }
}
