use crate::llm::parse_json_reply;
use genie_core::orchestrator::MatchRequest;
use genie_core::{Error, LanguageModel, OptionAdvisor, Result, VisaOption};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const ADVICE_SYSTEM: &str = r#"You are Japa Genie, a seasoned visa coach: empathetic, insightful and practical. You always operate ethically and legally, but you point out clever, legitimate strategies within visa programmes.

You receive the user's budget (USD), their background, and the visa options that already match them. For EVERY option, write a coach-like "reason":
- why it fits this user's profile, mentioning its success rate as a key factor;
- a practical tip or strategy (faster processing routes, which experience is valued most);
- benefits such as pathways to permanent residency or family flexibility;
- pitfalls to watch for, gently.

Keep the options exactly as given: same names, same order, none added or removed. Do not change costs, requirements or rates.

Respond with a JSON object only: {"options": [{"name": "<option name>", "reason": "<reason>"}]}"#;

#[derive(Serialize)]
struct AdviceInput<'a> {
    budget: f64,
    background: &'a str,
    options: &'a [VisaOption],
}

#[derive(Deserialize)]
struct AdviceReply {
    options: Vec<NamedReason>,
}

#[derive(Deserialize)]
struct NamedReason {
    name: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Coaching reasons written by a language model. The model only supplies names and
/// reasons; option facts are copied from the input. Unknown names are an error, and the
/// orchestrator rejects sets that do not line up with the matched options.
pub struct LlmOptionAdvisor {
    llm: Arc<dyn LanguageModel>,
}

impl LlmOptionAdvisor {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl OptionAdvisor for LlmOptionAdvisor {
    async fn advise(&self, request: &MatchRequest, options: &[VisaOption]) -> Result<Vec<VisaOption>> {
        let input = AdviceInput {
            budget: request.budget,
            background: &request.background,
            options,
        };
        let user = serde_json::to_string_pretty(&input)
            .map_err(|e| Error::Llm(format!("advice encoding failed: {e}")))?;
        let raw = self.llm.complete(ADVICE_SYSTEM, &user).await?;
        let reply: AdviceReply = parse_json_reply(&raw)?;
        tracing::debug!(backend = self.llm.name(), advised = reply.options.len(), "option advice drafted");
        reply
            .options
            .into_iter()
            .map(|n| {
                let base = options.iter().find(|o| o.name == n.name).ok_or_else(|| {
                    Error::Llm(format!("advice names an unknown option: {}", n.name))
                })?;
                Ok(VisaOption {
                    reason: n.reason,
                    ..base.clone()
                })
            })
            .collect()
    }
}
