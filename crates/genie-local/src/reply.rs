use crate::llm::parse_json_reply;
use genie_core::{Error, LanguageModel, ReplyDraft, ReplyGenerator, ReplyRequest, Result};
use std::sync::Arc;

const COACH_SYSTEM: &str = r#"You are Japa Genie, an experienced and empathetic visa coach. Be practical and specific, and end each reply by inviting the user to continue.

You receive a JSON description of the current turn: the recent conversation, the user's message, the dialogue state, what is known about the user (profile) and which profile fields are still missing, plus the results of any tools that ran this turn.

Rules:
- state "discovery": greet new users warmly and ask for the missing fields (name, budget in USD, education and work background, destination country).
- "matched" present with options: briefly say that you found options and that their details are shown in the panel. Do not list the option names or their fields in the reply. If there are no options, say so and suggest adjusting the budget or sharing more background.
- "research" present: if "surfaced" is true, weave the findings of research.tool_output.analysisSummary into the reply. If false, explain that the research could not get reliable results and suggest checking official sources. Never invent statistics.
- "reemitted" present: the user is following up on results shown earlier; answer using those options or research findings.
- Otherwise answer the question conversationally.

Respond with a JSON object only: {"reply": "<your reply>"}"#;

/// Reply generation by a language model. Anything other than a JSON object with a
/// non-empty `reply` is an invalid draft.
pub struct LlmReplyGenerator {
    llm: Arc<dyn LanguageModel>,
}

impl LlmReplyGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl ReplyGenerator for LlmReplyGenerator {
    async fn generate(&self, req: &ReplyRequest) -> Result<ReplyDraft> {
        let turn = serde_json::to_string_pretty(req)
            .map_err(|e| Error::InvalidReply(format!("turn encoding failed: {e}")))?;
        let raw = self.llm.complete(COACH_SYSTEM, &turn).await?;
        let draft: ReplyDraft = parse_json_reply(&raw)
            .map_err(|e| Error::InvalidReply(e.to_string()))?;
        tracing::debug!(backend = self.llm.name(), chars = draft.reply.len(), "reply drafted");
        draft.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genie_core::signals::Profile;
    use genie_core::{DialogueState, Turn};
    use std::sync::Mutex;

    struct Canned {
        out: Result<String>,
        seen: Mutex<Option<String>>,
    }

    #[async_trait::async_trait]
    impl LanguageModel for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn complete(&self, _system: &str, user: &str) -> Result<String> {
            *self.seen.lock().unwrap() = Some(user.to_string());
            match &self.out {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(Error::Llm(e.to_string())),
            }
        }
    }

    fn generator(out: Result<String>) -> (LlmReplyGenerator, Arc<Canned>) {
        let llm = Arc::new(Canned {
            out,
            seen: Mutex::new(None),
        });
        (LlmReplyGenerator::new(llm.clone()), llm)
    }

    fn request() -> ReplyRequest {
        ReplyRequest {
            history: vec![Turn::user("Hi"), Turn::agent("Welcome!")],
            message: "My budget is $900".to_string(),
            state: DialogueState::Discovery,
            profile: Profile {
                budget: Some(900.0),
                ..Profile::default()
            },
            missing: Profile::default().missing(),
            matched: None,
            research: None,
            reemitted: None,
        }
    }

    #[tokio::test]
    async fn parses_fenced_reply_and_sends_turn_json() {
        let (g, llm) = generator(Ok("```json\n{\"reply\": \"  Thanks! What is your background?  \"}\n```".to_string()));
        let d = g.generate(&request()).await.unwrap();
        assert_eq!(d.reply, "Thanks! What is your background?");
        let seen = llm.seen.lock().unwrap().clone().unwrap();
        let v: serde_json::Value = serde_json::from_str(&seen).unwrap();
        assert_eq!(v["state"], "discovery");
        assert_eq!(v["message"], "My budget is $900");
    }

    #[tokio::test]
    async fn malformed_or_empty_replies_are_invalid() {
        for out in ["I am not JSON", "{\"reply\": \"   \"}", "{\"text\": \"hi\"}"] {
            let (g, _) = generator(Ok(out.to_string()));
            assert!(matches!(
                g.generate(&request()).await,
                Err(Error::InvalidReply(_))
            ));
        }
        let (g, _) = generator(Err(Error::Llm("down".to_string())));
        assert!(matches!(g.generate(&request()).await, Err(Error::Llm(_))));
    }
}
