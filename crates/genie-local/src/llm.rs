//! Backend selection and response parsing shared by the LLM-backed steps.

use crate::ollama::OllamaClient;
use crate::openai_compat::OpenAiCompatClient;
use genie_core::{Error, LanguageModel, Result};
use serde::de::DeserializeOwned;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    /// OpenAI-compatible if configured, then Ollama if enabled, else none.
    Auto,
    OpenAiCompat,
    Ollama,
    /// Deterministic steps only.
    None,
}

impl LlmBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::OpenAiCompat => "openai_compat",
            Self::Ollama => "ollama",
            Self::None => "none",
        }
    }
}

impl std::str::FromStr for LlmBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "openai_compat" | "openai-compat" | "openai" => Ok(Self::OpenAiCompat),
            "ollama" => Ok(Self::Ollama),
            "none" | "off" => Ok(Self::None),
            other => Err(Error::Config(format!("unknown llm backend: {other}"))),
        }
    }
}

/// Build the language model for `backend` from `GENIE_*` variables.
///
/// An explicitly requested backend must be configured; `Auto` silently falls back to
/// `None`.
pub fn language_model_from_env(
    client: reqwest::Client,
    backend: LlmBackend,
    model_override: Option<String>,
) -> Result<Option<Arc<dyn LanguageModel>>> {
    match backend {
        LlmBackend::None => Ok(None),
        LlmBackend::OpenAiCompat => Ok(Some(Arc::new(OpenAiCompatClient::from_env(
            client,
            model_override,
        )?))),
        LlmBackend::Ollama => Ok(Some(Arc::new(OllamaClient::from_env(
            client,
            model_override,
        )?))),
        LlmBackend::Auto => {
            match OpenAiCompatClient::from_env(client.clone(), model_override.clone()) {
                Ok(c) => return Ok(Some(Arc::new(c))),
                Err(e) => tracing::debug!(error = %e, "openai_compat backend unavailable"),
            }
            match OllamaClient::from_env(client, model_override) {
                Ok(c) => Ok(Some(Arc::new(c))),
                Err(e) => {
                    tracing::debug!(error = %e, "ollama backend unavailable");
                    Ok(None)
                }
            }
        }
    }
}

/// The JSON object in a model response, tolerating Markdown code fences and prose
/// around it.
pub fn json_block(raw: &str) -> Option<&str> {
    let t = raw.trim();
    let start = t.find('{')?;
    let end = t.rfind('}')?;
    (end > start).then(|| &t[start..=end])
}

pub fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let block = json_block(raw)
        .ok_or_else(|| Error::Llm("model response contained no JSON object".to_string()))?;
    serde_json::from_str(block).map_err(|e| Error::Llm(format!("bad JSON from model: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct R {
        reply: String,
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "Here you go:\n```json\n{\"reply\": \"Hello {there}\"}\n```";
        let r: R = parse_json_reply(raw).unwrap();
        assert_eq!(r.reply, "Hello {there}");
    }

    #[test]
    fn plain_text_is_not_json() {
        assert!(parse_json_reply::<R>("just words").is_err());
        assert!(parse_json_reply::<R>("{\"other\": 1}").is_err());
    }

    #[test]
    fn backend_names_round_trip() {
        for b in [
            LlmBackend::Auto,
            LlmBackend::OpenAiCompat,
            LlmBackend::Ollama,
            LlmBackend::None,
        ] {
            assert_eq!(b.as_str().parse::<LlmBackend>().unwrap(), b);
        }
        assert!("gpt".parse::<LlmBackend>().is_err());
    }
}
