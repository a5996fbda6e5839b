use crate::{env, env_bool};
use genie_core::{Error, LanguageModel, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_MODEL: &str = "qwen2.5:3b-instruct";
const DEFAULT_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout_ms: u64,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn from_env(client: reqwest::Client, model_override: Option<String>) -> Result<Self> {
        // Opt-in: never start calling localhost unasked.
        if !env_bool("GENIE_OLLAMA_ENABLE") {
            return Err(Error::NotConfigured(
                "GENIE_OLLAMA_ENABLE is not set (or false)".to_string(),
            ));
        }
        let base_url = env("GENIE_OLLAMA_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = model_override
            .or_else(|| env("GENIE_OLLAMA_MODEL"))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let mut c = Self::new(client, base_url, model);
        if let Some(ms) = crate::env_u64("GENIE_LLM_TIMEOUT_MS") {
            c.timeout_ms = ms;
        }
        Ok(c)
    }

    fn endpoint_chat(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            stream: Some(false),
        };

        let resp = self
            .client
            .post(self.endpoint_chat())
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!("ollama chat HTTP {status}")));
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        Ok(parsed.message.content)
    }
}

#[async_trait::async_trait]
impl LanguageModel for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.chat(system, user).await
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};

    #[tokio::test]
    async fn posts_to_api_chat_without_streaming() {
        let app = Router::new().route(
            "/api/chat",
            post(|Json(body): Json<serde_json::Value>| async move {
                let echo = format!(
                    "{}:{}",
                    body["model"].as_str().unwrap_or(""),
                    body["stream"].as_bool().unwrap_or(true)
                );
                Json(serde_json::json!({
                    "message": {"role": "assistant", "content": echo}
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let c = OllamaClient::new(reqwest::Client::new(), format!("http://{addr}"), "tiny");
        assert_eq!(c.name(), "ollama");
        assert_eq!(c.complete("s", "u").await.unwrap(), "tiny:false");
    }
}
