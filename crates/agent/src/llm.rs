use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use marketbot_core::config::LlmConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// One model invocation: the system turn plus the replayed history plus the
/// new inbound turn, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub temperature: f32,
    pub turns: Vec<ChatTurn>,
}

/// Failures here are absorbed by the dispatcher's retry/fallback policy,
/// so the error type stays opaque.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<String>;
}

/// OpenAI-compatible `chat/completions` client. The JSON-object response
/// format is requested on every call; the timeout bounds the whole
/// request.
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("building llm http client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.api_key.as_ref().map(|key| key.expose_secret().to_string()),
        })
    }
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    temperature: f32,
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let body = CompletionBody {
            model: &request.model,
            messages: &request.turns,
            temperature: request.temperature,
            stream: false,
            response_format: ResponseFormat { format_type: "json_object" },
        };

        let mut http_request =
            self.http.post(format!("{}/chat/completions", self.base_url)).json(&body);
        if let Some(token) = &self.bearer_token {
            http_request = http_request.bearer_auth(token);
        }

        let http_response = http_request.send().await.context("llm request failed")?;
        let status = http_response.status();
        if !status.is_success() {
            let detail = http_response.text().await.unwrap_or_default();
            return Err(anyhow!("llm endpoint returned {status}: {detail}"));
        }

        let completion: CompletionResponse =
            http_response.json().await.context("decoding llm response")?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("llm response contained no choices"))?;

        Ok(choice.message.content)
    }
}
