//! LLM provider collaborator (spec.md §6): OpenAI-compatible chat
//! completions over HTTPS. The concrete transport is out of scope per
//! spec.md §1; this crate depends only on the `LlmProvider` trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::RemoteError;
use crate::models::{Message, MessageRole};

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, messages: &[Message], max_tokens: u32, temperature: f32) -> Result<String, RemoteError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    }
}

pub struct OpenAiCompatibleProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, messages: &[Message], max_tokens: u32, temperature: f32) -> Result<String, RemoteError> {
        let wire_messages: Vec<WireMessage> = messages
            .iter()
            .map(|m| WireMessage { role: role_str(m.role), content: &m.content })
            .collect();

        let request = ChatRequest {
            model: &self.model,
            messages: wire_messages,
            max_tokens,
            temperature,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RemoteError::Transient("llm".to_string(), e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(RemoteError::Transient("llm".to_string(), status.to_string()));
        }
        if !status.is_success() {
            return Err(RemoteError::Rejected("llm".to_string(), status.to_string()));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| RemoteError::Rejected("llm".to_string(), e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RemoteError::Rejected("llm".to_string(), "empty choices array".to_string()))
    }
}
