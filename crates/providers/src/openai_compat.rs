//! Chat-completions provider.
//!
//! Speaks the de-facto standard `/chat/completions` wire format, which is
//! enough to cover OpenAI, OpenRouter, Ollama, vLLM, and most proxies.
//! Only the one-shot completion path exists; the driver never streams.

use crate::http;
use async_trait::async_trait;
use recurse_core::error::ProviderError;
use recurse_core::message::{Message, Role};
use recurse_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Per-request budget; generous because long root turns are normal here.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// A provider for any chat-completions-compatible endpoint.
pub struct OpenAiCompatProvider {
    label: String,
    completions_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Point at an arbitrary chat-completions endpoint.
    ///
    /// `base_url` is the API root (e.g. `https://api.openai.com/v1`); the
    /// `/chat/completions` path is appended here once.
    pub fn new(
        label: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let base = base_url.into();
        Self {
            label: label.into(),
            completions_url: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key: api_key.into(),
            http: http::build_client(REQUEST_TIMEOUT),
        }
    }

    /// OpenRouter, the multi-model router.
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// OpenAI's own endpoint.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// A local Ollama daemon. Ollama ignores credentials, so a placeholder
    /// key is sent.
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "unused",
        )
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let payload = ChatPayload {
            model: &request.model,
            messages: wire_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };

        debug!(provider = %self.label, model = %request.model, "Requesting chat completion");

        let response = self
            .http
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(http::transport_error)?;
        let response = http::check_status(&self.label, response).await?;

        let reply: ChatReply = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("unparseable completion payload: {e}"),
        })?;

        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "completion carried no choices".into(),
            })?;

        Ok(ProviderResponse {
            message: Message::assistant(choice.message.content.unwrap_or_default()),
            usage: reply.usage.map(TokenCounts::into_usage),
            model: reply.model.unwrap_or(request.model),
            finish_reason: choice.finish_reason,
        })
    }
}

fn wire_messages(messages: &[Message]) -> Vec<WireMessage<'_>> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: role_tag(m.role),
            content: &m.content,
        })
        .collect()
}

fn role_tag(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::Assistant => "assistant",
        Role::User => "user",
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    /// Some self-hosted endpoints omit the echoed model name.
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenCounts>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenCounts {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl TokenCounts {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_path_is_appended_once() {
        let provider = OpenAiCompatProvider::new("vllm", "http://host:8000/v1/", "key");
        assert_eq!(
            provider.completions_url,
            "http://host:8000/v1/chat/completions"
        );
    }

    #[test]
    fn known_endpoints() {
        let provider = OpenAiCompatProvider::openrouter("sk-test");
        assert_eq!(provider.name(), "openrouter");
        assert!(provider.completions_url.starts_with("https://openrouter.ai"));

        let provider = OpenAiCompatProvider::ollama(None);
        assert_eq!(provider.name(), "ollama");
        assert!(provider.completions_url.contains("localhost:11434"));
    }

    #[test]
    fn payload_shape() {
        let messages = vec![Message::system("rules"), Message::user("question")];
        let payload = ChatPayload {
            model: "gpt-4o",
            messages: wire_messages(&messages),
            temperature: 0.2,
            max_tokens: None,
            stream: false,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "question");
        assert_eq!(json["stream"], false);
        // Unset caps stay off the wire entirely.
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn parse_reply_with_usage() {
        let reply: ChatReply = serde_json::from_str(
            r#"{
                "model": "gpt-4o",
                "choices": [{"message": {"role": "assistant", "content": "Hi!"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
            }"#,
        )
        .unwrap();

        assert_eq!(reply.model.as_deref(), Some("gpt-4o"));
        assert_eq!(reply.choices[0].message.content.as_deref(), Some("Hi!"));
        assert_eq!(reply.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(reply.usage.unwrap().into_usage().total_tokens, 15);
    }

    #[test]
    fn parse_reply_from_a_sparse_endpoint() {
        // No model echo, no usage, no finish reason.
        let reply: ChatReply = serde_json::from_str(
            r#"{"choices": [{"message": {"content": "ok"}}]}"#,
        )
        .unwrap();

        assert!(reply.model.is_none());
        assert!(reply.usage.is_none());
        assert!(reply.choices[0].finish_reason.is_none());
    }

    #[test]
    fn role_tags_cover_every_role() {
        assert_eq!(role_tag(Role::System), "system");
        assert_eq!(role_tag(Role::Assistant), "assistant");
        assert_eq!(role_tag(Role::User), "user");
    }
}
