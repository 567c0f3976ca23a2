//! Anthropic Messages API provider.
//!
//! The Messages API differs from the chat-completions shape in three ways
//! this module has to bridge: authentication goes through `x-api-key`
//! plus a pinned `anthropic-version` header, the system prompt is a
//! top-level field rather than a message, and an explicit output-token
//! cap is mandatory on every request.

use crate::http;
use async_trait::async_trait;
use recurse_core::error::ProviderError;
use recurse_core::message::{Message, Role};
use recurse_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const API_VERSION: &str = "2023-06-01";
const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";

/// Applied when the caller sets no cap; the API refuses requests without one.
const FALLBACK_MAX_TOKENS: u32 = 4096;

/// Per-request budget; thinking-heavy models can be slow.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Provider for Anthropic's native Messages API.
pub struct AnthropicProvider {
    endpoint: String,
    api_key: String,
    http: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a provider against the public Anthropic endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            api_key: api_key.into(),
            http: http::build_client(REQUEST_TIMEOUT),
        }
    }

    /// Target a proxy or test double instead of the public endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.endpoint = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let (system, turns) = split_conversation(&request.messages);
        let payload = MessagesPayload {
            model: &request.model,
            messages: turns,
            max_tokens: request.max_tokens.unwrap_or(FALLBACK_MAX_TOKENS),
            temperature: request.temperature,
            system,
        };

        debug!(model = %request.model, "Requesting message completion");

        let response = self
            .http
            .post(format!("{}/v1/messages", self.endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(http::transport_error)?;
        let response = http::check_status("anthropic", response).await?;

        let reply: MessagesReply =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("unparseable messages payload: {e}"),
            })?;

        let mut text = String::new();
        for block in reply.content {
            if let ReplyBlock::Text { text: piece } = block {
                text.push_str(&piece);
            }
        }

        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: reply.usage.map(|u| Usage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            }),
            model: reply.model.unwrap_or(request.model),
            finish_reason: reply.stop_reason,
        })
    }
}

/// Separate the system prompt from the turn list in one pass.
///
/// Multiple system messages are merged with blank lines between them;
/// everything else keeps its order with the API's two-role vocabulary.
fn split_conversation(messages: &[Message]) -> (Option<String>, Vec<TurnMessage<'_>>) {
    let mut system_text: Option<String> = None;
    let mut turns = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            Role::System => match &mut system_text {
                Some(text) => {
                    text.push_str("\n\n");
                    text.push_str(&message.content);
                }
                None => system_text = Some(message.content.clone()),
            },
            Role::Assistant => turns.push(TurnMessage {
                role: "assistant",
                content: &message.content,
            }),
            Role::User => turns.push(TurnMessage {
                role: "user",
                content: &message.content,
            }),
        }
    }

    (system_text, turns)
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct MessagesPayload<'a> {
    model: &'a str,
    messages: Vec<TurnMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct TurnMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    #[serde(default)]
    model: Option<String>,
    content: Vec<ReplyBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<ReplyUsage>,
}

/// Only text blocks carry the answer; thinking and tool blocks are
/// skipped rather than rejected.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ReplyBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ReplyUsage {
    input_tokens: u32,
    output_tokens: u32,
}
