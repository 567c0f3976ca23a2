//! LLM provider backends for the Recurse RLM driver.
//!
//! Implementations of the [`recurse_core::Provider`] trait:
//! - [`OpenAiCompatProvider`] — any `/v1/chat/completions` endpoint
//!   (OpenAI, OpenRouter, Ollama, vLLM, proxies)
//! - [`AnthropicProvider`] — Anthropic's native Messages API

pub mod anthropic;
mod http;
pub mod openai_compat;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
