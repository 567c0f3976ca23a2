//! CLI command implementations.

pub mod chat;
pub mod run;

use recurse_config::AppConfig;
use recurse_core::Provider;
use recurse_providers::{AnthropicProvider, OpenAiCompatProvider};
use std::sync::Arc;

/// Build the configured provider backend.
pub fn build_provider(config: &AppConfig) -> Result<Arc<dyn Provider>, Box<dyn std::error::Error>> {
    let settings = &config.provider;

    // Ollama runs without credentials; everything else needs a key.
    let api_key = || -> Result<String, Box<dyn std::error::Error>> {
        settings.api_key.clone().ok_or_else(|| {
            format!(
                "provider '{}' needs an API key (config [provider].api_key or RECURSE_API_KEY)",
                settings.name
            )
            .into()
        })
    };

    let provider: Arc<dyn Provider> = match settings.name.as_str() {
        "openrouter" => Arc::new(OpenAiCompatProvider::openrouter(api_key()?)),
        "openai" => Arc::new(OpenAiCompatProvider::openai(api_key()?)),
        "ollama" => Arc::new(OpenAiCompatProvider::ollama(settings.base_url.as_deref())),
        "anthropic" => {
            let mut provider = AnthropicProvider::new(api_key()?);
            if let Some(base_url) = &settings.base_url {
                provider = provider.with_base_url(base_url);
            }
            Arc::new(provider)
        }
        custom => {
            let base_url = settings.base_url.clone().ok_or_else(|| {
                format!("custom provider '{custom}' needs [provider].base_url")
            })?;
            Arc::new(OpenAiCompatProvider::new(custom, base_url, api_key()?))
        }
    };

    Ok(provider)
}
