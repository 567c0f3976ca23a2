//! The `chat` command — one-shot provider passthrough, no loop.

use recurse_agent::RecursiveLoop;
use recurse_config::AppConfig;
use recurse_core::Message;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load(config_path)?;
    let provider = super::build_provider(&config)?;

    let agent = RecursiveLoop::new(provider, &config.provider.model)
        .with_temperature(config.provider.temperature);

    let reply = agent.chat(vec![Message::user(message)]).await?;
    println!("{reply}");
    Ok(())
}
