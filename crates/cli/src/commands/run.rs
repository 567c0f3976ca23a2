//! The `run` command — one full recursive completion over a context file.

use recurse_agent::{CompletionOptions, RecursiveLoop, TraceEvent};
use recurse_config::AppConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub async fn run(
    config_path: Option<&Path>,
    prompt: &str,
    context_path: Option<PathBuf>,
    schema_path: Option<PathBuf>,
    print_trace: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load(config_path)?;
    let provider = super::build_provider(&config)?;

    let context = match &context_path {
        Some(path) => load_context(path)?,
        None => serde_json::Value::Null,
    };

    let mut agent = RecursiveLoop::new(provider, &config.provider.model)
        .with_max_iterations(config.runtime.max_iterations)
        .with_temperature(config.provider.temperature)
        .with_exec_timeout(Duration::from_secs(config.runtime.exec_timeout_secs))
        .with_verbose(config.runtime.verbose);
    if let Some(max_tokens) = config.provider.max_tokens {
        agent = agent.with_max_tokens(max_tokens);
    }
    if let Some(sub_model) = &config.sub_query.model {
        agent = agent.with_sub_model(sub_model);
    }

    let mut options = CompletionOptions::new().with_context(context);
    if let Some(path) = &schema_path {
        options = options.with_context_schema(std::fs::read_to_string(path)?);
    }
    if config.runtime.verbose {
        options = options.with_on_event(Box::new(|event: &TraceEvent| match event {
            TraceEvent::IterationStart { iteration, .. } => {
                eprintln!("── iteration {iteration} ──");
            }
            TraceEvent::CodeExecutionEnd { output, error, .. } => {
                if let Some(error) = error {
                    eprintln!("execution error: {error}");
                } else {
                    eprintln!("{output}");
                }
            }
            _ => {}
        }));
    }

    let result = agent.completion(prompt, options).await?;

    println!("{}", result.answer.message);
    if let Some(data) = &result.answer.data {
        println!("\ndata: {}", serde_json::to_string_pretty(data)?);
    }

    info!(
        run_id = %result.run_id,
        iterations = result.iterations,
        root_calls = result.usage.root_calls,
        sub_calls = result.usage.sub_calls,
        total_tokens = result.usage.token_usage.total_tokens,
        elapsed_ms = result.usage.execution_time_ms,
        "Run complete"
    );

    if print_trace {
        println!("{}", serde_json::to_string_pretty(&result.trace)?);
    }

    Ok(())
}

/// Load a context file: `.json` files are parsed into structured values,
/// anything else is taken as plain text.
fn load_context(path: &Path) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    if path.extension().is_some_and(|ext| ext == "json") {
        Ok(serde_json::from_str(&text)?)
    } else {
        Ok(serde_json::Value::String(text))
    }
}
