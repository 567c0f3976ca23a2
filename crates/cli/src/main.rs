//! Recurse CLI — the main entry point.
//!
//! Commands:
//! - `run`  — Answer a question over a context file with the recursive loop
//! - `chat` — One-shot passthrough to the configured provider

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "recurse",
    about = "Recurse — recursive language model driver",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question over a context file
    Run {
        /// The question to answer
        prompt: String,

        /// Path to the context (JSON files are parsed; anything else is
        /// loaded as plain text)
        #[arg(long)]
        context: Option<PathBuf>,

        /// Path to a pre-rendered schema description appended to the
        /// metadata turn
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Print the trace ledger as JSON to stdout when done
        #[arg(long)]
        trace: bool,
    },

    /// Send a single message, bypassing the loop
    Chat {
        /// The message to send
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            prompt,
            context,
            schema,
            trace,
        } => commands::run::run(cli.config.as_deref(), &prompt, context, schema, trace).await?,
        Commands::Chat { message } => commands::chat::run(cli.config.as_deref(), &message).await?,
    }

    Ok(())
}
