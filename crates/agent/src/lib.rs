//! # Recurse Agent
//!
//! The recursive driver loop: a root LLM answers a question over an
//! arbitrarily large context by writing Rhai programs that run in a
//! sandbox with access to the context and to recursive sub-LLM queries.
//!
//! ```no_run
//! use recurse_agent::{CompletionOptions, RecursiveLoop};
//! use recurse_core::Provider;
//! use std::sync::Arc;
//!
//! # async fn demo(provider: Arc<dyn Provider>) -> recurse_core::Result<()> {
//! let agent = RecursiveLoop::new(provider, "gpt-4o");
//!
//! let result = agent
//!     .completion(
//!         "What is the password?",
//!         CompletionOptions::new().with_context("The password is X7Q2.".into()),
//!     )
//!     .await?;
//! println!("{}", result.answer.message);
//! # Ok(())
//! # }
//! ```

pub mod loop_runner;
pub mod parser;
pub mod prompt;
pub mod prompts;

pub use loop_runner::{CompletionOptions, RecursiveLoop, RlmResult};
pub use prompt::PromptBuilder;

// Re-exported so callers only need this crate for the common path.
pub use recurse_core::{FinalAnswer, Message, Role};
pub use recurse_telemetry::{RunUsage, TraceEntry, TraceEvent};
