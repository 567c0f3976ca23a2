//! Execution reports — the sandbox's structured output for one program.

use recurse_core::Usage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the sandbox observed while running one code block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Captured `print` output
    pub stdout: String,

    /// Captured `debug` output and fault diagnostics
    pub stderr: String,

    /// Top-level variables visible after the run (injected bindings and
    /// underscore-prefixed names excluded; unserialisable values skipped)
    pub locals: BTreeMap<String, serde_json::Value>,

    /// Wall-clock duration of the run
    pub execution_time_ms: u64,

    /// Sub-LLM calls made during this run, in call-initiation order
    pub sub_calls: Vec<SubLlmCall>,

    /// Diagnostic for an unhandled fault; `None` on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionReport {
    /// Whether the program finished without an unhandled fault.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Record of one `llm_query` / `llm_query_batched` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubLlmCall {
    /// The prompt the program passed in
    pub prompt: String,

    /// The assistant text handed back (or the error string)
    pub response: String,

    /// Token usage reported by the backend (zero when unknown)
    pub usage: Usage,

    /// Wall-clock duration of the call
    pub duration_ms: u64,

    /// Model override, when the program asked for a specific model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
}
