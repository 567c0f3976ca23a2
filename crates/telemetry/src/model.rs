//! Data model for run usage and the returned trace ledger.

use recurse_core::Usage;
use serde::{Deserialize, Serialize};

/// Whether an LLM call was made by the driver or by a sandboxed program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallScope {
    /// One of the driver's own per-iteration completions.
    Root,
    /// An `llm_query` / `llm_query_batched` call from inside a program.
    Sub,
}

impl std::fmt::Display for CallScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Sub => write!(f, "sub"),
        }
    }
}

/// One entry in the trace ledger returned with the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEntry {
    /// A completed LLM call (root or sub).
    LlmCall {
        scope: CallScope,
        model: String,
        prompt_preview: String,
        response_preview: String,
        usage: Usage,
        duration_ms: u64,
    },

    /// A code block handed to the sandbox.
    ToolCall { code: String },

    /// The formatted execution report for one block.
    ToolResult {
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The final answer that ended the run.
    FinalAnswer { message: String },
}

/// Aggregated usage for one completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunUsage {
    /// Root calls + sub calls.
    pub total_calls: u32,

    /// Completions the driver performed itself.
    pub root_calls: u32,

    /// Sub-LLM calls made from inside sandboxed programs.
    pub sub_calls: u32,

    /// Token usage summed across root and sub calls.
    pub token_usage: Usage,

    /// Wall-clock duration of the whole completion.
    pub execution_time_ms: u64,
}

/// Accumulates per-call usage while a run is in flight.
#[derive(Debug, Default)]
pub struct UsageMeter {
    root_calls: u32,
    sub_calls: u32,
    tokens: Usage,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a driver-performed completion.
    pub fn record_root(&mut self, usage: &Usage) {
        self.root_calls += 1;
        self.tokens.accumulate(usage);
    }

    /// Record a sub-LLM call made inside a program.
    pub fn record_sub(&mut self, usage: &Usage) {
        self.sub_calls += 1;
        self.tokens.accumulate(usage);
    }

    /// Number of root calls recorded so far.
    pub fn root_calls(&self) -> u32 {
        self.root_calls
    }

    /// Close out the meter into the final usage summary.
    pub fn finish(self, execution_time_ms: u64) -> RunUsage {
        RunUsage {
            total_calls: self.root_calls + self.sub_calls,
            root_calls: self.root_calls,
            sub_calls: self.sub_calls,
            token_usage: self.tokens,
            execution_time_ms,
        }
    }
}

/// Truncate a string to at most `max_chars` characters, appending an
/// ellipsis when anything was cut.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_aggregates_root_and_sub() {
        let mut meter = UsageMeter::new();
        meter.record_root(&Usage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
        });
        meter.record_sub(&Usage {
            prompt_tokens: 20,
            completion_tokens: 10,
            total_tokens: 30,
        });
        meter.record_sub(&Usage {
            prompt_tokens: 5,
            completion_tokens: 5,
            total_tokens: 10,
        });

        let usage = meter.finish(1234);
        assert_eq!(usage.root_calls, 1);
        assert_eq!(usage.sub_calls, 2);
        assert_eq!(usage.total_calls, 3);
        assert_eq!(usage.token_usage.total_tokens, 190);
        assert_eq!(usage.execution_time_ms, 1234);
    }

    #[test]
    fn trace_entry_serializes_with_kind_tag() {
        let entry = TraceEntry::ToolCall {
            code: "print(context)".into(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":\"tool_call\""));

        let entry = TraceEntry::LlmCall {
            scope: CallScope::Sub,
            model: "gpt-4o-mini".into(),
            prompt_preview: "Summarise…".into(),
            response_preview: "Summary".into(),
            usage: Usage::default(),
            duration_ms: 12,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":\"llm_call\""));
        assert!(json.contains("\"scope\":\"sub\""));
    }

    #[test]
    fn truncate_chars_preserves_short_strings() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("exactly_ten", 11), "exactly_ten");
        assert_eq!(truncate_chars("0123456789", 4), "0123...");
    }
}
