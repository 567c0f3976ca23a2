//! Prompt assembly — the message history the root LLM sees.
//!
//! The history always starts with the system prompt and a single
//! assistant-role metadata turn describing the context's shape. After
//! that, each iteration appends a driver-generated user turn, the LLM's
//! verbatim response, and one user message per executed block carrying the
//! code and its formatted execution report.

use crate::prompts;
use recurse_core::{ContextDescriptor, Message};
use recurse_sandbox::ExecutionReport;

/// How many chunk lengths the metadata turn lists before truncating.
const MAX_LISTED_CHUNKS: usize = 100;

/// Character budget for one formatted execution report.
pub const REPORT_CHAR_BUDGET: usize = 20_000;

/// Builds and owns the message history for one completion.
pub struct PromptBuilder {
    history: Vec<Message>,
    prompt: String,
}

impl PromptBuilder {
    /// Assemble the initial history: system prompt + metadata turn.
    pub fn new(
        system_prompt: &str,
        descriptor: &ContextDescriptor,
        schema: Option<&str>,
        prompt: impl Into<String>,
    ) -> Self {
        let history = vec![
            Message::system(system_prompt),
            Message::assistant(metadata_message(descriptor, schema)),
        ];
        Self {
            history,
            prompt: prompt.into(),
        }
    }

    /// The full history, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.history
    }

    /// Content of the most recent message (used for event previews).
    pub fn last_content(&self) -> &str {
        self.history
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// Append the user turn for iteration `i` (0-based).
    pub fn push_user_turn(&mut self, iteration: u32) {
        let opener = if iteration == 0 {
            prompts::FIRST_TURN_OPENER
        } else {
            prompts::CONTINUE_TURN_OPENER
        };
        let content = format!("{opener}\n\n{}", prompts::instruction_block(&self.prompt));
        self.history.push(Message::user(content));
    }

    /// Append the LLM's verbatim response.
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.history.push(Message::assistant(content));
    }

    /// Append the record of one executed block: the code rewrapped in a
    /// fence, plus its formatted report.
    pub fn push_execution(&mut self, code: &str, report: &ExecutionReport) {
        let content = format!(
            "```repl\n{code}\n```\n\nOutput:\n{}",
            format_report(report)
        );
        self.history.push(Message::user(content));
    }

    /// Append the final-request turn used when the iteration limit is hit.
    pub fn push_final_request(&mut self) {
        self.history.push(Message::user(prompts::FINAL_REQUEST));
    }
}

/// Render the metadata turn: context kind, rendered length, chunk lengths
/// (truncated past 100 entries), and the optional schema description.
fn metadata_message(descriptor: &ContextDescriptor, schema: Option<&str>) -> String {
    let listed = descriptor
        .chunk_lens
        .iter()
        .take(MAX_LISTED_CHUNKS)
        .map(|len| len.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let suffix = if descriptor.chunk_lens.len() > MAX_LISTED_CHUNKS {
        format!(" (+ {} more)", descriptor.chunk_lens.len() - MAX_LISTED_CHUNKS)
    } else {
        String::new()
    };

    let mut out = format!(
        "Context loaded into the sandbox as `context`.\n\
         Type: {}\n\
         Total length: {} characters\n\
         Chunk lengths: [{listed}]{suffix}",
        descriptor.kind, descriptor.total_chars
    );

    if let Some(schema) = schema {
        out.push_str("\n\nContext schema:\n");
        out.push_str(schema);
    }

    out
}

/// Format an execution report for the next user turn, within the default
/// character budget.
pub fn format_report(report: &ExecutionReport) -> String {
    format_report_with_budget(report, REPORT_CHAR_BUDGET)
}

/// Format an execution report: stdout, stderr, the non-underscore local
/// names, and a correction hint on error. Empty reports render as
/// `No output`; oversized renderings are truncated with an elision tail.
pub fn format_report_with_budget(report: &ExecutionReport, budget: usize) -> String {
    let mut out = String::new();

    if !report.stdout.is_empty() {
        out.push_str(&report.stdout);
    }
    if !report.stderr.is_empty() {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&report.stderr);
    }

    let names: Vec<&str> = report
        .locals
        .keys()
        .filter(|name| !name.starts_with('_'))
        .map(String::as_str)
        .collect();
    if !names.is_empty() {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("REPL variables: [{}]\n", names.join(", ")));
    }

    if report.error.is_some() {
        out.push_str(prompts::ERROR_HINT);
    }

    let out = out.trim_end().to_string();
    if out.is_empty() {
        return prompts::NO_OUTPUT.to_string();
    }

    let total_chars = out.chars().count();
    if total_chars > budget {
        let kept: String = out.chars().take(budget).collect();
        let elided = total_chars - budget;
        return format!("{kept}\n... [{elided} characters elided]");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use recurse_core::{ContextKind, Role};
    use std::collections::BTreeMap;

    fn descriptor() -> ContextDescriptor {
        ContextDescriptor {
            kind: ContextKind::String,
            total_chars: 21,
            chunk_lens: vec![21],
        }
    }

    fn empty_report() -> ExecutionReport {
        ExecutionReport {
            stdout: String::new(),
            stderr: String::new(),
            locals: BTreeMap::new(),
            execution_time_ms: 1,
            sub_calls: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn initial_history_is_system_then_metadata() {
        let builder = PromptBuilder::new("protocol", &descriptor(), None, "question");
        let messages = builder.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].content.contains("Type: string"));
        assert!(messages[1].content.contains("21 characters"));
    }

    #[test]
    fn metadata_truncates_long_chunk_lists() {
        let descriptor = ContextDescriptor {
            kind: ContextKind::Array,
            total_chars: 1000,
            chunk_lens: vec![10; 150],
        };
        let text = metadata_message(&descriptor, None);
        assert!(text.contains("(+ 50 more)"));
        // only the first 100 entries are listed
        let listed = text
            .split('[')
            .nth(1)
            .and_then(|rest| rest.split(']').next())
            .unwrap();
        assert_eq!(listed.split(", ").count(), 100);
    }

    #[test]
    fn metadata_appends_schema_description() {
        let text = metadata_message(&descriptor(), Some("quarters: array of {q, revenue}"));
        assert!(text.contains("Context schema:"));
        assert!(text.contains("quarters: array"));
    }

    #[test]
    fn first_and_later_turns_differ_in_opener() {
        let mut builder = PromptBuilder::new("s", &descriptor(), None, "the question");
        builder.push_user_turn(0);
        assert!(builder.last_content().contains("not interacted"));
        assert!(builder.last_content().contains("\"the question\""));

        builder.push_user_turn(1);
        assert!(builder.last_content().contains("Continue from"));
        assert!(builder.last_content().contains("\"the question\""));
    }

    #[test]
    fn empty_report_renders_no_output() {
        assert_eq!(format_report(&empty_report()), "No output");
    }

    #[test]
    fn report_lists_non_underscore_locals() {
        let mut report = empty_report();
        report.stdout = "42\n".into();
        report.locals.insert("total".into(), serde_json::json!(42));
        report.locals.insert("_tmp".into(), serde_json::json!(1));

        let text = format_report(&report);
        assert!(text.contains("42"));
        assert!(text.contains("REPL variables: [total]"));
        assert!(!text.contains("_tmp"));
    }

    #[test]
    fn report_error_appends_hint() {
        let mut report = empty_report();
        report.stderr = "Error: boom\n".into();
        report.error = Some("boom".into());

        let text = format_report(&report);
        assert!(text.contains("Error: boom"));
        assert!(text.contains("corrected repl block"));
    }

    #[test]
    fn oversized_report_is_truncated_with_tail() {
        let mut report = empty_report();
        report.stdout = "x".repeat(50);

        let text = format_report_with_budget(&report, 10);
        assert!(text.starts_with("xxxxxxxxxx\n"));
        assert!(text.contains("[40 characters elided]"));
    }

    #[test]
    fn execution_entry_rewraps_the_code() {
        let mut builder = PromptBuilder::new("s", &descriptor(), None, "q");
        let mut report = empty_report();
        report.stdout = "ok\n".into();
        builder.push_execution("print(\"ok\");", &report);

        let content = builder.last_content();
        assert!(content.starts_with("```repl\nprint(\"ok\");\n```"));
        assert!(content.contains("Output:\nok"));
    }
}
