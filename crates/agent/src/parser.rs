//! Response parsing — pulls executable payloads out of the root LLM's text.
//!
//! The wire format is a fenced block tagged `repl`: an opening line of
//! three backticks followed immediately by `repl`, then the program, then a
//! closing line of three backticks. Anything between, before, and after
//! blocks is tolerated. Payload syntax is never validated here.

use regex_lite::Regex;

/// Extract the ordered list of `repl` code blocks from an assistant message.
///
/// Payloads are trimmed of surrounding whitespace; empty payloads are
/// discarded. An unterminated final fence yields no block.
pub fn extract_code_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        match &mut current {
            None if trimmed == "```repl" => current = Some(Vec::new()),
            Some(lines) if trimmed == "```" => {
                let payload = lines.join("\n").trim().to_string();
                if !payload.is_empty() {
                    blocks.push(payload);
                }
                current = None;
            }
            Some(lines) => lines.push(line),
            None => {}
        }
    }

    blocks
}

/// A legacy text-form final answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyFinal {
    /// `FINAL(...)` — the captured text is the answer
    Value(String),
    /// `FINAL_VAR(name)` — resolve `name` against the sandbox's locals
    Var(String),
}

/// Match the legacy `FINAL(...)` / `FINAL_VAR(...)` patterns, anchored at
/// the start of a line. Kept for backwards compatibility with older
/// prompt styles; the sandbox sentinel is the primary path.
pub fn parse_legacy_final(text: &str) -> Option<LegacyFinal> {
    let var_pattern = Regex::new(r"(?m)^FINAL_VAR\((.*)\)\s*$").expect("valid pattern");
    if let Some(captures) = var_pattern.captures(text) {
        let name = captures[1]
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .to_string();
        return Some(LegacyFinal::Var(name));
    }

    let value_pattern = Regex::new(r"(?m)^FINAL\((.*)\)\s*$").expect("valid pattern");
    if let Some(captures) = value_pattern.captures(text) {
        let value = captures[1]
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .to_string();
        return Some(LegacyFinal::Value(value));
    }

    None
}
