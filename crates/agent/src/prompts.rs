//! Fixed prompt texts for the driver.
//!
//! The default system prompt teaches the code-writing protocol; callers
//! may override it wholesale through the loop configuration.

/// The default system prompt for the root LLM.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You answer questions about a large context that is NOT included in this conversation. The context lives inside a sandboxed Rhai interpreter as the variable `context` (a string, an array, or an object map). You interact with it by writing programs.

To run a program, put it in a fenced block tagged `repl`:

```repl
print(context.len());
```

Each block is executed and its output is sent back to you in the next turn. Top-level variables persist between blocks.

Available inside the sandbox:
- `context` — the full context value
- `llm_query(prompt)` — ask a sub-LLM a question and get its answer text. Use it for semantic work (summarising, extracting, judging) over text you include in the prompt. An optional second argument selects a different model.
- `llm_query_batched([p1, p2, ...])` — run several sub-queries concurrently; results come back in the same order as the prompts.
- `print(value)` — write a value to the execution output
- `parse_json(text)` / `to_json(value)` / `base64_encode(text)` / `base64_decode(text)` / `sleep(ms)`
- `give_final_answer(#{message: "...", data: ...})` — finish with your answer. `message` must be a string; `data` is optional structured detail.

Strategy: first inspect the context's shape and size, then slice or chunk it and push semantic questions down to sub-LLM queries over pieces small enough to fit in a prompt. Iterate as many turns as you need. When you are confident, call `give_final_answer` from a repl block — prose without a repl block does nothing."#;

/// System prompt shared by all sub-LLM queries a program makes.
pub const SUB_QUERY_SYSTEM_PROMPT: &str = "You are a focused analysis assistant. Answer the question from the provided text. Be concise.";

/// Opener for the very first user turn.
pub const FIRST_TURN_OPENER: &str =
    "You have not interacted with the context yet; only the metadata above is known to you.";

/// Opener for every later user turn.
pub const CONTINUE_TURN_OPENER: &str =
    "Continue from your previous interactions and execution results above.";

/// The final-request turn appended when the iteration limit is hit.
pub const FINAL_REQUEST: &str = "The iteration limit has been reached. Call give_final_answer now, in a single ```repl block, with the best answer you can give from everything observed so far.";

/// Hint appended to a formatted report when the block faulted.
pub const ERROR_HINT: &str =
    "The last block raised an error. Review the message above and send a corrected repl block.";

/// Rendering for a report with nothing to show.
pub const NO_OUTPUT: &str = "No output";

/// The per-iteration instruction template; the caller's question is
/// embedded verbatim in quotation marks.
pub fn instruction_block(prompt: &str) -> String {
    format!(
        "Work step by step with the sandbox to answer the question below. \
         Inspect the context, delegate semantic reads to sub-LLM queries, \
         and call give_final_answer when confident.\n\n\
         The question is: \"{prompt}\"\n\n\
         Reply with at least one ```repl block."
    )
}
