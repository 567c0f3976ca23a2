//! The recursive driver loop.
//!
//! One [`RecursiveLoop::completion`] call runs the full state machine:
//! build the next user turn, ask the root LLM for a response, extract its
//! `repl` blocks, execute them in the sandbox, feed the reports back, and
//! stop as soon as a program sets the final answer. If the iteration limit
//! is reached first, one extra "final request" turn is made and the raw
//! response text becomes the fallback answer.

use crate::parser::{self, LegacyFinal};
use crate::prompt::{self, PromptBuilder};
use crate::prompts;
use chrono::Utc;
use recurse_core::{
    ContextDescriptor, Error, FinalAnswer, Message, Provider, ProviderRequest, Result,
};
use recurse_sandbox::{ExecutionReport, Sandbox, SandboxConfig, DEFAULT_EXEC_TIMEOUT};
use recurse_telemetry::{
    truncate_chars, CallScope, EventHandler, EventSink, RunUsage, TraceEntry, TraceEvent,
    UsageMeter,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Preview length for prompts/responses in events and trace entries.
const PREVIEW_CHARS: usize = 500;

/// Options for one completion call.
#[derive(Default)]
pub struct CompletionOptions {
    /// The context value bound inside the sandbox (never shown to the
    /// root LLM directly)
    pub context: serde_json::Value,

    /// Pre-rendered schema description appended to the metadata turn
    pub context_schema: Option<String>,

    /// Observer invoked synchronously for every trace event
    pub on_event: Option<EventHandler>,
}

impl CompletionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the context value.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Attach a pre-rendered schema description.
    pub fn with_context_schema(mut self, schema: impl Into<String>) -> Self {
        self.context_schema = Some(schema.into());
        self
    }

    /// Attach an event observer.
    pub fn with_on_event(mut self, handler: EventHandler) -> Self {
        self.on_event = Some(handler);
        self
    }
}

/// The public result of one completion.
#[derive(Debug, Clone)]
pub struct RlmResult {
    /// Unique id for this completion, for correlating logs and traces
    pub run_id: String,

    /// The final answer (or the raw-text fallback)
    pub answer: FinalAnswer,

    /// Aggregated call counts, token usage, and wall time
    pub usage: RunUsage,

    /// Iterations performed, including the final-request turn if any
    pub iterations: u32,

    /// The trace ledger: every LLM call, executed block, and report
    pub trace: Vec<TraceEntry>,
}

/// The driver that orchestrates root LLM calls and sandbox execution.
pub struct RecursiveLoop {
    /// The LLM backend (shared with the sandbox for sub-queries)
    provider: Arc<dyn Provider>,

    /// Model for root calls
    model: String,

    /// Temperature for root and sub calls
    temperature: f32,

    /// Token cap per root response
    max_tokens: Option<u32>,

    /// Maximum loop iterations before the final-request turn
    max_iterations: u32,

    /// Wholesale system-prompt override
    system_prompt: Option<String>,

    /// Model for sub-queries (defaults to the root model)
    sub_model: Option<String>,

    /// Wall-clock budget per sandbox execution
    exec_timeout: Duration,

    /// Extra progress logging
    verbose: bool,
}

impl RecursiveLoop {
    /// Create a driver with default settings.
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            max_iterations: 30,
            system_prompt: None,
            sub_model: None,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            verbose: false,
        }
    }

    /// Set the maximum number of loop iterations.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Cap tokens per root response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Replace the default system prompt wholesale.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Use a different (typically cheaper) model for sub-queries.
    pub fn with_sub_model(mut self, model: impl Into<String>) -> Self {
        self.sub_model = Some(model.into());
        self
    }

    /// Set the per-execution wall-clock budget.
    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    /// Enable extra progress logging.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Run the recursive loop to answer `prompt` over the given context.
    pub async fn completion(&self, prompt: &str, options: CompletionOptions) -> Result<RlmResult> {
        let run_id = Uuid::new_v4().to_string();
        let run_started = Instant::now();
        let sink = EventSink::new(options.on_event);
        let mut meter = UsageMeter::new();
        let mut trace: Vec<TraceEntry> = Vec::new();

        let sub_model = self.sub_model.clone().unwrap_or_else(|| self.model.clone());
        let sandbox_config = SandboxConfig::new(&sub_model)
            .with_system_prompt(prompts::SUB_QUERY_SYSTEM_PROMPT)
            .with_temperature(self.temperature)
            .with_exec_timeout(self.exec_timeout);
        let sandbox = Sandbox::spawn(self.provider.clone(), sandbox_config)?;
        sandbox.load_context(options.context.clone()).await?;

        let descriptor = ContextDescriptor::describe(&options.context);
        info!(
            run_id = %run_id,
            kind = %descriptor.kind,
            chars = descriptor.total_chars,
            chunks = descriptor.chunk_lens.len(),
            "Context loaded"
        );

        let system_prompt = self
            .system_prompt
            .as_deref()
            .unwrap_or(prompts::DEFAULT_SYSTEM_PROMPT);
        let mut builder = PromptBuilder::new(
            system_prompt,
            &descriptor,
            options.context_schema.as_deref(),
            prompt,
        );

        for i in 0..self.max_iterations {
            let iteration = i + 1;
            sink.emit(&TraceEvent::IterationStart {
                timestamp: Utc::now(),
                iteration,
            });
            debug!(iteration, "Loop iteration");

            builder.push_user_turn(i);
            let response = self
                .root_call(&builder, iteration, &sink, &mut meter, &mut trace)
                .await?;

            let blocks = parser::extract_code_blocks(&response);
            if blocks.is_empty() {
                debug!(iteration, "Response contained no repl blocks");
            }

            let mut executed: Vec<(String, ExecutionReport)> = Vec::new();
            for block in blocks {
                let report = self
                    .run_block(&sandbox, &block, iteration, &sub_model, &sink, &mut meter, &mut trace)
                    .await?;
                executed.push((block, report));

                // First final answer wins; later blocks in this response
                // are skipped.
                if let Some(answer) = sandbox.final_answer() {
                    return Ok(
                        self.finish(run_id, answer, iteration, meter, trace, &sink, run_started)
                    );
                }
            }

            if let Some(answer) = self.legacy_final(&response, &sandbox) {
                return Ok(self.finish(run_id, answer, iteration, meter, trace, &sink, run_started));
            }

            builder.push_assistant(&response);
            for (code, report) in &executed {
                builder.push_execution(code, report);
            }
        }

        // Iteration limit hit: one extra final-request turn.
        warn!(
            max_iterations = self.max_iterations,
            "Iteration limit reached without a final answer"
        );
        let iteration = self.max_iterations + 1;
        builder.push_final_request();
        let response = self
            .root_call(&builder, iteration, &sink, &mut meter, &mut trace)
            .await?;

        for block in parser::extract_code_blocks(&response) {
            self.run_block(&sandbox, &block, iteration, &sub_model, &sink, &mut meter, &mut trace)
                .await?;
            if sandbox.final_answer().is_some() {
                break;
            }
        }

        let answer = sandbox
            .final_answer()
            .or_else(|| self.legacy_final(&response, &sandbox))
            .unwrap_or_else(|| FinalAnswer::text(response.clone()));

        Ok(self.finish(run_id, answer, iteration, meter, trace, &sink, run_started))
    }

    /// One-shot passthrough to the provider, bypassing the loop.
    pub async fn chat(&self, messages: Vec<Message>) -> Result<String> {
        let mut request = ProviderRequest::new(&self.model, messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        let response = self.provider.complete(request).await.map_err(Error::from)?;
        Ok(response.message.content)
    }

    /// Perform one root LLM call and account for it.
    async fn root_call(
        &self,
        builder: &PromptBuilder,
        iteration: u32,
        sink: &EventSink,
        meter: &mut UsageMeter,
        trace: &mut Vec<TraceEntry>,
    ) -> Result<String> {
        let prompt_preview = truncate_chars(builder.last_content(), PREVIEW_CHARS);
        sink.emit(&TraceEvent::LlmQueryStart {
            timestamp: Utc::now(),
            iteration,
            prompt: prompt_preview.clone(),
        });

        let mut request = ProviderRequest::new(&self.model, builder.messages().to_vec());
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;

        let started = Instant::now();
        match self.provider.complete(request).await {
            Ok(response) => {
                let usage = response.usage.unwrap_or_default();
                meter.record_root(&usage);
                let text = response.message.content;

                trace.push(TraceEntry::LlmCall {
                    scope: CallScope::Root,
                    model: response.model,
                    prompt_preview,
                    response_preview: truncate_chars(&text, PREVIEW_CHARS),
                    usage,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                sink.emit(&TraceEvent::LlmQueryEnd {
                    timestamp: Utc::now(),
                    iteration,
                    response: truncate_chars(&text, PREVIEW_CHARS),
                    error: None,
                });
                if self.verbose {
                    info!(iteration, chars = text.len(), "Root response received");
                }
                Ok(text)
            }
            Err(err) => {
                sink.emit(&TraceEvent::LlmQueryEnd {
                    timestamp: Utc::now(),
                    iteration,
                    response: String::new(),
                    error: Some(err.to_string()),
                });
                warn!(iteration, error = %err, "Root LLM call failed");
                Err(err.into())
            }
        }
    }

    /// Execute one block and account for its sub-calls.
    #[allow(clippy::too_many_arguments)]
    async fn run_block(
        &self,
        sandbox: &Sandbox,
        code: &str,
        iteration: u32,
        sub_model: &str,
        sink: &EventSink,
        meter: &mut UsageMeter,
        trace: &mut Vec<TraceEntry>,
    ) -> Result<ExecutionReport> {
        sink.emit(&TraceEvent::CodeExecutionStart {
            timestamp: Utc::now(),
            iteration,
            code: code.to_string(),
        });

        let report = sandbox.execute(code).await?;

        for call in &report.sub_calls {
            meter.record_sub(&call.usage);
            trace.push(TraceEntry::LlmCall {
                scope: CallScope::Sub,
                model: call
                    .model_override
                    .clone()
                    .unwrap_or_else(|| sub_model.to_string()),
                prompt_preview: truncate_chars(&call.prompt, PREVIEW_CHARS),
                response_preview: truncate_chars(&call.response, PREVIEW_CHARS),
                usage: call.usage,
                duration_ms: call.duration_ms,
            });
        }

        let formatted = prompt::format_report(&report);
        trace.push(TraceEntry::ToolCall {
            code: code.to_string(),
        });
        trace.push(TraceEntry::ToolResult {
            output: formatted.clone(),
            error: report.error.clone(),
        });
        sink.emit(&TraceEvent::CodeExecutionEnd {
            timestamp: Utc::now(),
            iteration,
            output: formatted,
            error: report.error.clone(),
        });

        Ok(report)
    }

    /// Resolve the legacy `FINAL(...)` / `FINAL_VAR(...)` line patterns.
    fn legacy_final(&self, response: &str, sandbox: &Sandbox) -> Option<FinalAnswer> {
        match parser::parse_legacy_final(response)? {
            LegacyFinal::Value(value) => Some(FinalAnswer::text(value)),
            LegacyFinal::Var(name) => {
                let message = match sandbox.local(&name) {
                    Some(serde_json::Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => format!("Error: variable '{name}' not found in the sandbox"),
                };
                Some(FinalAnswer::text(message))
            }
        }
    }

    /// Emit the final-answer event and assemble the result.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        run_id: String,
        answer: FinalAnswer,
        iterations: u32,
        meter: UsageMeter,
        mut trace: Vec<TraceEntry>,
        sink: &EventSink,
        run_started: Instant,
    ) -> RlmResult {
        sink.emit(&TraceEvent::FinalAnswer {
            timestamp: Utc::now(),
            answer: answer.message.clone(),
        });
        trace.push(TraceEntry::FinalAnswer {
            message: answer.message.clone(),
        });

        let usage = meter.finish(run_started.elapsed().as_millis() as u64);
        info!(
            run_id = %run_id,
            iterations,
            root_calls = usage.root_calls,
            sub_calls = usage.sub_calls,
            total_tokens = usage.token_usage.total_tokens,
            "Completion finished"
        );

        RlmResult {
            run_id,
            answer,
            usage,
            iterations,
            trace,
        }
    }
}
