//! The sandbox worker — owns the Rhai engine and its scope on a dedicated
//! thread.
//!
//! The interpreter is synchronous while the provider is async, so the
//! worker bridges the two with a runtime [`Handle`]: binding callbacks
//! block on provider futures without ever blocking the driver's executor.
//! Capture state (stdout, stderr, sub-call log, locals, final answer) is
//! shared with the [`crate::Sandbox`] handle behind a per-sandbox mutex so
//! concurrent batched queries cannot tear records.

use crate::report::{ExecutionReport, SubLlmCall};
use crate::SandboxConfig;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use recurse_core::{FinalAnswer, Message, Provider, ProviderRequest, SandboxError, Usage};
use rhai::{Dynamic, Engine, EvalAltResult, Map, Scope};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Longest pause a program may request from `sleep(ms)`.
const MAX_SLEEP_MS: i64 = 10_000;

/// Interrupt token returned by the progress hook on deadline overrun.
const TIMEOUT_TOKEN: &str = "wall-clock timeout";

/// Commands the handle sends to the worker thread.
pub(crate) enum SandboxCommand {
    LoadContext {
        value: serde_json::Value,
        reply: oneshot::Sender<Result<(), SandboxError>>,
    },
    Execute {
        code: String,
        timeout: Option<Duration>,
        reply: oneshot::Sender<ExecutionReport>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
}

/// Capture state shared between the worker and the handle.
///
/// The worker is the only writer during execution; the handle reads
/// between executions. Batched sub-queries append through the same
/// mutexes, which serialises interleaved completions.
#[derive(Default)]
pub(crate) struct CaptureState {
    pub stdout: Mutex<String>,
    pub stderr: Mutex<String>,
    /// Sub-calls made by the execution currently in flight
    pub frame_sub_calls: Mutex<Vec<SubLlmCall>>,
    /// Sub-calls across the sandbox's whole lifetime
    pub all_sub_calls: Mutex<Vec<SubLlmCall>>,
    pub final_answer: Mutex<Option<FinalAnswer>>,
    /// Name requested by `FINAL_VAR`, resolved after the program finishes
    pub pending_final_var: Mutex<Option<String>>,
    /// Top-level locals, persisted across executions
    pub locals: Mutex<BTreeMap<String, serde_json::Value>>,
    /// Wall-clock deadline for the execution in flight
    pub deadline: Mutex<Option<Instant>>,
}

/// Entry point for the worker thread.
pub(crate) fn run(
    provider: Arc<dyn Provider>,
    config: SandboxConfig,
    handle: Handle,
    state: Arc<CaptureState>,
    mut receiver: mpsc::UnboundedReceiver<SandboxCommand>,
) {
    let mut core = SandboxCore::new(provider, &config, handle, state);

    while let Some(command) = receiver.blocking_recv() {
        match command {
            SandboxCommand::LoadContext { value, reply } => {
                let _ = reply.send(core.load_context(value));
            }
            SandboxCommand::Execute {
                code,
                timeout,
                reply,
            } => {
                let _ = reply.send(core.execute(&code, timeout));
            }
            SandboxCommand::Reset { reply } => {
                core.reset();
                let _ = reply.send(());
            }
        }
    }
}

/// The engine, its persistent scope, and everything bindings close over.
struct SandboxCore {
    engine: Engine,
    scope: Scope<'static>,
    state: Arc<CaptureState>,
    /// Last loaded context, kept so `reset()` can rebind it
    context: serde_json::Value,
    default_timeout: Duration,
}

impl SandboxCore {
    fn new(
        provider: Arc<dyn Provider>,
        config: &SandboxConfig,
        handle: Handle,
        state: Arc<CaptureState>,
    ) -> Self {
        let engine = build_engine(provider, config, handle, state.clone());
        Self {
            engine,
            scope: Scope::new(),
            state,
            context: serde_json::Value::Null,
            default_timeout: config.exec_timeout,
        }
    }

    /// Bind (or rebind) the caller's context value into the scope.
    fn load_context(&mut self, value: serde_json::Value) -> Result<(), SandboxError> {
        let dynamic = rhai::serde::to_dynamic(&value)
            .map_err(|e| SandboxError::Init(format!("context not representable: {e}")))?;
        if self.scope.contains("context") {
            self.scope.set_value("context", dynamic);
        } else {
            self.scope.push_dynamic("context", dynamic);
        }
        self.context = value;
        Ok(())
    }

    /// Run one program and produce its report.
    ///
    /// stdout, stderr, and the sub-call frame are fresh for this run;
    /// locals and the final answer persist across runs.
    fn execute(&mut self, code: &str, timeout: Option<Duration>) -> ExecutionReport {
        let timeout = timeout.unwrap_or(self.default_timeout);
        self.begin_frame(timeout);

        let started = Instant::now();
        let outcome = self.engine.eval_with_scope::<Dynamic>(&mut self.scope, code);
        // A fault still yields a positive duration in the report.
        let execution_time_ms = started.elapsed().as_millis().max(1) as u64;

        let error = match outcome {
            Ok(_) => None,
            Err(err) => Some(self.report_fault(&err, timeout)),
        };

        self.resolve_pending_final();
        self.snapshot_locals();

        let (stdout, stderr, sub_calls) = self.take_frame();
        ExecutionReport {
            stdout,
            stderr,
            locals: self.state.locals.lock().unwrap().clone(),
            execution_time_ms,
            sub_calls,
            error,
        }
    }

    /// Clear captured state, keeping the provider binding and the context.
    fn reset(&mut self) {
        self.scope = Scope::new();
        self.state.stdout.lock().unwrap().clear();
        self.state.stderr.lock().unwrap().clear();
        self.state.frame_sub_calls.lock().unwrap().clear();
        self.state.all_sub_calls.lock().unwrap().clear();
        *self.state.final_answer.lock().unwrap() = None;
        *self.state.pending_final_var.lock().unwrap() = None;
        self.state.locals.lock().unwrap().clear();

        let context = std::mem::take(&mut self.context);
        // The context converted cleanly once already.
        let _ = self.load_context(context);
    }

    fn begin_frame(&self, timeout: Duration) {
        self.state.stdout.lock().unwrap().clear();
        self.state.stderr.lock().unwrap().clear();
        self.state.frame_sub_calls.lock().unwrap().clear();
        *self.state.deadline.lock().unwrap() = Some(Instant::now() + timeout);
    }

    fn take_frame(&self) -> (String, String, Vec<SubLlmCall>) {
        *self.state.deadline.lock().unwrap() = None;
        (
            std::mem::take(&mut *self.state.stdout.lock().unwrap()),
            std::mem::take(&mut *self.state.stderr.lock().unwrap()),
            std::mem::take(&mut *self.state.frame_sub_calls.lock().unwrap()),
        )
    }

    /// Format a fault, write the diagnostic + hint to stderr, and return
    /// the error string for the report.
    fn report_fault(&self, err: &EvalAltResult, timeout: Duration) -> String {
        let message = if matches!(err, EvalAltResult::ErrorTerminated(..)) {
            format!("Execution timed out after {} ms", timeout.as_millis())
        } else {
            err.to_string()
        };

        let mut stderr = self.state.stderr.lock().unwrap();
        stderr.push_str(&format!("Error: {message}\n"));
        stderr.push_str("Fix the code and retry in a new repl block.\n");
        message
    }

    /// Resolve a `FINAL_VAR(name)` request against the persistent scope.
    /// Last write to the name wins; unresolved names store an error string.
    fn resolve_pending_final(&mut self) {
        let Some(name) = self.state.pending_final_var.lock().unwrap().take() else {
            return;
        };

        let message = match self.scope.get_value::<Dynamic>(&name) {
            Some(value) => format_dynamic(&value),
            None => format!("Error: variable '{name}' not found in the sandbox"),
        };
        set_final_once(&self.state, FinalAnswer::text(message));
    }

    /// Snapshot top-level bindings into the persistent locals map.
    ///
    /// Injected bindings and underscore-prefixed names are excluded;
    /// values Rhai cannot serialise are skipped silently.
    fn snapshot_locals(&self) {
        let mut locals = self.state.locals.lock().unwrap();
        for (name, _constant, value) in self.scope.iter() {
            if name == "context" || name.starts_with('_') {
                continue;
            }
            if let Ok(json) = rhai::serde::from_dynamic::<serde_json::Value>(&value) {
                locals.insert(name.to_string(), json);
            }
        }
    }
}

/// One sub-query's worth of provider plumbing, cloned into each binding.
#[derive(Clone)]
struct SubQueryClient {
    provider: Arc<dyn Provider>,
    handle: Handle,
    state: Arc<CaptureState>,
    model: String,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl SubQueryClient {
    fn request(&self, prompt: &str, model_override: Option<&str>) -> ProviderRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        let mut request =
            ProviderRequest::new(model_override.unwrap_or(&self.model), messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request
    }

    /// One sub-query. Never raises into the program — transport errors
    /// come back as descriptive strings, and a record is appended either way.
    fn query(&self, prompt: &str, model_override: Option<&str>) -> String {
        let started = Instant::now();
        let outcome = self
            .handle
            .block_on(self.provider.complete(self.request(prompt, model_override)));

        let (response, usage) = match outcome {
            Ok(resp) => {
                let usage = resp.usage.unwrap_or_default();
                (resp.message.content, usage)
            }
            Err(err) => (format!("Error making LLM query: {err}"), Usage::default()),
        };

        self.record(SubLlmCall {
            prompt: prompt.to_string(),
            response: response.clone(),
            usage,
            duration_ms: started.elapsed().as_millis() as u64,
            model_override: model_override.map(str::to_string),
        });
        response
    }

    /// Run all prompts concurrently; results and records stay index-aligned
    /// to the inputs regardless of completion order.
    fn query_batched(&self, prompts: Vec<String>, model_override: Option<&str>) -> Vec<String> {
        let futures: Vec<_> = prompts
            .iter()
            .map(|prompt| {
                let request = self.request(prompt, model_override);
                let provider = self.provider.clone();
                async move {
                    let started = Instant::now();
                    let outcome = provider.complete(request).await;
                    (outcome, started.elapsed())
                }
            })
            .collect();

        let outcomes = self.handle.block_on(futures::future::join_all(futures));

        let mut responses = Vec::with_capacity(prompts.len());
        for (prompt, (outcome, elapsed)) in prompts.iter().zip(outcomes) {
            let (response, usage) = match outcome {
                Ok(resp) => {
                    let usage = resp.usage.unwrap_or_default();
                    (resp.message.content, usage)
                }
                Err(err) => (format!("Error making LLM query: {err}"), Usage::default()),
            };
            self.record(SubLlmCall {
                prompt: prompt.clone(),
                response: response.clone(),
                usage,
                duration_ms: elapsed.as_millis() as u64,
                model_override: model_override.map(str::to_string),
            });
            responses.push(response);
        }
        responses
    }

    fn record(&self, call: SubLlmCall) {
        self.state.frame_sub_calls.lock().unwrap().push(call.clone());
        self.state.all_sub_calls.lock().unwrap().push(call);
    }
}

/// Build the engine with output capture, the timeout hook, and all
/// injected bindings registered.
fn build_engine(
    provider: Arc<dyn Provider>,
    config: &SandboxConfig,
    handle: Handle,
    state: Arc<CaptureState>,
) -> Engine {
    let mut engine = Engine::new();

    // ── Output capture ────────────────────────────────────────────────
    let out_state = state.clone();
    engine.on_print(move |text| {
        let mut stdout = out_state.stdout.lock().unwrap();
        stdout.push_str(text);
        stdout.push('\n');
    });

    let err_state = state.clone();
    engine.on_debug(move |text, _source, _pos| {
        let mut stderr = err_state.stderr.lock().unwrap();
        stderr.push_str(text);
        stderr.push('\n');
    });

    // ── Wall-clock timeout ────────────────────────────────────────────
    let deadline_state = state.clone();
    engine.on_progress(move |_ops| {
        let deadline = deadline_state.deadline.lock().unwrap();
        match *deadline {
            Some(deadline) if Instant::now() > deadline => Some(TIMEOUT_TOKEN.into()),
            _ => None,
        }
    });

    // ── Sub-LLM queries ───────────────────────────────────────────────
    let client = SubQueryClient {
        provider,
        handle,
        state: state.clone(),
        model: config.model.clone(),
        system_prompt: config.system_prompt.clone(),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let q = client.clone();
    engine.register_fn("llm_query", move |prompt: &str| -> String {
        q.query(prompt, None)
    });
    let q = client.clone();
    engine.register_fn("llm_query", move |prompt: &str, model: &str| -> String {
        q.query(prompt, Some(model))
    });
    let q = client.clone();
    engine.register_fn("llm_query_batched", move |prompts: rhai::Array| -> rhai::Array {
        q.query_batched(array_to_strings(prompts), None)
            .into_iter()
            .map(Dynamic::from)
            .collect()
    });
    let q = client;
    engine.register_fn(
        "llm_query_batched",
        move |prompts: rhai::Array, model: &str| -> rhai::Array {
            q.query_batched(array_to_strings(prompts), Some(model))
                .into_iter()
                .map(Dynamic::from)
                .collect()
        },
    );

    // ── Final-answer sentinels ────────────────────────────────────────
    let s = state.clone();
    engine.register_fn("give_final_answer", move |payload: Map| {
        let Some(message) = payload.get("message") else {
            debug!("give_final_answer without a message field ignored");
            return;
        };
        let Ok(message) = message.clone().into_immutable_string() else {
            debug!("give_final_answer with non-string message ignored");
            return;
        };
        let data = payload
            .get("data")
            .and_then(|d| rhai::serde::from_dynamic::<serde_json::Value>(d).ok());
        set_final_once(
            &s,
            FinalAnswer {
                message: message.to_string(),
                data,
            },
        );
    });

    let s = state.clone();
    engine.register_fn("FINAL", move |value: Dynamic| {
        set_final_once(&s, FinalAnswer::text(format_dynamic(&value)));
    });

    let s = state.clone();
    engine.register_fn("FINAL_VAR", move |name: &str| {
        let name = name.trim().trim_matches(|c| c == '"' || c == '\'');
        *s.pending_final_var.lock().unwrap() = Some(name.to_string());
    });

    // ── Value helpers ─────────────────────────────────────────────────
    engine.register_fn(
        "parse_json",
        |text: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let value: serde_json::Value = serde_json::from_str(text)
                .map_err(|e| -> Box<EvalAltResult> { format!("JSON parse error: {e}").into() })?;
            rhai::serde::to_dynamic(&value)
        },
    );
    engine.register_fn(
        "to_json",
        |value: Dynamic| -> Result<String, Box<EvalAltResult>> {
            let json: serde_json::Value = rhai::serde::from_dynamic(&value)?;
            serde_json::to_string(&json)
                .map_err(|e| -> Box<EvalAltResult> { format!("JSON encode error: {e}").into() })
        },
    );
    engine.register_fn("base64_encode", |text: &str| -> String {
        BASE64.encode(text.as_bytes())
    });
    engine.register_fn(
        "base64_decode",
        |text: &str| -> Result<String, Box<EvalAltResult>> {
            let bytes = BASE64.decode(text.trim()).map_err(|e| -> Box<EvalAltResult> {
                format!("base64 decode error: {e}").into()
            })?;
            String::from_utf8(bytes).map_err(|e| -> Box<EvalAltResult> {
                format!("base64 payload is not UTF-8: {e}").into()
            })
        },
    );
    engine.register_fn("sleep", |millis: i64| {
        std::thread::sleep(Duration::from_millis(millis.clamp(0, MAX_SLEEP_MS) as u64));
    });

    engine
}

fn array_to_strings(values: rhai::Array) -> Vec<String> {
    values
        .into_iter()
        .map(|value| format_dynamic(&value))
        .collect()
}

fn format_dynamic(value: &Dynamic) -> String {
    match value.clone().into_immutable_string() {
        Ok(s) => s.to_string(),
        Err(_) => value.to_string(),
    }
}

fn set_final_once(state: &CaptureState, answer: FinalAnswer) {
    let mut slot = state.final_answer.lock().unwrap();
    if slot.is_none() {
        *slot = Some(answer);
    } else {
        debug!("final answer already set; ignoring later write");
    }
}
