//! # Recurse Sandbox
//!
//! The embedded interpreter substrate for LLM-authored programs.
//!
//! Each [`Sandbox`] hosts a Rhai engine on its own worker thread. Programs
//! receive the caller's context as the variable `context` and a fixed set
//! of injected bindings:
//!
//! - `llm_query(prompt[, model])` — one sub-LLM call; errors come back as
//!   strings, never as faults
//! - `llm_query_batched(prompts[, model])` — concurrent sub-calls with
//!   index-aligned results
//! - `print` / `debug` — captured to stdout / stderr
//! - `give_final_answer(#{message, data?})`, `FINAL(value)`,
//!   `FINAL_VAR(name)` — final-answer sentinels
//! - `parse_json`, `to_json`, `base64_encode`, `base64_decode`, `sleep`
//!
//! No filesystem, network, process, or dynamic-loading facilities are
//! reachable from a program. Top-level variables persist across
//! executions of the same sandbox; stdout/stderr and the sub-call frame
//! are fresh per execution.

pub mod report;
mod worker;

pub use report::{ExecutionReport, SubLlmCall};

use recurse_core::{FinalAnswer, Provider, SandboxError, Usage};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use worker::{CaptureState, SandboxCommand};

/// Default wall-clock budget for one program execution.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(300);

/// How the sandbox issues sub-LLM queries and bounds executions.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Model used for `llm_query` unless the program overrides it
    pub model: String,

    /// Optional system prompt prepended to every sub-query
    pub system_prompt: Option<String>,

    /// Temperature for sub-queries
    pub temperature: f32,

    /// Token cap for sub-queries
    pub max_tokens: Option<u32>,

    /// Wall-clock budget per execution
    pub exec_timeout: Duration,
}

impl SandboxConfig {
    /// Create a config with the given sub-query model and defaults elsewhere.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            temperature: 0.7,
            max_tokens: None,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    /// Set the system prompt shared by all sub-queries.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the sub-query temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set the sub-query token cap.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the per-execution wall-clock budget.
    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }
}

/// Handle to a sandbox worker.
///
/// One instance is created per completion. Commands are serialised through
/// the worker's channel; captured state is readable between executions.
pub struct Sandbox {
    sender: mpsc::UnboundedSender<SandboxCommand>,
    state: Arc<CaptureState>,
}

impl Sandbox {
    /// Spawn the worker thread and hand back the handle.
    ///
    /// Must be called from within a tokio runtime — the worker bridges the
    /// synchronous interpreter to the async provider through the runtime's
    /// handle.
    pub fn spawn(
        provider: Arc<dyn Provider>,
        config: SandboxConfig,
    ) -> Result<Self, SandboxError> {
        let handle = Handle::try_current()
            .map_err(|e| SandboxError::Init(format!("tokio runtime handle unavailable: {e}")))?;

        let state = Arc::new(CaptureState::default());
        let (sender, receiver) = mpsc::unbounded_channel();

        let thread_state = state.clone();
        std::thread::Builder::new()
            .name("recurse-sandbox".into())
            .spawn(move || worker::run(provider, config, handle, thread_state, receiver))
            .map_err(|e| SandboxError::Init(format!("failed to spawn worker thread: {e}")))?;

        Ok(Self { sender, state })
    }

    /// Bind (or rebind) the caller's context value as `context`.
    pub async fn load_context(&self, value: serde_json::Value) -> Result<(), SandboxError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(SandboxCommand::LoadContext { value, reply })
            .map_err(|_| worker_gone())?;
        response.await.map_err(|_| worker_gone())?
    }

    /// Execute one program with the configured timeout.
    pub async fn execute(&self, code: impl Into<String>) -> Result<ExecutionReport, SandboxError> {
        self.execute_inner(code.into(), None).await
    }

    /// Execute one program with an explicit timeout.
    pub async fn execute_with_timeout(
        &self,
        code: impl Into<String>,
        timeout: Duration,
    ) -> Result<ExecutionReport, SandboxError> {
        self.execute_inner(code.into(), Some(timeout)).await
    }

    async fn execute_inner(
        &self,
        code: String,
        timeout: Option<Duration>,
    ) -> Result<ExecutionReport, SandboxError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(SandboxCommand::Execute {
                code,
                timeout,
                reply,
            })
            .map_err(|_| worker_gone())?;
        response.await.map_err(|_| worker_gone())
    }

    /// Clear captured state (locals, final answer, sub-call log).
    /// The provider binding and the loaded context are kept.
    pub async fn reset(&self) -> Result<(), SandboxError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(SandboxCommand::Reset { reply })
            .map_err(|_| worker_gone())?;
        response.await.map_err(|_| worker_gone())
    }

    /// The final answer, if any program has set one.
    pub fn final_answer(&self) -> Option<FinalAnswer> {
        self.state.final_answer.lock().unwrap().clone()
    }

    /// A single persisted local by name.
    pub fn local(&self, name: &str) -> Option<serde_json::Value> {
        self.state.locals.lock().unwrap().get(name).cloned()
    }

    /// All persisted locals.
    pub fn locals(&self) -> BTreeMap<String, serde_json::Value> {
        self.state.locals.lock().unwrap().clone()
    }

    /// Every sub-LLM call made over the sandbox's lifetime.
    pub fn sub_calls(&self) -> Vec<SubLlmCall> {
        self.state.all_sub_calls.lock().unwrap().clone()
    }

    /// Token usage summed across all sub-LLM calls.
    pub fn aggregate_sub_usage(&self) -> Usage {
        let mut total = Usage::default();
        for call in self.state.all_sub_calls.lock().unwrap().iter() {
            total.accumulate(&call.usage);
        }
        total
    }
}

fn worker_gone() -> SandboxError {
    SandboxError::WorkerGone("worker thread stopped".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use recurse_core::error::ProviderError;
    use recurse_core::{Message, ProviderRequest, ProviderResponse};
    use serde_json::json;

    /// Echoes the last user message back with a fixed usage.
    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            let prompt = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ProviderResponse {
                message: Message::assistant(format!("echo: {prompt}")),
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
                model: request.model,
                finish_reason: Some("stop".into()),
            })
        }
    }

    /// Always fails at the transport level.
    struct FailingProvider;

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::Network("connection refused".into()))
        }
    }

    fn echo_sandbox() -> Sandbox {
        Sandbox::spawn(Arc::new(EchoProvider), SandboxConfig::new("echo-model")).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn print_is_captured_to_stdout() {
        let sandbox = echo_sandbox();
        let report = sandbox.execute(r#"print("hello"); print(42);"#).await.unwrap();
        assert_eq!(report.stdout, "hello\n42\n");
        assert!(report.stderr.is_empty());
        assert!(report.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn locals_are_captured_and_persist() {
        let sandbox = echo_sandbox();

        let report = sandbox
            .execute("let total = 5; let _scratch = 1;")
            .await
            .unwrap();
        assert_eq!(report.locals.get("total"), Some(&json!(5)));
        assert!(!report.locals.contains_key("_scratch"));
        assert!(!report.locals.contains_key("context"));

        // `total` survives into the next execution.
        let report = sandbox.execute("let doubled = total * 2;").await.unwrap();
        assert_eq!(report.locals.get("doubled"), Some(&json!(10)));
        assert_eq!(sandbox.local("total"), Some(json!(5)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn final_answer_is_set_once() {
        let sandbox = echo_sandbox();
        sandbox
            .execute(r#"give_final_answer(#{message: "done", data: #{n: 3}});"#)
            .await
            .unwrap();

        let answer = sandbox.final_answer().unwrap();
        assert_eq!(answer.message, "done");
        assert_eq!(answer.data, Some(json!({"n": 3})));

        // A later write is ignored.
        sandbox
            .execute(r#"give_final_answer(#{message: "other"});"#)
            .await
            .unwrap();
        assert_eq!(sandbox.final_answer().unwrap().message, "done");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn non_string_message_is_silently_rejected() {
        let sandbox = echo_sandbox();
        let report = sandbox
            .execute(r#"give_final_answer(#{message: 42}); print("continues");"#)
            .await
            .unwrap();
        assert!(sandbox.final_answer().is_none());
        assert!(report.stdout.contains("continues"));

        // Missing message field behaves the same.
        sandbox
            .execute(r#"give_final_answer(#{data: "x"});"#)
            .await
            .unwrap();
        assert!(sandbox.final_answer().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn final_stringifies_values() {
        let sandbox = echo_sandbox();
        sandbox.execute("FINAL(1234);").await.unwrap();
        assert_eq!(sandbox.final_answer().unwrap().message, "1234");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn final_var_resolves_last_write() {
        let sandbox = echo_sandbox();
        sandbox.execute(r#"let needle = "A";"#).await.unwrap();
        sandbox
            .execute(r#"let needle = "B"; FINAL_VAR("needle");"#)
            .await
            .unwrap();
        assert_eq!(sandbox.final_answer().unwrap().message, "B");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn final_var_unknown_name_yields_error_string() {
        let sandbox = echo_sandbox();
        sandbox.execute(r#"FINAL_VAR("missing");"#).await.unwrap();
        let answer = sandbox.final_answer().unwrap();
        assert!(answer.message.contains("'missing' not found"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn faults_are_contained() {
        let sandbox = echo_sandbox();
        let report = sandbox
            .execute("let x = undefined_variable + 1;")
            .await
            .unwrap();

        let error = report.error.as_deref().unwrap();
        assert!(error.contains("undefined_variable"), "error: {error}");
        assert!(report.stderr.contains("Fix the code"));
        assert!(report.execution_time_ms > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn partial_locals_survive_a_fault() {
        let sandbox = echo_sandbox();
        let report = sandbox
            .execute("let before = 7; boom();")
            .await
            .unwrap();
        assert!(report.error.is_some());
        assert_eq!(report.locals.get("before"), Some(&json!(7)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runaway_program_hits_the_timeout() {
        let provider: Arc<dyn Provider> = Arc::new(EchoProvider);
        let sandbox = Sandbox::spawn(
            provider,
            SandboxConfig::new("echo-model").with_exec_timeout(Duration::from_millis(50)),
        )
        .unwrap();

        let report = sandbox.execute("loop { }").await.unwrap();
        let error = report.error.as_deref().unwrap();
        assert!(error.contains("timed out"), "error: {error}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn llm_query_returns_text_and_records_usage() {
        let sandbox = echo_sandbox();
        let report = sandbox
            .execute(r#"let answer = llm_query("What is X?"); print(answer);"#)
            .await
            .unwrap();

        assert!(report.stdout.contains("echo: What is X?"));
        assert_eq!(report.sub_calls.len(), 1);
        assert_eq!(report.sub_calls[0].prompt, "What is X?");
        assert_eq!(report.sub_calls[0].usage.total_tokens, 15);
        assert!(report.sub_calls[0].model_override.is_none());
        assert_eq!(sandbox.aggregate_sub_usage().total_tokens, 15);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn llm_query_model_override_is_recorded() {
        let sandbox = echo_sandbox();
        let report = sandbox
            .execute(r#"llm_query("q", "small-model");"#)
            .await
            .unwrap();
        assert_eq!(
            report.sub_calls[0].model_override.as_deref(),
            Some("small-model")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn llm_query_transport_error_becomes_a_string() {
        let provider: Arc<dyn Provider> = Arc::new(FailingProvider);
        let sandbox = Sandbox::spawn(provider, SandboxConfig::new("m")).unwrap();

        let report = sandbox
            .execute(r#"let r = llm_query("q"); print(r);"#)
            .await
            .unwrap();

        // The program keeps running; the record is still appended.
        assert!(report.is_ok());
        assert!(report.stdout.contains("Error making LLM query"));
        assert_eq!(report.sub_calls.len(), 1);
        assert_eq!(report.sub_calls[0].usage, Usage::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn batched_results_are_index_aligned() {
        let sandbox = echo_sandbox();
        let report = sandbox
            .execute(
                r#"
let results = llm_query_batched(["a", "b", "c"]);
print(results[0] + "|" + results[1] + "|" + results[2]);
"#,
            )
            .await
            .unwrap();

        assert!(report.stdout.contains("echo: a|echo: b|echo: c"));
        let prompts: Vec<&str> = report.sub_calls.iter().map(|c| c.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["a", "b", "c"]);
        assert_eq!(sandbox.aggregate_sub_usage().total_tokens, 45);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn context_is_reachable_from_programs() {
        let sandbox = echo_sandbox();
        sandbox
            .load_context(json!({"quarters": [{"q": "Q1"}, {"q": "Q2"}]}))
            .await
            .unwrap();

        let report = sandbox
            .execute("print(context.quarters[1].q);")
            .await
            .unwrap();
        assert_eq!(report.stdout, "Q2\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reset_clears_state_but_keeps_context() {
        let sandbox = echo_sandbox();
        sandbox.load_context(json!("the context")).await.unwrap();
        sandbox
            .execute(r#"let kept = 1; give_final_answer(#{message: "done"});"#)
            .await
            .unwrap();
        assert!(sandbox.final_answer().is_some());

        sandbox.reset().await.unwrap();
        assert!(sandbox.final_answer().is_none());
        assert!(sandbox.locals().is_empty());
        assert!(sandbox.sub_calls().is_empty());

        // Re-executing against the retained context works as before.
        let report = sandbox.execute("print(context);").await.unwrap();
        assert_eq!(report.stdout, "the context\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn value_helpers_round_trip() {
        let sandbox = echo_sandbox();
        let report = sandbox
            .execute(
                r#"
let v = parse_json("{\"a\": 1}");
print(v.a);
print(base64_decode(base64_encode("hi")));
print(to_json(#{b: 2}));
"#,
            )
            .await
            .unwrap();
        assert!(report.stdout.contains("1\n"));
        assert!(report.stdout.contains("hi\n"));
        assert!(report.stdout.contains("{\"b\":2}"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reexecution_after_reset_is_reproducible() {
        let sandbox = echo_sandbox();
        let code = r#"let n = 6 * 7; print(n);"#;

        let first = sandbox.execute(code).await.unwrap();
        sandbox.reset().await.unwrap();
        let second = sandbox.execute(code).await.unwrap();

        assert_eq!(first.stdout, second.stdout);
        assert_eq!(first.locals, second.locals);
    }
}
