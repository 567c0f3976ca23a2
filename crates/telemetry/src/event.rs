//! The typed event stream emitted while a completion is in flight.
//!
//! Events are delivered synchronously, in order, to an optional observer
//! callback. A panicking observer must never take the driver down with it,
//! so the sink swallows panics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A single observability event.
///
/// Timestamps are captured at emission time and are monotonically
/// non-decreasing within one completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    /// A new iteration of the loop is starting (1-based).
    IterationStart {
        timestamp: DateTime<Utc>,
        iteration: u32,
    },

    /// A root LLM call is about to be made.
    LlmQueryStart {
        timestamp: DateTime<Utc>,
        iteration: u32,
        /// Truncated preview of the outgoing user turn
        prompt: String,
    },

    /// A root LLM call finished (or failed).
    LlmQueryEnd {
        timestamp: DateTime<Utc>,
        iteration: u32,
        response: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A code block is about to execute in the sandbox.
    CodeExecutionStart {
        timestamp: DateTime<Utc>,
        iteration: u32,
        code: String,
    },

    /// A code block finished executing.
    CodeExecutionEnd {
        timestamp: DateTime<Utc>,
        iteration: u32,
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A program invoked the final-answer binding.
    FinalAnswer {
        timestamp: DateTime<Utc>,
        answer: String,
    },
}

impl TraceEvent {
    /// The emission timestamp of this event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::IterationStart { timestamp, .. }
            | Self::LlmQueryStart { timestamp, .. }
            | Self::LlmQueryEnd { timestamp, .. }
            | Self::CodeExecutionStart { timestamp, .. }
            | Self::CodeExecutionEnd { timestamp, .. }
            | Self::FinalAnswer { timestamp, .. } => *timestamp,
        }
    }
}

/// Observer callback type for [`EventSink`].
pub type EventHandler = Box<dyn Fn(&TraceEvent) + Send + Sync>;

/// Fans events out to the optional observer callback.
pub struct EventSink {
    handler: Option<EventHandler>,
}

impl EventSink {
    /// Create a sink around an optional observer.
    pub fn new(handler: Option<EventHandler>) -> Self {
        Self { handler }
    }

    /// Deliver one event. Observer panics are swallowed.
    pub fn emit(&self, event: &TraceEvent) {
        if let Some(handler) = &self.handler {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::warn!("Event observer panicked; event dropped");
            }
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(None)
    }
}
