//! Usage accounting and event tracing for the Recurse RLM driver.
//!
//! Two complementary views of one completion:
//! - the **trace ledger** ([`TraceEntry`]) — returned to the caller inside
//!   the result, one entry per LLM call / executed block / report
//! - the **event stream** ([`TraceEvent`]) — delivered synchronously to an
//!   optional observer callback while the run is in flight
//!
//! Neither view ever contains raw context content; prompts and responses
//! are truncated to previews before they enter the ledger.

pub mod event;
pub mod model;

pub use event::{EventHandler, EventSink, TraceEvent};
pub use model::{truncate_chars, CallScope, RunUsage, TraceEntry, UsageMeter};
