//! # Recurse Core
//!
//! Domain types, traits, and error definitions for the Recurse RLM driver.
//! This crate has **zero framework dependencies** — it defines the domain
//! model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The LLM backend is defined as a trait here; implementations live in
//! their own crate. This enables:
//! - Swapping backends via configuration
//! - Easy testing with mock/stub providers
//! - Clean dependency graph (all crates depend inward on core)

pub mod answer;
pub mod context;
pub mod error;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use answer::FinalAnswer;
pub use context::{ContextDescriptor, ContextKind};
pub use error::{Error, ProviderError, Result, SandboxError};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
