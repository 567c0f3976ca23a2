//! Context descriptors — what the root LLM learns about the context.
//!
//! The caller's context value never appears in the root LLM's prompt.
//! Instead the driver computes a small descriptor (type tag, rendered
//! length, chunk lengths) and sends only that. The full value is bound
//! inside the sandbox as `context`.

use serde::{Deserialize, Serialize};

/// The descriptive type tag reported for a context value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    /// Plain text (scalar contexts are rendered to text and tagged here)
    String,
    /// An ordered sequence
    Array,
    /// A keyed mapping
    Object,
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
        }
    }
}

/// Shape metadata for a context value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDescriptor {
    /// The descriptive type tag
    pub kind: ContextKind,

    /// Character count of the context rendered as text
    pub total_chars: usize,

    /// Character lengths of the context's logical chunks
    pub chunk_lens: Vec<usize>,
}

impl ContextDescriptor {
    /// Compute the descriptor for a context value.
    ///
    /// Strings report a single chunk equal to their length. Arrays report
    /// one chunk per element (each element rendered individually). Objects
    /// are serialized once and report a single chunk. The total always
    /// equals the length of [`render_text`].
    pub fn describe(value: &serde_json::Value) -> Self {
        let total_chars = render_text(value).chars().count();

        let (kind, mut chunk_lens) = match value {
            serde_json::Value::Array(items) => (
                ContextKind::Array,
                items
                    .iter()
                    .map(|item| render_text(item).chars().count())
                    .collect(),
            ),
            serde_json::Value::Object(_) => (ContextKind::Object, vec![total_chars]),
            _ => (ContextKind::String, vec![total_chars]),
        };

        if chunk_lens.is_empty() {
            chunk_lens.push(0);
        }

        Self {
            kind,
            total_chars,
            chunk_lens,
        }
    }
}

/// Render a context value as text.
///
/// Strings render as themselves, arrays as their elements joined with
/// newlines, everything else as JSON. Null renders empty.
pub fn render_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(render_text)
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_context_reports_single_chunk() {
        let desc = ContextDescriptor::describe(&json!("The password is X7Q2."));
        assert_eq!(desc.kind, ContextKind::String);
        assert_eq!(desc.total_chars, 21);
        assert_eq!(desc.chunk_lens, vec![21]);
    }

    #[test]
    fn array_context_reports_element_lengths() {
        let desc = ContextDescriptor::describe(&json!(["abc", "de", "f"]));
        assert_eq!(desc.kind, ContextKind::Array);
        assert_eq!(desc.chunk_lens, vec![3, 2, 1]);
        // joined with newlines: 3 + 1 + 2 + 1 + 1
        assert_eq!(desc.total_chars, 8);
    }

    #[test]
    fn object_context_reports_serialized_length() {
        let value = json!({"quarters": [{"q": "Q1", "revenue": 10}]});
        let desc = ContextDescriptor::describe(&value);
        assert_eq!(desc.kind, ContextKind::Object);
        assert_eq!(desc.chunk_lens.len(), 1);
        assert_eq!(desc.total_chars, value.to_string().chars().count());
        assert_eq!(desc.chunk_lens[0], desc.total_chars);
    }

    #[test]
    fn empty_context_reports_zero_length_chunk() {
        let desc = ContextDescriptor::describe(&json!(""));
        assert_eq!(desc.total_chars, 0);
        assert_eq!(desc.chunk_lens, vec![0]);

        let desc = ContextDescriptor::describe(&serde_json::Value::Null);
        assert_eq!(desc.total_chars, 0);
        assert_eq!(desc.chunk_lens, vec![0]);

        let desc = ContextDescriptor::describe(&json!([]));
        assert_eq!(desc.chunk_lens, vec![0]);
    }

    #[test]
    fn scalar_context_is_tagged_string() {
        let desc = ContextDescriptor::describe(&json!(42));
        assert_eq!(desc.kind, ContextKind::String);
        assert_eq!(desc.total_chars, 2);
    }

    #[test]
    fn kind_display_tags() {
        assert_eq!(ContextKind::String.to_string(), "string");
        assert_eq!(ContextKind::Array.to_string(), "array");
        assert_eq!(ContextKind::Object.to_string(), "object");
    }
}
