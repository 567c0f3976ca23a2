//! The final-answer value a sandboxed program hands back to the caller.

use serde::{Deserialize, Serialize};

/// The result a program signals through the final-answer binding.
///
/// `message` is the human-readable answer; `data` is an optional
/// structured payload. A sandbox accepts a final answer at most once per
/// completion — later writes are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    /// The answer text
    pub message: String,

    /// Optional structured payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl FinalAnswer {
    /// Create a text-only final answer.
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    /// Attach a structured payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_answer_has_no_data() {
        let answer = FinalAnswer::text("X7Q2");
        assert_eq!(answer.message, "X7Q2");
        assert!(answer.data.is_none());
    }

    #[test]
    fn data_is_omitted_from_json_when_absent() {
        let json = serde_json::to_string(&FinalAnswer::text("done")).unwrap();
        assert!(!json.contains("data"));

        let with_data = FinalAnswer::text("done").with_data(serde_json::json!({"n": 3}));
        let json = serde_json::to_string(&with_data).unwrap();
        assert!(json.contains("\"n\":3"));
    }
}
