use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Legacy string-prefix form still emitted by older tooling; accepted on
/// input, never produced.
pub const LEGACY_SELF_CORRECT_PREFIX: &str = "SELF_CORRECT_ATTEMPT:";

const SELF_CORRECT_KEY: &str = "selfCorrect";

/// Uniform result envelope every tool returns. Handlers never raise across
/// the executor boundary; failures are carried here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            metadata: Value::Null,
        }
    }

    pub fn ok_with(output: impl Into<String>, metadata: Value) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            metadata,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            metadata: Value::Null,
        }
    }

    /// Render the envelope as the text fed back to the model.
    pub fn to_model_text(&self) -> String {
        if self.success {
            self.output.clone().unwrap_or_default()
        } else {
            let mut text = format!("Error: {}", self.error.as_deref().unwrap_or("unknown"));
            if let Some(sc) = SelfCorrectError::decode(self) {
                text.push_str(&format!(
                    "\nHint: {}\nSuggested fallbacks: {}",
                    sc.hint,
                    sc.suggested_fallbacks.join(", ")
                ));
            }
            text
        }
    }
}

/// A structured tool failure carrying a recovery route: the tool that
/// failed, tools worth trying instead, and a hint the agent can forward to
/// the model verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfCorrectError {
    pub message: String,
    pub original_tool: String,
    pub suggested_fallbacks: Vec<String>,
    pub hint: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl SelfCorrectError {
    pub fn new(
        message: impl Into<String>,
        original_tool: impl Into<String>,
        suggested_fallbacks: &[&str],
        hint: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            original_tool: original_tool.into(),
            suggested_fallbacks: suggested_fallbacks.iter().map(|s| s.to_string()).collect(),
            hint: hint.into(),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Encode into the result envelope. Only the typed form is emitted.
    pub fn into_outcome(self) -> ToolOutcome {
        let encoded = serde_json::to_value(&self).unwrap_or(Value::Null);
        ToolOutcome {
            success: false,
            error: Some(self.message),
            output: None,
            metadata: json!({ SELF_CORRECT_KEY: encoded }),
        }
    }

    /// Structural detection first; the legacy text prefix is honored as a
    /// fallback for results produced by older tools.
    pub fn decode(outcome: &ToolOutcome) -> Option<Self> {
        if outcome.success {
            return None;
        }
        if let Some(encoded) = outcome.metadata.get(SELF_CORRECT_KEY) {
            if let Ok(sc) = serde_json::from_value::<SelfCorrectError>(encoded.clone()) {
                return Some(sc);
            }
        }
        let error = outcome.error.as_deref()?;
        if let Some(rest) = error.strip_prefix(LEGACY_SELF_CORRECT_PREFIX) {
            return Some(SelfCorrectError {
                message: rest.trim().to_string(),
                original_tool: String::new(),
                suggested_fallbacks: Vec::new(),
                hint: rest.trim().to_string(),
                metadata: Value::Null,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_round_trip() {
        let sc = SelfCorrectError::new(
            "old_str not found",
            "str_replace_editor",
            &["view_file", "multi_file_edit", "code_analysis"],
            "The text may differ in whitespace.",
        )
        .with_metadata(json!({"attempted": true}));

        let outcome = sc.clone().into_outcome();
        assert!(!outcome.success);
        let decoded = SelfCorrectError::decode(&outcome).unwrap();
        assert_eq!(decoded.original_tool, "str_replace_editor");
        assert_eq!(decoded.suggested_fallbacks.len(), 3);
        assert_eq!(decoded.metadata["attempted"], json!(true));
    }

    #[test]
    fn legacy_prefix_is_detected() {
        let outcome = ToolOutcome::fail(format!(
            "{LEGACY_SELF_CORRECT_PREFIX} try view_file before editing"
        ));
        let decoded = SelfCorrectError::decode(&outcome).unwrap();
        assert_eq!(decoded.hint, "try view_file before editing");
        assert!(decoded.suggested_fallbacks.is_empty());
    }

    #[test]
    fn plain_failures_are_not_self_correct() {
        let outcome = ToolOutcome::fail("permission denied");
        assert!(SelfCorrectError::decode(&outcome).is_none());
    }

    #[test]
    fn successful_outcomes_never_decode() {
        let outcome = ToolOutcome::ok("fine");
        assert!(SelfCorrectError::decode(&outcome).is_none());
    }

    #[test]
    fn model_text_includes_hint_and_fallbacks() {
        let outcome = SelfCorrectError::new(
            "file not found",
            "view_file",
            &["search"],
            "Search for the file first.",
        )
        .into_outcome();
        let text = outcome.to_model_text();
        assert!(text.contains("file not found"));
        assert!(text.contains("Search for the file first."));
        assert!(text.contains("search"));
    }
}
