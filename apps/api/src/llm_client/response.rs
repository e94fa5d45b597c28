use serde::de::DeserializeOwned;
use serde_json::Value;

use super::CompletionError;

/// Typed view of a completion response.
///
/// Deserialization enforces the structure; `check` enforces what serde cannot
/// (numeric ranges, required non-empty values).
pub trait ResponseSchema: DeserializeOwned + Send {
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

impl ResponseSchema for Value {}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

/// Locates the outermost `{ ... }` span, tolerating chatter around it.
fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parses the raw response text into a JSON object.
pub fn parse_object(text: &str) -> Result<Value, CompletionError> {
    let stripped = strip_json_fences(text);
    let candidate = outermost_object(stripped).ok_or_else(|| {
        CompletionError::Validation("response does not contain a JSON object".to_string())
    })?;
    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| CompletionError::Validation(format!("malformed JSON: {e}")))?;
    if !value.is_object() {
        return Err(CompletionError::Validation(
            "response is not a JSON object".to_string(),
        ));
    }
    Ok(value)
}

/// Validates a parsed object against the expected schema.
pub fn conform<T: ResponseSchema>(value: Value) -> Result<T, CompletionError> {
    let typed: T = serde_json::from_value(value)
        .map_err(|e| CompletionError::Validation(format!("schema mismatch: {e}")))?;
    typed
        .check()
        .map_err(|reason| CompletionError::Validation(format!("schema mismatch: {reason}")))?;
    Ok(typed)
}
