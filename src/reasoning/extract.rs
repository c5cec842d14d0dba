//! Locate the JSON payload inside raw capability output.
use serde::Deserialize;
use serde_json::Value;

/// Unwrap a CLI response envelope, if there is one.
///
/// Several LM CLIs wrap the model output as `{"result": "...", "stop_reason": ...}`
/// or `{"structured_output": {...}}`. Anything else is returned unchanged.
/// The flag reports whether the envelope signalled an output-length cutoff.
pub fn unwrap_envelope(raw: &str) -> (String, bool) {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw.trim()) else {
        return (raw.to_string(), false);
    };
    let truncated = map
        .get("stop_reason")
        .and_then(Value::as_str)
        .is_some_and(|reason| reason == "max_tokens" || reason == "length");
    if let Some(structured) = map.get("structured_output") {
        return (structured.to_string(), truncated);
    }
    match map.get("result").and_then(Value::as_str) {
        Some(result) if map.contains_key("stop_reason") || map.contains_key("session_id") => {
            (result.to_string(), truncated)
        }
        _ => (raw.to_string(), false),
    }
}

/// Strip code fences and surrounding prose, returning the JSON text to parse.
///
/// Text that already starts as a JSON document is returned as-is, even when it
/// does not parse: a cut-off document must reach the parser intact so the
/// failure can be recognised as truncation rather than a schema mismatch.
pub fn extract_json(raw: &str) -> String {
    let cleaned = strip_code_fences(raw);
    if cleaned.starts_with('{') || cleaned.starts_with('[') {
        return cleaned;
    }
    for (idx, ch) in cleaned.char_indices() {
        if ch != '{' {
            continue;
        }
        let mut deserializer = serde_json::Deserializer::from_str(&cleaned[idx..]);
        if let Ok(value) = Value::deserialize(&mut deserializer) {
            return value.to_string();
        }
    }
    cleaned
}

fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines
        .first()
        .is_some_and(|first| first.trim_start().starts_with("```"))
    {
        lines.remove(0);
    }
    if lines
        .last()
        .is_some_and(|last| last.trim_start().starts_with("```"))
    {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}
