use serde_json::Value;

/// Try to pull a JSON object out of text that may wrap it in markdown code
/// fences. Returns None when nothing parses.
pub fn extract_json_from_text(text: &str) -> Option<Value> {
    let text = text.trim();

    let candidate = if let Some(start) = text.find("```json") {
        fenced_body(text, start + 7)
    } else if let Some(start) = text.find("```") {
        fenced_body(text, start + 3)
    } else {
        text
    };

    serde_json::from_str(candidate).ok().filter(Value::is_object)
}

fn fenced_body(text: &str, body_start: usize) -> &str {
    match text[body_start..].find("```") {
        Some(end) => text[body_start..body_start + end].trim(),
        None => text[body_start..].trim(),
    }
}
