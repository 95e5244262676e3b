const MAX_BODY_PREVIEW: usize = 200;
const MAX_ERROR_LENGTH: usize = 500;

// Helpers for the loosely typed values the lounge API sends. Numbers arrive
// as strings most of the time, but not always.
pub mod youtube_parse {
    use serde_json::Value;

    /// Render a scalar JSON value as a string; anything else is empty.
    pub fn as_string(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => String::new(),
        }
    }

    pub fn parse_float(value: Option<&Value>) -> Option<f64> {
        let raw = as_string(value?);
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        raw.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    pub fn parse_int(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }
}

/// Trim and cut a response body so it can be carried inside an error.
pub fn truncate_body(body: &str) -> String {
    truncate_chars(body.trim(), MAX_BODY_PREVIEW)
}

/// Error text as persisted into the account's `last_error` column.
pub fn sanitize_error(err: &dyn std::error::Error) -> String {
    truncate_chars(err.to_string().trim(), MAX_ERROR_LENGTH)
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
