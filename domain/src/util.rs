//! Shared utility functions.

/// Truncate a string to approximately `max_bytes` without splitting a UTF-8
/// character boundary.
///
/// Returns a sub-slice of the original string. If the string is shorter than
/// `max_bytes`, the entire string is returned unchanged.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Render a JSON value on one line, truncated to `max_bytes` with a marker
/// noting the original size.
pub fn compact_json(value: &serde_json::Value, max_bytes: usize) -> String {
    let rendered = value.to_string();
    if rendered.len() <= max_bytes {
        return rendered;
    }
    format!(
        "{}... ({} bytes)",
        truncate_str(&rendered, max_bytes),
        rendered.len()
    )
}
