//! Unicode-safe text utilities for subjects and previews.

/// Maximum subject length derived from a task description.
pub const MAX_SUBJECT_CHARS: usize = 120;

/// Truncate `text` to at most `max_chars` Unicode scalar values,
/// appending `suffix` if truncation occurred.
pub fn truncate_chars(text: &str, max_chars: usize, suffix: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut result = text[..byte_idx].to_string();
            result.push_str(suffix);
            result
        }
        None => text.to_string(),
    }
}

/// Derive a task subject from free-form text: the first line, trimmed,
/// sliced to at most [`MAX_SUBJECT_CHARS`] scalar values.
pub fn first_line_subject(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    match first_line.char_indices().nth(MAX_SUBJECT_CHARS) {
        Some((byte_idx, _)) => first_line[..byte_idx].to_string(),
        None => first_line.to_string(),
    }
}
