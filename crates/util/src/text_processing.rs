//! Text helpers used when logging prompts, replies, and evaluation faults.

use once_cell::sync::Lazy;
use regex::Regex;

static SECRET_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([A-Z0-9_]*(?:KEY|TOKEN|SECRET|PASSWORD)\s*[=:]\s*)([^\s,;]+)").expect("valid secret regex")
});

static BEARER_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(authorization:\s*)(\S+(?:\s+\S+)?)").expect("valid bearer regex"));

/// Truncates `text` to at most `max_bytes` bytes without splitting a character.
pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

/// Single-line preview of `text` capped near `limit` bytes; whitespace runs collapse to one space.
pub fn preview(text: &str, limit: usize) -> String {
    let mut preview = String::new();
    for ch in text.chars() {
        if preview.len() >= limit {
            preview.push_str("...");
            break;
        }
        match ch {
            '\n' | '\r' | '\t' | ' ' => {
                if !preview.ends_with(' ') {
                    preview.push(' ');
                }
            }
            _ => preview.push(ch),
        }
    }
    preview.trim().to_string()
}

/// Masks values that look like credentials (`API_KEY=...`, `Authorization: Bearer ...`).
pub fn redact_sensitive(input: &str) -> String {
    let redacted = SECRET_ASSIGNMENT.replace_all(input, "${1}[REDACTED]");
    BEARER_HEADER.replace_all(&redacted, "${1}[REDACTED]").into_owned()
}
