// ── Vault: Log Redaction ────────────────────────────────────────────────────
//
// Memory content never reaches the log as-is. Anything that must be shown is
// passed through `safe_log_preview`, which masks PII and truncates.

use log::warn;
use regex::Regex;
use std::sync::LazyLock;

static PII_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let patterns = [
        // SSN (US format: 123-45-6789)
        r"\b\d{3}-\d{2}-\d{4}\b",
        // Email address
        r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        // Credit card (4 groups of 4 digits)
        r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b",
        // Person name ("my name is ...")
        r"(?i)\bmy\s+name\s+is\s+\w+",
        // Credentials (password/secret/token/api key followed by value)
        r"(?i)(password|secret|token|api.?key)\s*(is|=|:)\s*\S+",
        // Phone number (US format)
        r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b",
    ];

    patterns
        .into_iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("[vault] Failed to compile PII pattern '{}': {}", pattern, e);
                None
            }
        })
        .collect()
});

/// Replace detected PII values with `[REDACTED]`.
pub fn redact_for_log(content: &str) -> String {
    let mut redacted = content.to_string();
    for regex in PII_PATTERNS.iter() {
        redacted = regex.replace_all(&redacted, "[REDACTED]").into_owned();
    }
    redacted
}

/// Redact, then cut to at most `max_chars` characters (never mid code point).
pub fn safe_log_preview(content: &str, max_chars: usize) -> String {
    let redacted = redact_for_log(content);
    match redacted.char_indices().nth(max_chars) {
        None => redacted,
        Some((cut, _)) => format!("{}...", &redacted[..cut]),
    }
}
