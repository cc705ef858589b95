// ── Athena Atoms: Error Types ──────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • One variant per failure class callers must tell apart (argument misuse,
//     missing record, tampering, key problems, embedding gateway, storage).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • `context()` enriches the message but never changes the variant, so upper
//     layers can add the operation name without hiding the failure class.
//   • No variant carries key material or raw memory content in its message.

use std::time::Duration;
use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Caller misuse: empty content, k = 0, wrong vector length, …
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No record / pattern / rule with that id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authentication tag did not verify — the stored ciphertext was tampered
    /// with or corrupted. The record stays in the store for inspection.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Encryption key missing or invalid, or the cipher itself failed.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Embedding gateway unreachable or returned an unusable response.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Embedding gateway did not answer within the caller's deadline.
    #[error("Embedding timed out after {}ms", .0.as_millis())]
    EmbeddingTimeout(Duration),

    /// Persistence-layer write failure. Safe to retry.
    #[error("Storage write failed: {0}")]
    StorageWrite(String),

    /// SQLite / rusqlite failure on a read path.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine configuration is invalid or inconsistent with stored data.
    #[error("Configuration error: {0}")]
    Config(String),

    /// OS keychain / credential store failure.
    #[error("Keyring error: {0}")]
    Keyring(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Wrap a write-path database failure as a retryable storage error.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::StorageWrite(err.to_string())
    }

    /// Prefix the message with the operation that failed. The variant is kept,
    /// so `matches!(e, EngineError::Integrity(_))` still holds after wrapping.
    /// Variants wrapping foreign error types are returned unchanged.
    pub fn context(self, operation: &str) -> Self {
        match self {
            Self::InvalidArgument(m) => Self::InvalidArgument(format!("{operation}: {m}")),
            Self::NotFound(m) => Self::NotFound(format!("{operation}: {m}")),
            Self::Integrity(m) => Self::Integrity(format!("{operation}: {m}")),
            Self::Encryption(m) => Self::Encryption(format!("{operation}: {m}")),
            Self::EmbeddingUnavailable(m) => {
                Self::EmbeddingUnavailable(format!("{operation}: {m}"))
            }
            Self::StorageWrite(m) => Self::StorageWrite(format!("{operation}: {m}")),
            Self::Config(m) => Self::Config(format!("{operation}: {m}")),
            Self::Keyring(m) => Self::Keyring(format!("{operation}: {m}")),
            other => other,
        }
    }

    /// Transient failures a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable(_)
                | Self::EmbeddingTimeout(_)
                | Self::StorageWrite(_)
                | Self::Network(_)
        )
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations return this type.
pub type EngineResult<T> = Result<T, EngineError>;

// ── Conversion: EngineError → String ──────────────────────────────────────
// Lets host integration layers with `Result<T, String>` boundaries call
// `.map_err(String::from)` directly.

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_variant() {
        let err = EngineError::Integrity("tag mismatch".into()).context("get");
        assert!(matches!(err, EngineError::Integrity(ref m) if m == "get: tag mismatch"));
    }

    #[test]
    fn retryable_classes() {
        assert!(EngineError::EmbeddingTimeout(Duration::from_millis(5)).is_retryable());
        assert!(EngineError::StorageWrite("disk full".into()).is_retryable());
        assert!(!EngineError::invalid("k must be >= 1").is_retryable());
        assert!(!EngineError::Integrity("x".into()).is_retryable());
    }

    #[test]
    fn timeout_message_reports_millis() {
        let err = EngineError::EmbeddingTimeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Embedding timed out after 1500ms");
    }
}
