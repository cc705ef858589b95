// ── Athena Atoms: Constants ────────────────────────────────────────────────
// Named constants shared across layers. Defaults that a deployment may tune
// live in `types::BrainConfig`; the values below are their fallbacks.

// ── Key material ──────────────────────────────────────────────────────────
// Environment variable holding the base64-encoded 32-byte master key.
pub const DEFAULT_KEY_ENV: &str = "ATHENA_MEMORY_KEY";

// Keychain entry used when `VaultConfig.key_source = "keyring"`.
// Changing either value makes existing keys unreachable — treat as stable.
pub const KEYRING_SERVICE: &str = "athena-memory-vault";
pub const KEYRING_USER: &str = "field-encryption-key";

/// Master key length in bytes (AES-256).
pub const MASTER_KEY_LEN: usize = 32;

// ── Memory defaults ───────────────────────────────────────────────────────
pub const DEFAULT_CATEGORY: &str = "general";
pub const DEFAULT_EMBEDDING_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_EMBEDDING_DIMS: usize = 768;
pub const DEFAULT_SIMILARITY_FLOOR: f64 = 0.3;
pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.97;
pub const DEFAULT_EMBED_TIMEOUT_MS: u64 = 30_000;

/// Relevance weight assigned to a freshly stored record.
pub const INITIAL_RELEVANCE: f64 = 1.0;
/// Weight added each time a near-duplicate reinforces an existing record.
pub const DUPLICATE_REINFORCEMENT: f64 = 0.1;

/// Maximum memory content size in bytes (256 KB).
pub const MAX_MEMORY_CONTENT_BYTES: usize = 256 * 1024;
/// Maximum category / tag length in bytes.
pub const MAX_CATEGORY_LENGTH: usize = 64;
/// Maximum tags per record.
pub const MAX_TAGS: usize = 32;
/// Maximum size of a record's metadata, serialized as JSON.
pub const MAX_METADATA_BYTES: usize = 64 * 1024;

// ── Evolution defaults ────────────────────────────────────────────────────
pub const DEFAULT_RULE_THRESHOLD: u32 = 2;

// ── Personalization defaults ──────────────────────────────────────────────
pub const DEFAULT_LEARNING_RATE: f64 = 0.1;

// ── Logging ───────────────────────────────────────────────────────────────
/// Max characters of (redacted) content shown in a log line.
pub const LOG_PREVIEW_CHARS: usize = 48;
