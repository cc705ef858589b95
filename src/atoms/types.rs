// ── Athena Atoms: Memory & Configuration Types ─────────────────────────────
// Plain data types shared by the vault, the memory manager and the facade.
// No I/O here; parsing a TOML string is pure and lives next to the structs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::atoms::constants::*;
use crate::atoms::error::{EngineError, EngineResult};

// ═════════════════════════════════════════════════════════════════════════════
// Emotion Tag
// ═════════════════════════════════════════════════════════════════════════════

/// Closed set of affective tags a memory may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionTag {
    Satisfaction,
    Frustration,
    Surprise,
    Confusion,
    Pride,
}

impl EmotionTag {
    pub const ALL: [EmotionTag; 5] = [
        Self::Satisfaction,
        Self::Frustration,
        Self::Surprise,
        Self::Confusion,
        Self::Pride,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Satisfaction => "satisfaction",
            Self::Frustration => "frustration",
            Self::Surprise => "surprise",
            Self::Confusion => "confusion",
            Self::Pride => "pride",
        }
    }
}

impl std::fmt::Display for EmotionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmotionTag {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "satisfaction" => Ok(Self::Satisfaction),
            "frustration" => Ok(Self::Frustration),
            "surprise" => Ok(Self::Surprise),
            "confusion" => Ok(Self::Confusion),
            "pride" => Ok(Self::Pride),
            other => Err(EngineError::invalid(format!("unknown emotion tag: {other}"))),
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Memory Records
// ═════════════════════════════════════════════════════════════════════════════

/// A stored memory with its plaintext content. Only ever materialized in
/// memory for the duration of a request; at rest the content is sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    /// Fixed-dimension embedding; immutable once written.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<EmotionTag>,
    /// Relevance / decay weight.
    pub relevance: f64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reinforced_at: Option<DateTime<Utc>>,
    /// Caller-supplied key/value pairs. Sealed together with the content.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl MemoryRecord {
    /// Build a fresh record with a random id and the initial relevance weight.
    pub fn new(
        content: impl Into<String>,
        embedding: Vec<f32>,
        category: impl Into<String>,
        tags: Vec<String>,
        emotion: Option<EmotionTag>,
    ) -> Self {
        MemoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            embedding,
            category: category.into(),
            tags,
            emotion,
            relevance: INITIAL_RELEVANCE,
            created_at: Utc::now(),
            last_reinforced_at: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn meta(&self) -> RecordMeta {
        RecordMeta {
            id: self.id.clone(),
            category: self.category.clone(),
            tags: self.tags.clone(),
            emotion: self.emotion,
            relevance: self.relevance,
            created_at: self.created_at,
            last_reinforced_at: self.last_reinforced_at,
        }
    }
}

/// Everything about a record except its content and vector. Readable
/// without the key — ranking and profile maintenance only need this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: String,
    pub category: String,
    pub tags: Vec<String>,
    pub emotion: Option<EmotionTag>,
    pub relevance: f64,
    pub created_at: DateTime<Utc>,
    pub last_reinforced_at: Option<DateTime<Utc>>,
}

/// A search hit: decrypted record + cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub score: f64,
}

/// A ranking hit before decryption.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMeta {
    pub meta: RecordMeta,
    pub score: f64,
}

/// Prefilter applied before ranking. All present conditions must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFilter {
    pub category: Option<String>,
    /// Every listed tag must be present on the record.
    #[serde(default)]
    pub tags: Vec<String>,
    pub emotion: Option<EmotionTag>,
}

impl MemoryFilter {
    pub fn category(category: impl Into<String>) -> Self {
        MemoryFilter {
            category: Some(category.into()),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_emotion(mut self, emotion: EmotionTag) -> Self {
        self.emotion = Some(emotion);
        self
    }

    pub fn matches(&self, meta: &RecordMeta) -> bool {
        if let Some(ref cat) = self.category {
            if &meta.category != cat {
                return false;
            }
        }
        if let Some(emotion) = self.emotion {
            if meta.emotion != Some(emotion) {
                return false;
            }
        }
        self.tags.iter().all(|t| meta.tags.contains(t))
    }
}

/// Statistics about the memory collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_memories: i64,
    pub categories: Vec<(String, i64)>,
    pub embedding_dims: usize,
}

// ═════════════════════════════════════════════════════════════════════════════
// Requests
// ═════════════════════════════════════════════════════════════════════════════

/// Input to `MemoryManager::store`.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    /// Explicit emotion; when `None` the manager may infer one.
    pub emotion: Option<EmotionTag>,
    /// Overrides `MemoryConfig.embed_timeout_ms` for this call.
    pub timeout: Option<Duration>,
    /// Returned with the record on `get` and `search`; encrypted at rest.
    pub metadata: BTreeMap<String, Value>,
}

impl StoreRequest {
    pub fn new(content: impl Into<String>, category: impl Into<String>) -> Self {
        StoreRequest {
            content: content.into(),
            category: category.into(),
            tags: Vec::new(),
            emotion: None,
            timeout: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn emotion(mut self, emotion: EmotionTag) -> Self {
        self.emotion = Some(emotion);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Input to `MemoryManager::search`.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub filter: MemoryFilter,
    pub timeout: Option<Duration>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        SearchRequest {
            query: query.into(),
            limit,
            filter: MemoryFilter::default(),
            timeout: None,
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.filter.category = Some(category.into());
        self
    }

    pub fn filter(mut self, filter: MemoryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Configuration
// ═════════════════════════════════════════════════════════════════════════════

/// Top-level engine configuration. Every section has defaults, so an empty
/// TOML document is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    pub memory: MemoryConfig,
    pub vault: VaultConfig,
    pub evolution: EvolutionConfig,
    pub personalization: PersonalizationConfig,
}

impl BrainConfig {
    pub fn from_toml_str(raw: &str) -> EngineResult<Self> {
        let config: BrainConfig =
            toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break an invariant downstream.
    pub fn validate(&self) -> EngineResult<()> {
        let m = &self.memory;
        if m.embedding_dims == 0 {
            return Err(EngineError::Config("memory.embedding_dims must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&m.similarity_floor) {
            return Err(EngineError::Config(format!(
                "memory.similarity_floor must be within [0, 1], got {}",
                m.similarity_floor
            )));
        }
        if !(0.0..=1.0).contains(&m.duplicate_threshold) || m.duplicate_threshold == 0.0 {
            return Err(EngineError::Config(format!(
                "memory.duplicate_threshold must be within (0, 1], got {}",
                m.duplicate_threshold
            )));
        }
        if m.embed_timeout_ms == 0 {
            return Err(EngineError::Config("memory.embed_timeout_ms must be > 0".into()));
        }
        if self.evolution.rule_threshold == 0 {
            return Err(EngineError::Config("evolution.rule_threshold must be >= 1".into()));
        }
        let lr = self.personalization.learning_rate;
        if !(lr > 0.0 && lr < 1.0) {
            return Err(EngineError::Config(format!(
                "personalization.learning_rate must be within (0, 1), got {lr}"
            )));
        }
        Ok(())
    }
}

/// Memory configuration (embedding provider settings + recall tuning).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Base URL for embedding API (Ollama: http://localhost:11434)
    pub embedding_base_url: String,
    /// Embedding model name (e.g., "nomic-embed-text", "all-minilm")
    pub embedding_model: String,
    /// Embedding dimensions (e.g., 768 for nomic-embed-text, 384 for all-minilm)
    pub embedding_dims: usize,
    /// Minimum similarity for a search hit (0.0–1.0)
    pub similarity_floor: f64,
    /// Similarity at which a new memory is treated as a duplicate of its
    /// nearest neighbour in the same category.
    pub duplicate_threshold: f64,
    /// Default deadline for one embedding call.
    pub embed_timeout_ms: u64,
    /// Infer an emotion tag from content when the caller gives none.
    pub infer_emotion: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            embedding_base_url: DEFAULT_EMBEDDING_BASE_URL.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            embedding_dims: DEFAULT_EMBEDDING_DIMS,
            similarity_floor: DEFAULT_SIMILARITY_FLOOR,
            duplicate_threshold: DEFAULT_DUPLICATE_THRESHOLD,
            embed_timeout_ms: DEFAULT_EMBED_TIMEOUT_MS,
            infer_emotion: true,
        }
    }
}

impl MemoryConfig {
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }
}

/// Where the vault lives and where its key comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// SQLite file. `None` → platform data dir (see `engine::config`).
    pub db_path: Option<PathBuf>,
    pub key_source: KeySource,
}

/// External source of the 32-byte master key. The engine only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KeySource {
    /// Base64 key in an environment variable.
    Env { var: String },
    /// Base64 key in an OS keychain entry.
    Keyring { service: String, user: String },
}

impl Default for KeySource {
    fn default() -> Self {
        KeySource::Env {
            var: DEFAULT_KEY_ENV.into(),
        }
    }
}

impl KeySource {
    /// The engine's well-known OS keychain entry.
    pub fn os_keychain() -> Self {
        KeySource::Keyring {
            service: KEYRING_SERVICE.into(),
            user: KEYRING_USER.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Occurrences needed before a pattern gets a rule.
    pub rule_threshold: u32,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        EvolutionConfig {
            rule_threshold: DEFAULT_RULE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalizationConfig {
    /// EMA learning rate α.
    pub learning_rate: f64,
}

impl Default for PersonalizationConfig {
    fn default() -> Self {
        PersonalizationConfig {
            learning_rate: DEFAULT_LEARNING_RATE,
        }
    }
}
