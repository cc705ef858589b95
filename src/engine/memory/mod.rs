// Athena Engine — Memory Manager
//
// Orchestrates the memory lifecycle on top of the encrypted vector store:
//   store  — validate → embed (bounded) → near-duplicate check → insert/reinforce
//   search — embed (bounded) → rank → similarity floor → decrypt hits
//   forget — delete → drop its profile events and replay the rest
//
// Embedding happens before any lock is taken. The duplicate check and the
// insert run under a per-category lock, so two identical concurrent stores
// cannot both insert. Insert and profile update sit inside the profile gate's
// shared side, so a forget or retention pass never lands between them.
//
// Module layout:
//   embedding — EmbeddingProvider trait, HTTP client, timeout wrapper
//   hashing   — deterministic offline embedder
//   emotion   — lexicon-based emotion tag inference

pub mod embedding;
pub mod emotion;
pub mod hashing;

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;

use crate::atoms::constants::*;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{
    MemoryConfig, MemoryFilter, MemoryRecord, MemoryStats, RecordMeta, ScoredMemory,
    SearchRequest, StoreRequest,
};
use crate::engine::locks::KeyedLocks;
use crate::engine::personalization::{memory_source, PersonalizationProfile};
use crate::engine::vault::{safe_log_preview, EncryptedVectorStore};

pub use embedding::{embed_with_timeout, EmbeddingClient, EmbeddingProvider};
pub use emotion::detect_emotion;
pub use hashing::HashingEmbedder;

/// What `store` did with the content.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome {
    Inserted(String),
    /// Near-identical to an existing record, which was reinforced instead.
    Reinforced { id: String, similarity: f64 },
}

impl StoreOutcome {
    pub fn id(&self) -> &str {
        match self {
            StoreOutcome::Inserted(id) => id,
            StoreOutcome::Reinforced { id, .. } => id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreOutcome::Reinforced { .. })
    }
}

pub struct MemoryManager {
    vault: Arc<EncryptedVectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    profile: Arc<PersonalizationProfile>,
    config: MemoryConfig,
    category_locks: KeyedLocks<String>,
}

impl MemoryManager {
    pub fn new(
        vault: Arc<EncryptedVectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        profile: Arc<PersonalizationProfile>,
        config: MemoryConfig,
    ) -> EngineResult<Self> {
        if embedder.dimensions() != vault.dimensions() {
            return Err(EngineError::Config(format!(
                "embedding model '{}' produces {} dimensions but the vault holds {}",
                embedder.model_name(),
                embedder.dimensions(),
                vault.dimensions()
            )));
        }
        Ok(MemoryManager {
            vault,
            embedder,
            profile,
            config,
            category_locks: KeyedLocks::new(),
        })
    }

    pub fn vault(&self) -> &Arc<EncryptedVectorStore> {
        &self.vault
    }

    // ── Store ──────────────────────────────────────────────────────────

    pub async fn store(&self, request: StoreRequest) -> EngineResult<StoreOutcome> {
        let StoreRequest {
            content,
            category,
            tags,
            emotion,
            timeout,
            metadata,
        } = request;

        let category = normalize_category(&category);
        validate_memory_input(&content, &category)?;
        validate_metadata(&metadata)?;
        let tags = normalize_tags(&tags)?;
        let emotion = emotion.or_else(|| {
            if self.config.infer_emotion {
                detect_emotion(&content)
            } else {
                None
            }
        });

        let timeout = timeout.unwrap_or_else(|| self.config.embed_timeout());
        let embedding = embed_with_timeout(self.embedder.as_ref(), &content, timeout)
            .await
            .map_err(|e| e.context("store"))?;

        let record =
            MemoryRecord::new(content, embedding, category, tags, emotion).with_metadata(metadata);
        let outcome = {
            let _gate = self.profile.observing();
            let outcome = self.commit_store(&record)?;
            if let StoreOutcome::Inserted(_) = outcome {
                self.profile.update_from_memory(&record.meta());
            }
            outcome
        };

        match outcome {
            StoreOutcome::Inserted(ref id) => {
                info!(
                    "[memory] Stored {} [{}] \"{}\"",
                    id,
                    record.category,
                    safe_log_preview(&record.content, LOG_PREVIEW_CHARS)
                );
            }
            StoreOutcome::Reinforced { ref id, similarity } => {
                info!(
                    "[memory] Near-duplicate of {} (similarity {:.3}) — reinforced",
                    id, similarity
                );
            }
        }
        Ok(outcome)
    }

    /// Duplicate check + insert under the category lock. Synchronous so no
    /// lock is ever held across an await. A reinforced record keeps its own
    /// content and metadata.
    fn commit_store(&self, record: &MemoryRecord) -> EngineResult<StoreOutcome> {
        let slot = self.category_locks.slot(&record.category);
        let _guard = slot.lock();

        let nearest = self
            .vault
            .nearest_metadata(&record.embedding, 1, &MemoryFilter::category(&record.category))
            .map_err(|e| e.context("store"))?;
        if let Some(top) = nearest.into_iter().next() {
            if top.score >= self.config.duplicate_threshold {
                let meta = self
                    .vault
                    .reinforce(&top.meta.id, DUPLICATE_REINFORCEMENT, &record.tags)
                    .map_err(|e| e.context("store"))?;
                return Ok(StoreOutcome::Reinforced {
                    id: meta.id,
                    similarity: top.score,
                });
            }
        }

        let id = self.vault.insert(record).map_err(|e| e.context("store"))?;
        Ok(StoreOutcome::Inserted(id))
    }

    // ── Search ─────────────────────────────────────────────────────────

    /// Up to `limit` memories at or above the similarity floor, best first.
    /// Fewer (or none) is a normal result.
    pub async fn search(&self, request: SearchRequest) -> EngineResult<Vec<ScoredMemory>> {
        if request.limit == 0 {
            return Err(EngineError::invalid("search limit must be >= 1"));
        }
        if request.query.trim().is_empty() {
            return Err(EngineError::invalid("search query cannot be empty"));
        }
        let mut filter = request.filter;
        filter.category = filter
            .category
            .as_deref()
            .map(normalize_category);
        filter.tags = normalize_tags(&filter.tags)?;

        let timeout = request.timeout.unwrap_or_else(|| self.config.embed_timeout());
        let query = embed_with_timeout(self.embedder.as_ref(), &request.query, timeout)
            .await
            .map_err(|e| e.context("search"))?;

        let hits = self
            .vault
            .nearest_neighbors_above(&query, request.limit, &filter, Some(self.config.similarity_floor))
            .map_err(|e| e.context("search"))?;
        debug!(
            "[memory] Search \"{}\" → {} hit(s)",
            safe_log_preview(&request.query, LOG_PREVIEW_CHARS),
            hits.len()
        );
        Ok(hits)
    }

    // ── Read / forget / retention ──────────────────────────────────────

    pub fn get(&self, id: &str) -> EngineResult<MemoryRecord> {
        self.vault.get(id).map_err(|e| e.context("get"))
    }

    /// Delete a memory and drop its contribution to the profile. Returns
    /// `false` if it did not exist.
    pub fn forget(&self, id: &str) -> EngineResult<bool> {
        let _gate = self.profile.forgetting();
        let Some(meta) = self.vault.delete(id).map_err(|e| e.context("forget"))? else {
            return Ok(false);
        };
        info!("[memory] Forgot {} [{}]", meta.id, meta.category);
        if let Err(e) = self.profile.drop_sources(&[memory_source(&meta.id)]) {
            warn!("[memory] Profile rebuild after forget failed: {}", e);
        }
        Ok(true)
    }

    /// Explicit retention pass: decay every weight by `decay_factor`, then
    /// delete records below `min_weight`. Returns the pruned records.
    pub fn apply_retention(&self, decay_factor: f64, min_weight: f64) -> EngineResult<Vec<RecordMeta>> {
        let _gate = self.profile.forgetting();
        self.vault
            .decay_weights(decay_factor)
            .map_err(|e| e.context("apply_retention"))?;
        let pruned = self
            .vault
            .prune_below(min_weight)
            .map_err(|e| e.context("apply_retention"))?;
        if !pruned.is_empty() {
            let sources: Vec<String> = pruned.iter().map(|m| memory_source(&m.id)).collect();
            if let Err(e) = self.profile.drop_sources(&sources) {
                warn!("[memory] Profile rebuild after retention failed: {}", e);
            }
        }
        Ok(pruned)
    }

    pub fn stats(&self) -> EngineResult<MemoryStats> {
        self.vault.stats()
    }
}

// ── Input validation ───────────────────────────────────────────────────────

/// Validate memory content before storage.
pub fn validate_memory_input(content: &str, category: &str) -> EngineResult<()> {
    if content.trim().is_empty() {
        return Err(EngineError::invalid("memory content cannot be empty"));
    }
    if content.len() > MAX_MEMORY_CONTENT_BYTES {
        return Err(EngineError::invalid(format!(
            "memory content exceeds maximum size ({} bytes > {} bytes)",
            content.len(),
            MAX_MEMORY_CONTENT_BYTES
        )));
    }
    if category.len() > MAX_CATEGORY_LENGTH {
        return Err(EngineError::invalid(format!(
            "category exceeds maximum length ({} > {})",
            category.len(),
            MAX_CATEGORY_LENGTH
        )));
    }
    if content.contains('\0') || category.contains('\0') {
        return Err(EngineError::invalid(
            "memory content/category must not contain null bytes",
        ));
    }
    Ok(())
}

/// Keys must be non-blank; the whole map must fit `MAX_METADATA_BYTES`
/// once serialized.
pub fn validate_metadata(metadata: &BTreeMap<String, Value>) -> EngineResult<()> {
    if metadata.keys().any(|k| k.trim().is_empty()) {
        return Err(EngineError::invalid("metadata keys cannot be blank"));
    }
    let size = serde_json::to_vec(metadata)?.len();
    if size > MAX_METADATA_BYTES {
        return Err(EngineError::invalid(format!(
            "metadata exceeds maximum size ({} bytes > {} bytes)",
            size, MAX_METADATA_BYTES
        )));
    }
    Ok(())
}

/// Trim + lowercase; blank → the default category.
pub fn normalize_category(category: &str) -> String {
    let c = category.trim().to_lowercase();
    if c.is_empty() {
        DEFAULT_CATEGORY.to_string()
    } else {
        c
    }
}

/// Trim + lowercase, drop blanks and repeats (first occurrence wins).
pub fn normalize_tags(tags: &[String]) -> EngineResult<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let t = tag.trim().to_lowercase();
        if t.is_empty() || out.contains(&t) {
            continue;
        }
        if t.contains('\0') {
            return Err(EngineError::invalid("tags must not contain null bytes"));
        }
        out.push(t);
    }
    if out.len() > MAX_TAGS {
        return Err(EngineError::invalid(format!(
            "too many tags ({} > {})",
            out.len(),
            MAX_TAGS
        )));
    }
    Ok(out)
}
