// Athena Engine — Encrypted Vector Store
//
// Record content is sealed (encryption.rs) before it reaches the BrainStore,
// together with any caller metadata as one JSON payload. Vectors, category,
// tags and weights stay in the clear so ranking never needs the key.
// Search ranks over every vector in the (optionally category-filtered)
// collection by cosine similarity and decrypts only the records it returns.
//
// Module layout:
//   encryption — MasterKey, FieldCipher (AES-256-CBC + HMAC-SHA256)
//   redaction  — PII-safe log previews

pub mod encryption;
pub mod redaction;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{
    MemoryFilter, MemoryRecord, MemoryStats, RecordMeta, ScoredMemory, ScoredMeta,
};
use crate::engine::locks::KeyedLocks;
use crate::engine::store::{BrainStore, CosineQuery};

pub use encryption::{FieldCipher, MasterKey};
pub use redaction::{redact_for_log, safe_log_preview};

/// What gets sealed for one record.
#[derive(Serialize)]
struct PayloadRef<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "no_metadata")]
    metadata: &'a BTreeMap<String, Value>,
}

fn no_metadata(metadata: &&BTreeMap<String, Value>) -> bool {
    metadata.is_empty()
}

#[derive(Deserialize)]
struct Payload {
    content: String,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

pub struct EncryptedVectorStore {
    db: Arc<BrainStore>,
    cipher: FieldCipher,
    dims: usize,
    write_locks: KeyedLocks<String>,
}

impl EncryptedVectorStore {
    /// Attach to the store. The first open records the dimensionality; any
    /// later open with a different one is refused.
    pub fn open(db: Arc<BrainStore>, cipher: FieldCipher, dims: usize) -> EngineResult<Self> {
        if dims == 0 {
            return Err(EngineError::Config("embedding dimensionality must be > 0".into()));
        }
        match db.stored_dimensions()? {
            Some(stored) if stored != dims => {
                return Err(EngineError::Config(format!(
                    "vault holds {stored}-dimensional vectors but {dims} were configured"
                )));
            }
            Some(_) => {}
            None => {
                db.record_dimensions(dims)?;
                info!("[vault] New collection, dimensionality fixed at {}", dims);
            }
        }
        Ok(EncryptedVectorStore {
            db,
            cipher,
            dims,
            write_locks: KeyedLocks::new(),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dims
    }

    pub fn db(&self) -> &Arc<BrainStore> {
        &self.db
    }

    fn check_vector(&self, vector: &[f32], what: &str) -> EngineResult<()> {
        if vector.len() != self.dims {
            return Err(EngineError::invalid(format!(
                "{what} has {} dimensions, expected {}",
                vector.len(),
                self.dims
            )));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(EngineError::invalid(format!("{what} contains non-finite values")));
        }
        Ok(())
    }

    // ── Writes ─────────────────────────────────────────────────────────

    /// Seal and persist a record. Nothing is written unless sealing succeeds.
    pub fn insert(&self, record: &MemoryRecord) -> EngineResult<String> {
        self.check_vector(&record.embedding, "embedding")?;
        let payload = serde_json::to_vec(&PayloadRef {
            content: &record.content,
            metadata: &record.metadata,
        })?;
        let sealed = self
            .cipher
            .seal(&payload, record.id.as_bytes())
            .map_err(|e| e.context("insert"))?;

        let slot = self.write_locks.slot(&record.id);
        let _guard = slot.lock();
        self.db
            .insert_memory_row(&record.meta(), &sealed, &record.embedding)
            .map_err(|e| e.context("insert"))?;
        debug!("[vault] Inserted {} ({})", record.id, record.category);
        Ok(record.id.clone())
    }

    /// Idempotent. Returns the removed record's metadata, if there was one.
    pub fn delete(&self, id: &str) -> EngineResult<Option<RecordMeta>> {
        let slot = self.write_locks.slot(&id.to_string());
        let _guard = slot.lock();
        let removed = self.db.delete_memory_row(id)?;
        if removed.is_some() {
            debug!("[vault] Deleted {}", id);
        }
        Ok(removed)
    }

    /// Raise a record's relevance weight and merge tags.
    pub fn reinforce(&self, id: &str, delta: f64, extra_tags: &[String]) -> EngineResult<RecordMeta> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(EngineError::invalid(format!("weight delta must be >= 0, got {delta}")));
        }
        let slot = self.write_locks.slot(&id.to_string());
        let _guard = slot.lock();
        self.db
            .reinforce_memory_row(id, delta, extra_tags, &Utc::now())?
            .ok_or_else(|| EngineError::not_found(format!("memory {id}")))
    }

    // ── Reads ──────────────────────────────────────────────────────────

    /// Fetch and decrypt one record. A record whose tag fails to verify is
    /// reported (and left in place); its content is never returned.
    pub fn get(&self, id: &str) -> EngineResult<MemoryRecord> {
        let row = self
            .db
            .memory_row(id)?
            .ok_or_else(|| EngineError::not_found(format!("memory {id}")))?;
        let payload = self.open_payload(id, &row.sealed)?;
        Ok(assemble(row.meta, payload, row.embedding))
    }

    fn open_payload(&self, id: &str, sealed: &[u8]) -> EngineResult<Payload> {
        self.cipher
            .open(sealed, id.as_bytes())
            .and_then(|plain| {
                serde_json::from_slice(&plain).map_err(|e| {
                    EngineError::Integrity(format!("sealed payload is not a record: {e}"))
                })
            })
            .map_err(|e| {
                if matches!(e, EngineError::Integrity(_)) {
                    error!("[vault] Integrity check failed for memory {}: {}", id, e);
                }
                e.context(id)
            })
    }

    /// Rank records against `query` without decrypting anything.
    pub fn nearest_metadata(
        &self,
        query: &[f32],
        k: usize,
        filter: &MemoryFilter,
    ) -> EngineResult<Vec<ScoredMeta>> {
        Ok(self
            .rank(query, k, filter)?
            .into_iter()
            .map(|(scored, _)| scored)
            .collect())
    }

    /// Up to `k` records by descending cosine similarity (ties: newest first).
    pub fn nearest_neighbors(
        &self,
        query: &[f32],
        k: usize,
        filter: &MemoryFilter,
    ) -> EngineResult<Vec<ScoredMemory>> {
        self.nearest_neighbors_above(query, k, filter, None)
    }

    /// `nearest_neighbors`, dropping hits scored below `floor` before any of
    /// them is decrypted. The floor never pulls in lower-ranked records.
    pub fn nearest_neighbors_above(
        &self,
        query: &[f32],
        k: usize,
        filter: &MemoryFilter,
        floor: Option<f64>,
    ) -> EngineResult<Vec<ScoredMemory>> {
        let ranked = self.rank(query, k, filter)?;
        let mut results = Vec::with_capacity(ranked.len());
        for (scored, embedding) in ranked {
            if floor.is_some_and(|f| scored.score < f) {
                continue;
            }
            // Deleted between ranking and fetch: skip rather than fail.
            let Some(sealed) = self.db.sealed_content(&scored.meta.id)? else {
                continue;
            };
            let payload = self.open_payload(&scored.meta.id, &sealed)?;
            results.push(ScoredMemory {
                record: assemble(scored.meta, payload, embedding),
                score: scored.score,
            });
        }
        Ok(results)
    }

    fn rank(
        &self,
        query: &[f32],
        k: usize,
        filter: &MemoryFilter,
    ) -> EngineResult<Vec<(ScoredMeta, Vec<f32>)>> {
        if k == 0 {
            return Err(EngineError::invalid("k must be >= 1"));
        }
        self.check_vector(query, "query vector")?;

        let cosine = CosineQuery::new(query);
        let mut scored: Vec<(ScoredMeta, Vec<f32>)> = self
            .db
            .scan_embeddings(filter.category.as_deref())?
            .into_iter()
            .filter(|(meta, _)| filter.matches(meta))
            .map(|(meta, embedding)| {
                let score = cosine.score(&embedding);
                (ScoredMeta { meta, score }, embedding)
            })
            .collect();

        scored.sort_by(|(a, _), (b, _)| rank_order(a, b));
        scored.truncate(k);
        Ok(scored)
    }

    // ── Retention ──────────────────────────────────────────────────────

    /// Multiply every relevance weight by `factor` ∈ (0, 1].
    pub fn decay_weights(&self, factor: f64) -> EngineResult<usize> {
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(EngineError::invalid(format!(
                "decay factor must be within (0, 1], got {factor}"
            )));
        }
        let touched = self.db.scale_relevance(factor)?;
        info!("[vault] Decayed {} memories by {}", touched, factor);
        Ok(touched)
    }

    /// Delete every record whose weight fell below `min_weight`.
    pub fn prune_below(&self, min_weight: f64) -> EngineResult<Vec<RecordMeta>> {
        if !min_weight.is_finite() {
            return Err(EngineError::invalid("prune floor must be finite"));
        }
        let pruned = self.db.delete_below_relevance(min_weight)?;
        if !pruned.is_empty() {
            info!("[vault] Pruned {} memories below weight {}", pruned.len(), min_weight);
        }
        Ok(pruned)
    }

    // ── Introspection ──────────────────────────────────────────────────

    pub fn count(&self) -> EngineResult<i64> {
        self.db.count_memories()
    }

    /// Metadata of every record, oldest first.
    pub fn list_metadata(&self) -> EngineResult<Vec<RecordMeta>> {
        self.db.list_memory_meta()
    }

    pub fn stats(&self) -> EngineResult<MemoryStats> {
        Ok(MemoryStats {
            total_memories: self.db.count_memories()?,
            categories: self.db.memory_category_counts()?,
            embedding_dims: self.dims,
        })
    }
}

/// Score descending, then newest first, then id for a total order.
fn rank_order(a: &ScoredMeta, b: &ScoredMeta) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.meta.created_at.cmp(&a.meta.created_at))
        .then_with(|| a.meta.id.cmp(&b.meta.id))
}

fn assemble(meta: RecordMeta, payload: Payload, embedding: Vec<f32>) -> MemoryRecord {
    MemoryRecord {
        id: meta.id,
        content: payload.content,
        embedding,
        category: meta.category,
        tags: meta.tags,
        emotion: meta.emotion,
        relevance: meta.relevance,
        created_at: meta.created_at,
        last_reinforced_at: meta.last_reinforced_at,
        metadata: payload.metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::EmotionTag;

    fn vault_with(db: Arc<BrainStore>, dims: usize) -> EngineResult<EncryptedVectorStore> {
        let key = MasterKey::from_bytes(&[0x42u8; 32])?;
        EncryptedVectorStore::open(db, FieldCipher::new(&key)?, dims)
    }

    fn vault() -> EncryptedVectorStore {
        vault_with(Arc::new(BrainStore::open_in_memory().unwrap()), 3).unwrap()
    }

    fn record(content: &str, v: [f32; 3], category: &str) -> MemoryRecord {
        MemoryRecord::new(content, v.to_vec(), category, vec![], None)
    }

    #[test]
    fn insert_get_roundtrip() {
        let vault = vault();
        let mut r = record("User prefers Python over JavaScript", [1.0, 0.0, 0.0], "preference");
        r.tags = vec!["language".into()];
        r.emotion = Some(EmotionTag::Satisfaction);
        let id = vault.insert(&r).unwrap();

        let back = vault.get(&id).unwrap();
        assert_eq!(back.content, r.content);
        assert_eq!(back.embedding, r.embedding);
        assert_eq!(back.tags, r.tags);
        assert_eq!(back.emotion, Some(EmotionTag::Satisfaction));
        assert!(back.metadata.is_empty());
    }

    #[test]
    fn metadata_is_sealed_and_returned() {
        let vault = vault();
        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), Value::from("chat-4711"));
        metadata.insert("turn".to_string(), Value::from(12));
        let r = record("likes dark roast", [0.0, 1.0, 0.0], "preference").with_metadata(metadata.clone());
        let id = vault.insert(&r).unwrap();

        assert_eq!(vault.get(&id).unwrap().metadata, metadata);
        let hits = vault.nearest_neighbors(&[0.0, 1.0, 0.0], 1, &MemoryFilter::default()).unwrap();
        assert_eq!(hits[0].record.metadata, metadata);

        let sealed = vault.db().sealed_content(&id).unwrap().unwrap();
        assert!(!sealed.windows(9).any(|w| w == b"chat-4711"));
    }

    #[test]
    fn verified_but_unparseable_payload_is_integrity_error() {
        let db = Arc::new(BrainStore::open_in_memory().unwrap());
        let vault = vault_with(db.clone(), 3).unwrap();
        let id = vault.insert(&record("x", [1.0, 0.0, 0.0], "fact")).unwrap();
        let key = MasterKey::from_bytes(&[0x42u8; 32]).unwrap();
        let forged = FieldCipher::new(&key).unwrap().seal(b"plain text", id.as_bytes()).unwrap();
        db.conn
            .lock()
            .execute(
                "UPDATE memories SET sealed = ?1 WHERE id = ?2",
                rusqlite::params![forged, id],
            )
            .unwrap();
        assert!(matches!(vault.get(&id), Err(EngineError::Integrity(_))));
    }

    #[test]
    fn content_is_not_stored_in_clear() {
        let vault = vault();
        let id = vault.insert(&record("secret plan alpha", [1.0, 0.0, 0.0], "fact")).unwrap();
        let sealed = vault.db().sealed_content(&id).unwrap().unwrap();
        assert!(!sealed.windows(5).any(|w| w == b"alpha"));
    }

    #[test]
    fn tampered_ciphertext_is_integrity_error_and_kept() {
        let vault = vault();
        let id = vault.insert(&record("hello", [1.0, 0.0, 0.0], "fact")).unwrap();
        {
            let conn = vault.db().conn.lock();
            let mut sealed: Vec<u8> = conn
                .query_row("SELECT sealed FROM memories WHERE id = ?1", [&id], |r| r.get(0))
                .unwrap();
            sealed[20] ^= 0x80;
            conn.execute(
                "UPDATE memories SET sealed = ?1 WHERE id = ?2",
                rusqlite::params![sealed, id],
            )
            .unwrap();
        }
        assert!(matches!(vault.get(&id), Err(EngineError::Integrity(_))));
        assert!(matches!(
            vault.nearest_neighbors(&[1.0, 0.0, 0.0], 1, &MemoryFilter::default()),
            Err(EngineError::Integrity(_))
        ));
        assert_eq!(vault.count().unwrap(), 1);
    }

    #[test]
    fn swapped_ciphertext_between_rows_fails() {
        let vault = vault();
        let a = vault.insert(&record("alpha", [1.0, 0.0, 0.0], "fact")).unwrap();
        let b = vault.insert(&record("beta", [0.0, 1.0, 0.0], "fact")).unwrap();
        {
            let conn = vault.db().conn.lock();
            conn.execute(
                "UPDATE memories SET sealed = (SELECT sealed FROM memories WHERE id = ?1) WHERE id = ?2",
                rusqlite::params![a, b],
            )
            .unwrap();
        }
        assert!(matches!(vault.get(&b), Err(EngineError::Integrity(_))));
    }

    #[test]
    fn get_missing_is_not_found() {
        assert!(matches!(vault().get("nope"), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn delete_is_idempotent() {
        let vault = vault();
        let id = vault.insert(&record("x", [1.0, 0.0, 0.0], "fact")).unwrap();
        assert!(vault.delete(&id).unwrap().is_some());
        assert!(vault.delete(&id).unwrap().is_none());
        assert!(matches!(vault.get(&id), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn neighbors_sorted_and_bounded() {
        let vault = vault();
        vault.insert(&record("near", [1.0, 0.1, 0.0], "fact")).unwrap();
        vault.insert(&record("mid", [1.0, 1.0, 0.0], "fact")).unwrap();
        vault.insert(&record("far", [0.0, 0.0, 1.0], "fact")).unwrap();

        let hits = vault
            .nearest_neighbors(&[1.0, 0.0, 0.0], 2, &MemoryFilter::default())
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.content, "near");
        assert_eq!(hits[1].record.content, "mid");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn ties_break_by_recency() {
        let vault = vault();
        let mut old = record("old", [1.0, 0.0, 0.0], "fact");
        old.created_at = Utc::now() - chrono::Duration::hours(1);
        vault.insert(&old).unwrap();
        vault.insert(&record("new", [1.0, 0.0, 0.0], "fact")).unwrap();

        let hits = vault
            .nearest_neighbors(&[1.0, 0.0, 0.0], 2, &MemoryFilter::default())
            .unwrap();
        assert_eq!(hits[0].record.content, "new");
        assert_eq!(hits[1].record.content, "old");
    }

    #[test]
    fn floor_drops_without_padding() {
        let vault = vault();
        vault.insert(&record("near", [1.0, 0.0, 0.0], "fact")).unwrap();
        vault.insert(&record("orthogonal", [0.0, 1.0, 0.0], "fact")).unwrap();
        let hits = vault
            .nearest_neighbors_above(&[1.0, 0.0, 0.0], 5, &MemoryFilter::default(), Some(0.3))
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn category_and_tag_prefilter() {
        let vault = vault();
        vault.insert(&record("a", [1.0, 0.0, 0.0], "fact")).unwrap();
        let mut tagged = record("b", [1.0, 0.0, 0.0], "preference");
        tagged.tags = vec!["lang".into()];
        vault.insert(&tagged).unwrap();

        let q = [1.0, 0.0, 0.0];
        let prefs = vault.nearest_metadata(&q, 10, &MemoryFilter::category("preference")).unwrap();
        assert_eq!(prefs.len(), 1);
        let lang = vault
            .nearest_metadata(&q, 10, &MemoryFilter::default().with_tag("lang"))
            .unwrap();
        assert_eq!(lang.len(), 1);
        assert_eq!(lang[0].meta.category, "preference");
    }

    #[test]
    fn argument_checks() {
        let vault = vault();
        let q = [1.0, 0.0, 0.0];
        assert!(matches!(
            vault.nearest_neighbors(&q, 0, &MemoryFilter::default()),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            vault.nearest_neighbors(&[1.0, 0.0], 1, &MemoryFilter::default()),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            vault.insert(&MemoryRecord::new("x", vec![1.0; 4], "fact", vec![], None)),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            vault.insert(&record("x", [f32::NAN, 0.0, 0.0], "fact")),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn dimension_guard_on_reopen() {
        let db = Arc::new(BrainStore::open_in_memory().unwrap());
        vault_with(db.clone(), 3).unwrap();
        assert!(vault_with(db.clone(), 3).is_ok());
        assert!(matches!(vault_with(db, 4), Err(EngineError::Config(_))));
    }

    #[test]
    fn reinforce_and_retention() {
        let vault = vault();
        let keep = vault.insert(&record("keep", [1.0, 0.0, 0.0], "fact")).unwrap();
        let drop = vault.insert(&record("drop", [0.0, 1.0, 0.0], "fact")).unwrap();

        let meta = vault.reinforce(&keep, 1.0, &["pinned".into()]).unwrap();
        assert!((meta.relevance - 2.0).abs() < 1e-12);
        assert!(matches!(vault.reinforce("nope", 0.1, &[]), Err(EngineError::NotFound(_))));

        assert_eq!(vault.decay_weights(0.5).unwrap(), 2);
        assert!(matches!(vault.decay_weights(0.0), Err(EngineError::InvalidArgument(_))));
        assert!(matches!(vault.decay_weights(1.5), Err(EngineError::InvalidArgument(_))));

        let pruned = vault.prune_below(0.75).unwrap();
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].id, drop);
        let stats = vault.stats().unwrap();
        assert_eq!(stats.total_memories, 1);
        assert_eq!(stats.categories, vec![("fact".to_string(), 1)]);
        assert_eq!(stats.embedding_dims, 3);
    }
}
