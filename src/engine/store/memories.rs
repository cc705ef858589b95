use chrono::{DateTime, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension};

use super::embedding::{bytes_to_f32_vec, f32_vec_to_bytes};
use super::{conversion_err, ts_from_sql, ts_to_sql, BrainStore};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{EmotionTag, RecordMeta};

/// Metadata columns, in the order `meta_from_row` expects them.
const META_COLS: &str = "id, category, tags, emotion, relevance, created_at, last_reinforced_at";

/// A raw memory row: metadata, sealed content and the plaintext vector.
#[derive(Debug, Clone)]
pub struct MemoryRow {
    pub meta: RecordMeta,
    pub sealed: Vec<u8>,
    pub embedding: Vec<f32>,
}

/// Map columns `META_COLS` starting at `offset` → RecordMeta.
fn meta_from_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<RecordMeta> {
    let tags_json: String = row.get(offset + 2)?;
    let tags: Vec<String> =
        serde_json::from_str(&tags_json).map_err(|e| conversion_err(offset + 2, e))?;
    let emotion: Option<String> = row.get(offset + 3)?;
    let emotion = emotion
        .map(|e| e.parse::<EmotionTag>())
        .transpose()
        .map_err(|e| conversion_err(offset + 3, e))?;
    let created_at: String = row.get(offset + 5)?;
    let reinforced: Option<String> = row.get(offset + 6)?;
    Ok(RecordMeta {
        id: row.get(offset)?,
        category: row.get(offset + 1)?,
        tags,
        emotion,
        relevance: row.get(offset + 4)?,
        created_at: ts_from_sql(offset + 5, &created_at)?,
        last_reinforced_at: reinforced
            .map(|r| ts_from_sql(offset + 6, &r))
            .transpose()?,
    })
}

impl BrainStore {
    // ── Memory CRUD ────────────────────────────────────────────────────

    /// Insert a new row. The id must be unused: rows are never replaced.
    pub fn insert_memory_row(
        &self,
        meta: &RecordMeta,
        sealed: &[u8],
        embedding: &[f32],
    ) -> EngineResult<()> {
        let tags = serde_json::to_string(&meta.tags)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO memories (id, sealed, embedding, category, tags, emotion, relevance, created_at, last_reinforced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                meta.id,
                sealed,
                f32_vec_to_bytes(embedding),
                meta.category,
                tags,
                meta.emotion.map(|e| e.as_str()),
                meta.relevance,
                ts_to_sql(&meta.created_at),
                meta.last_reinforced_at.as_ref().map(ts_to_sql),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref f, _) if f.code == ErrorCode::ConstraintViolation => {
                EngineError::invalid(format!("memory id {} already exists", meta.id))
            }
            other => EngineError::storage(other),
        })?;
        Ok(())
    }

    pub fn memory_row(&self, id: &str) -> EngineResult<Option<MemoryRow>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {META_COLS}, sealed, embedding FROM memories WHERE id = ?1");
        let row = conn
            .query_row(&sql, params![id], |row| {
                let meta = meta_from_row(row, 0)?;
                let sealed: Vec<u8> = row.get(7)?;
                let blob: Vec<u8> = row.get(8)?;
                Ok(MemoryRow {
                    meta,
                    sealed,
                    embedding: bytes_to_f32_vec(&blob),
                })
            })
            .optional()?;
        Ok(row)
    }

    pub fn memory_meta(&self, id: &str) -> EngineResult<Option<RecordMeta>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {META_COLS} FROM memories WHERE id = ?1");
        Ok(conn
            .query_row(&sql, params![id], |row| meta_from_row(row, 0))
            .optional()?)
    }

    /// Sealed content only — the lazy-decryption path of search.
    pub fn sealed_content(&self, id: &str) -> EngineResult<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT sealed FROM memories WHERE id = ?1",
                params![id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?)
    }

    /// Delete a row, returning its metadata if it existed.
    pub fn delete_memory_row(&self, id: &str) -> EngineResult<Option<RecordMeta>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(EngineError::storage)?;
        let sql = format!("SELECT {META_COLS} FROM memories WHERE id = ?1");
        let meta = tx
            .query_row(&sql, params![id], |row| meta_from_row(row, 0))
            .optional()?;
        if meta.is_some() {
            tx.execute("DELETE FROM memories WHERE id = ?1", params![id])
                .map_err(EngineError::storage)?;
        }
        tx.commit().map_err(EngineError::storage)?;
        Ok(meta)
    }

    /// Add `delta` to the relevance weight, merge tags, stamp the
    /// reinforcement time. Returns the updated metadata, `None` if absent.
    pub fn reinforce_memory_row(
        &self,
        id: &str,
        delta: f64,
        extra_tags: &[String],
        at: &DateTime<Utc>,
    ) -> EngineResult<Option<RecordMeta>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(EngineError::storage)?;
        let sql = format!("SELECT {META_COLS} FROM memories WHERE id = ?1");
        let Some(mut meta) = tx
            .query_row(&sql, params![id], |row| meta_from_row(row, 0))
            .optional()?
        else {
            return Ok(None);
        };

        for tag in extra_tags {
            if !meta.tags.contains(tag) {
                meta.tags.push(tag.clone());
            }
        }
        meta.relevance += delta.max(0.0);
        meta.last_reinforced_at = Some(*at);

        tx.execute(
            "UPDATE memories SET relevance = ?2, tags = ?3, last_reinforced_at = ?4 WHERE id = ?1",
            params![
                id,
                meta.relevance,
                serde_json::to_string(&meta.tags)?,
                ts_to_sql(at)
            ],
        )
        .map_err(EngineError::storage)?;
        tx.commit().map_err(EngineError::storage)?;
        Ok(Some(meta))
    }

    /// Every (metadata, vector) pair, optionally restricted to one category.
    /// The sealed column is never read here.
    pub fn scan_embeddings(&self, category: Option<&str>) -> EngineResult<Vec<(RecordMeta, Vec<f32>)>> {
        let conn = self.conn.lock();
        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(RecordMeta, Vec<f32>)> {
            let meta = meta_from_row(row, 0)?;
            let blob: Vec<u8> = row.get(7)?;
            Ok((meta, bytes_to_f32_vec(&blob)))
        };
        let rows = match category {
            Some(cat) => {
                let sql = format!("SELECT {META_COLS}, embedding FROM memories WHERE category = ?1");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![cat], map)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let sql = format!("SELECT {META_COLS}, embedding FROM memories");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], map)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    }

    /// All metadata, oldest first.
    pub fn list_memory_meta(&self) -> EngineResult<Vec<RecordMeta>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {META_COLS} FROM memories ORDER BY created_at ASC, id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| meta_from_row(row, 0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_memories(&self) -> EngineResult<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?)
    }

    pub fn memory_category_counts(&self) -> EngineResult<Vec<(String, i64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT category, COUNT(*) FROM memories GROUP BY category ORDER BY COUNT(*) DESC, category ASC",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Multiply every relevance weight by `factor`. Returns rows touched.
    pub fn scale_relevance(&self, factor: f64) -> EngineResult<usize> {
        let conn = self.conn.lock();
        conn.execute("UPDATE memories SET relevance = relevance * ?1", params![factor])
            .map_err(EngineError::storage)
    }

    /// Delete every row whose weight is below `min`, returning their metadata.
    pub fn delete_below_relevance(&self, min: f64) -> EngineResult<Vec<RecordMeta>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(EngineError::storage)?;
        let doomed = {
            let sql = format!("SELECT {META_COLS} FROM memories WHERE relevance < ?1");
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params![min], |row| meta_from_row(row, 0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute("DELETE FROM memories WHERE relevance < ?1", params![min])
            .map_err(EngineError::storage)?;
        tx.commit().map_err(EngineError::storage)?;
        Ok(doomed)
    }

    // ── Collection metadata ────────────────────────────────────────────

    /// Embedding dimensionality recorded for this vault, if any.
    pub fn stored_dimensions(&self) -> EngineResult<Option<usize>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM vault_meta WHERE key = 'embedding_dims'",
                [],
                |r| r.get(0),
            )
            .optional()?;
        raw.map(|v| {
            v.parse::<usize>()
                .map_err(|e| EngineError::Config(format!("corrupt embedding_dims '{v}': {e}")))
        })
        .transpose()
    }

    pub fn record_dimensions(&self, dims: usize) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO vault_meta (key, value) VALUES ('embedding_dims', ?1)",
            params![dims.to_string()],
        )
        .map_err(EngineError::storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str, category: &str) -> RecordMeta {
        RecordMeta {
            id: id.into(),
            category: category.into(),
            tags: vec!["t1".into()],
            emotion: Some(EmotionTag::Pride),
            relevance: 1.0,
            created_at: Utc::now(),
            last_reinforced_at: None,
        }
    }

    #[test]
    fn insert_read_delete_row() {
        let store = BrainStore::open_in_memory().unwrap();
        let m = meta("a", "fact");
        store.insert_memory_row(&m, b"sealed", &[1.0, 2.0]).unwrap();

        let row = store.memory_row("a").unwrap().unwrap();
        assert_eq!(row.sealed, b"sealed");
        assert_eq!(row.embedding, vec![1.0, 2.0]);
        assert_eq!(row.meta.emotion, Some(EmotionTag::Pride));
        assert_eq!(row.meta.tags, vec!["t1".to_string()]);

        let removed = store.delete_memory_row("a").unwrap();
        assert_eq!(removed.map(|m| m.id), Some("a".to_string()));
        assert!(store.delete_memory_row("a").unwrap().is_none());
        assert!(store.memory_row("a").unwrap().is_none());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let store = BrainStore::open_in_memory().unwrap();
        let m = meta("a", "fact");
        store.insert_memory_row(&m, b"x", &[1.0]).unwrap();
        let err = store.insert_memory_row(&m, b"y", &[1.0]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn reinforce_merges_tags_and_bumps_weight() {
        let store = BrainStore::open_in_memory().unwrap();
        store.insert_memory_row(&meta("a", "fact"), b"x", &[1.0]).unwrap();
        let at = Utc::now();
        let updated = store
            .reinforce_memory_row("a", 0.5, &["t1".into(), "t2".into()], &at)
            .unwrap()
            .unwrap();
        assert!((updated.relevance - 1.5).abs() < 1e-12);
        assert_eq!(updated.tags, vec!["t1".to_string(), "t2".to_string()]);
        assert!(updated.last_reinforced_at.is_some());
        assert!(store.reinforce_memory_row("zz", 0.5, &[], &at).unwrap().is_none());
    }

    #[test]
    fn scan_filters_by_category() {
        let store = BrainStore::open_in_memory().unwrap();
        store.insert_memory_row(&meta("a", "fact"), b"x", &[1.0]).unwrap();
        store.insert_memory_row(&meta("b", "preference"), b"x", &[1.0]).unwrap();
        assert_eq!(store.scan_embeddings(None).unwrap().len(), 2);
        let prefs = store.scan_embeddings(Some("preference")).unwrap();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].0.id, "b");
    }

    #[test]
    fn retention_helpers() {
        let store = BrainStore::open_in_memory().unwrap();
        store.insert_memory_row(&meta("a", "fact"), b"x", &[1.0]).unwrap();
        let mut heavy = meta("b", "fact");
        heavy.relevance = 4.0;
        store.insert_memory_row(&heavy, b"x", &[1.0]).unwrap();

        assert_eq!(store.scale_relevance(0.5).unwrap(), 2);
        let pruned = store.delete_below_relevance(1.0).unwrap();
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].id, "a");
        assert_eq!(store.count_memories().unwrap(), 1);
    }

    #[test]
    fn dimensions_are_recorded() {
        let store = BrainStore::open_in_memory().unwrap();
        assert_eq!(store.stored_dimensions().unwrap(), None);
        store.record_dimensions(384).unwrap();
        assert_eq!(store.stored_dimensions().unwrap(), Some(384));
    }
}
