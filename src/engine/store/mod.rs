// Athena Engine — Brain Store
// Durable state in SQLite via rusqlite: memory rows (sealed content +
// plaintext vectors), the mistake audit trail, rules and the profile cache.
//
// Module layout:
//   schema     — tables + migrations
//   embedding  — f32 BLOB codec, cosine similarity
//   memories   — memory row CRUD + vector scan
//   mistakes   — pattern/solution ledger, atomic track transaction
//   rules      — rule rows
//   profile    — personalization snapshot + the event log it replays

use crate::atoms::error::EngineResult;
use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

pub(crate) mod embedding;
mod memories;
mod mistakes;
mod profile;
mod rules;
mod schema;

pub use embedding::{bytes_to_f32_vec, cosine_similarity, f32_vec_to_bytes, CosineQuery};
pub use memories::MemoryRow;
pub use profile::ProfileEvent;

/// Thread-safe database wrapper.
///
/// The mutex is held for a single statement or transaction at a time; logical
/// serialization (per id, per pattern key) happens one layer up.
pub struct BrainStore {
    /// The SQLite connection, protected by a Mutex.
    /// `pub` so tests can reach the raw rows (e.g. to corrupt ciphertext).
    pub conn: Mutex<Connection>,
}

impl BrainStore {
    /// Open (or create) the vault database and initialize tables.
    pub fn open(path: &Path) -> EngineResult<Self> {
        info!("[store] Opening brain store at {:?}", path);
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        // Freed pages are zeroed so forgotten memories do not linger on disk.
        conn.execute_batch("PRAGMA secure_delete = ON;").ok();
        conn.execute_batch("PRAGMA foreign_keys = ON;").ok();

        Self::init(conn)
    }

    /// Private in-memory database (tests, ephemeral sessions).
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;").ok();
        Self::init(conn)
    }

    fn init(conn: Connection) -> EngineResult<Self> {
        schema::run_migrations(&conn)?;
        Ok(BrainStore {
            conn: Mutex::new(conn),
        })
    }
}

// ── Row helpers ────────────────────────────────────────────────────────────

/// Timestamps are stored as RFC 3339 UTC with microseconds so that text
/// order equals chronological order.
pub(crate) fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_from_sql(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

pub(crate) fn conversion_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_roundtrip_and_sort_as_text() {
        let a = Utc::now();
        let b = a + chrono::Duration::microseconds(3);
        let (sa, sb) = (ts_to_sql(&a), ts_to_sql(&b));
        assert!(sa < sb);
        let back = ts_from_sql(0, &sa).unwrap();
        assert_eq!(back.timestamp_micros(), a.timestamp_micros());
    }

    #[test]
    fn bad_timestamp_is_a_conversion_error() {
        assert!(matches!(
            ts_from_sql(3, "yesterday"),
            Err(rusqlite::Error::FromSqlConversionFailure(3, _, _))
        ));
    }

    #[test]
    fn open_in_memory_creates_schema() {
        let store = BrainStore::open_in_memory().unwrap();
        let conn = store.conn.lock();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('memories', 'mistake_patterns', 'mistake_solutions', 'rules', 'profile',
                              'profile_events', 'profile_event_signals', 'vault_meta')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 8);
    }
}
