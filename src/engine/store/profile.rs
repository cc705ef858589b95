use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{ts_to_sql, BrainStore};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::evolution_types::ProfileSnapshot;

/// One logged profile update: where it came from and the signals it folded.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileEvent {
    pub seq: i64,
    /// `memory:<id>` or `rule:<pattern key>`.
    pub source: String,
    pub signals: Vec<(String, f64)>,
}

fn write_snapshot(conn: &Connection, snapshot: &ProfileSnapshot) -> EngineResult<()> {
    let json = serde_json::to_string(snapshot)?;
    let updated = snapshot
        .updated_at
        .map(|t| ts_to_sql(&t))
        .unwrap_or_default();
    conn.execute(
        "INSERT INTO profile (id, snapshot, updated_at) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET snapshot = excluded.snapshot, updated_at = excluded.updated_at",
        params![json, updated],
    )
    .map_err(EngineError::storage)?;
    Ok(())
}

fn insert_event(
    conn: &Connection,
    source: &str,
    signals: &[(String, f64)],
    at: &DateTime<Utc>,
) -> EngineResult<i64> {
    conn.execute(
        "INSERT INTO profile_events (source, recorded_at) VALUES (?1, ?2)",
        params![source, ts_to_sql(at)],
    )
    .map_err(EngineError::storage)?;
    let seq = conn.last_insert_rowid();
    let mut stmt = conn.prepare(
        "INSERT INTO profile_event_signals (event_seq, pos, dimension, signal) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (pos, (dimension, signal)) in signals.iter().enumerate() {
        stmt.execute(params![seq, pos as i64, dimension, signal])
            .map_err(EngineError::storage)?;
    }
    Ok(seq)
}

impl BrainStore {
    /// Persist the profile (single row, id = 1).
    pub fn save_profile(&self, snapshot: &ProfileSnapshot) -> EngineResult<()> {
        let conn = self.conn.lock();
        write_snapshot(&conn, snapshot)
    }

    pub fn load_profile(&self) -> EngineResult<Option<ProfileSnapshot>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row("SELECT snapshot FROM profile WHERE id = 1", [], |r| r.get(0))
            .optional()?;
        Ok(raw.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    /// Log one update and persist the snapshot it produced, atomically.
    /// Returns the event's sequence number.
    pub fn append_profile_event(
        &self,
        source: &str,
        signals: &[(String, f64)],
        next: &ProfileSnapshot,
        at: &DateTime<Utc>,
    ) -> EngineResult<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(EngineError::storage)?;
        let seq = insert_event(&tx, source, signals, at)?;
        write_snapshot(&tx, next)?;
        tx.commit().map_err(EngineError::storage)?;
        Ok(seq)
    }

    /// Append a batch of events without touching the snapshot (backfill).
    pub fn append_profile_events(&self, events: &[(String, Vec<(String, f64)>)]) -> EngineResult<usize> {
        let at = Utc::now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(EngineError::storage)?;
        for (source, signals) in events {
            insert_event(&tx, source, signals, &at)?;
        }
        tx.commit().map_err(EngineError::storage)?;
        Ok(events.len())
    }

    /// Delete every event logged for any of `sources`. Returns how many went.
    pub fn delete_profile_events(&self, sources: &[String]) -> EngineResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(EngineError::storage)?;
        let mut deleted = 0;
        for source in sources {
            tx.execute(
                "DELETE FROM profile_event_signals WHERE event_seq IN
                 (SELECT seq FROM profile_events WHERE source = ?1)",
                params![source],
            )
            .map_err(EngineError::storage)?;
            deleted += tx
                .execute("DELETE FROM profile_events WHERE source = ?1", params![source])
                .map_err(EngineError::storage)?;
        }
        tx.commit().map_err(EngineError::storage)?;
        Ok(deleted)
    }

    /// The whole log, oldest first, signals in their original order.
    pub fn profile_events(&self) -> EngineResult<Vec<ProfileEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT e.seq, e.source, s.dimension, s.signal
             FROM profile_events e
             LEFT JOIN profile_event_signals s ON s.event_seq = e.seq
             ORDER BY e.seq, s.pos",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<f64>>(3)?,
            ))
        })?;

        let mut events: Vec<ProfileEvent> = Vec::new();
        for row in rows {
            let (seq, source, dimension, signal) = row?;
            if events.last().map_or(true, |e| e.seq != seq) {
                events.push(ProfileEvent {
                    seq,
                    source,
                    signals: Vec::new(),
                });
            }
            if let (Some(dimension), Some(signal), Some(event)) = (dimension, signal, events.last_mut()) {
                event.signals.push((dimension, signal));
            }
        }
        Ok(events)
    }

    pub fn count_profile_events(&self) -> EngineResult<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM profile_events", [], |r| r.get(0))?;
        Ok(n as u64)
    }
}
