// Athena Engine — Schema & Migrations
// Idempotent: every statement is CREATE … IF NOT EXISTS, so running the
// migrations on an existing vault is a no-op.

use crate::atoms::error::EngineResult;
use rusqlite::Connection;

pub(crate) fn run_migrations(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS vault_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Content is sealed (AES-256-CBC + HMAC-SHA256); vectors stay plaintext
        -- so ranking never needs the key.
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            sealed BLOB NOT NULL,
            embedding BLOB NOT NULL,
            category TEXT NOT NULL DEFAULT 'general',
            tags TEXT NOT NULL DEFAULT '[]',
            emotion TEXT,
            relevance REAL NOT NULL DEFAULT 1.0,
            created_at TEXT NOT NULL,
            last_reinforced_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_memories_category
            ON memories(category);
        CREATE INDEX IF NOT EXISTS idx_memories_created
            ON memories(created_at);

        CREATE TABLE IF NOT EXISTS mistake_patterns (
            key TEXT PRIMARY KEY,
            original TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'general',
            occurrences INTEGER NOT NULL DEFAULT 0,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS mistake_solutions (
            pattern_key TEXT NOT NULL REFERENCES mistake_patterns(key),
            seq INTEGER NOT NULL,
            solution TEXT NOT NULL,
            context TEXT,
            recorded_at TEXT NOT NULL,
            PRIMARY KEY (pattern_key, seq)
        );

        -- At most one rule per pattern key: the key is the primary key.
        CREATE TABLE IF NOT EXISTS rules (
            pattern_key TEXT PRIMARY KEY REFERENCES mistake_patterns(key),
            category TEXT NOT NULL DEFAULT 'general',
            text TEXT NOT NULL,
            confidence REAL NOT NULL,
            evidence_count INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_rules_status ON rules(status);

        CREATE TABLE IF NOT EXISTS profile (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            snapshot TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Every signal folded into the profile, in commit order. The profile
        -- snapshot is a replay of this log; forgetting a memory or retiring a
        -- rule deletes its events and replays the rest.
        CREATE TABLE IF NOT EXISTS profile_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_profile_events_source
            ON profile_events(source);

        -- REAL keeps the exact f64, so a replay folds bit-identical signals.
        CREATE TABLE IF NOT EXISTS profile_event_signals (
            event_seq INTEGER NOT NULL REFERENCES profile_events(seq) ON DELETE CASCADE,
            pos INTEGER NOT NULL,
            dimension TEXT NOT NULL,
            signal REAL NOT NULL,
            PRIMARY KEY (event_seq, pos)
        );
    ",
    )?;
    Ok(())
}
