use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{conversion_err, ts_from_sql, ts_to_sql, BrainStore};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::evolution_types::{Rule, RuleStatus};

const RULE_COLS: &str =
    "pattern_key, category, text, confidence, evidence_count, version, status, created_at, updated_at";

fn rule_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Rule> {
    let status: String = row.get(6)?;
    let created: String = row.get(7)?;
    let updated: String = row.get(8)?;
    Ok(Rule {
        pattern_key: row.get(0)?,
        category: row.get(1)?,
        text: row.get(2)?,
        confidence: row.get(3)?,
        evidence_count: row.get(4)?,
        version: row.get(5)?,
        status: status.parse::<RuleStatus>().map_err(|e| conversion_err(6, e))?,
        created_at: ts_from_sql(7, &created)?,
        updated_at: ts_from_sql(8, &updated)?,
    })
}

pub(super) fn load_rule(conn: &Connection, key: &str) -> EngineResult<Option<Rule>> {
    let sql = format!("SELECT {RULE_COLS} FROM rules WHERE pattern_key = ?1");
    Ok(conn.query_row(&sql, params![key], rule_from_row).optional()?)
}

/// Upsert keyed on the pattern — a second rule for one key cannot exist.
pub(super) fn write_rule(conn: &Connection, rule: &Rule) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO rules (pattern_key, category, text, confidence, evidence_count, version, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(pattern_key) DO UPDATE SET
            category = excluded.category,
            text = excluded.text,
            confidence = excluded.confidence,
            evidence_count = excluded.evidence_count,
            version = excluded.version,
            status = excluded.status,
            updated_at = excluded.updated_at",
        params![
            rule.pattern_key,
            rule.category,
            rule.text,
            rule.confidence,
            rule.evidence_count,
            rule.version,
            rule.status.as_str(),
            ts_to_sql(&rule.created_at),
            ts_to_sql(&rule.updated_at),
        ],
    )
    .map_err(EngineError::storage)?;
    Ok(())
}

impl BrainStore {
    pub fn rule(&self, key: &str) -> EngineResult<Option<Rule>> {
        let conn = self.conn.lock();
        load_rule(&conn, key)
    }

    /// Rules by descending confidence, then most recently updated.
    pub fn list_rules(&self, include_retired: bool) -> EngineResult<Vec<Rule>> {
        let conn = self.conn.lock();
        let filter = if include_retired { "" } else { "WHERE status = 'active'" };
        let sql = format!(
            "SELECT {RULE_COLS} FROM rules {filter} ORDER BY confidence DESC, updated_at DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], rule_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Change a rule's status. Returns the updated rule, `None` if no rule.
    pub fn set_rule_status(
        &self,
        key: &str,
        status: RuleStatus,
        at: &DateTime<Utc>,
    ) -> EngineResult<Option<Rule>> {
        let conn = self.conn.lock();
        let Some(mut rule) = load_rule(&conn, key)? else {
            return Ok(None);
        };
        if rule.status != status {
            rule.status = status;
            rule.updated_at = *at;
            write_rule(&conn, &rule)?;
        }
        Ok(Some(rule))
    }
}
