use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::rules::{load_rule, write_rule};
use super::{ts_from_sql, ts_to_sql, BrainStore};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::evolution_types::{MistakePattern, MistakeReport, Rule, SolutionEntry};

/// Load one pattern with its full solution history.
pub(super) fn load_pattern(conn: &Connection, key: &str) -> EngineResult<Option<MistakePattern>> {
    let head = conn
        .query_row(
            "SELECT key, original, category, occurrences, first_seen, last_seen
             FROM mistake_patterns WHERE key = ?1",
            params![key],
            |row| {
                let first: String = row.get(4)?;
                let last: String = row.get(5)?;
                Ok(MistakePattern {
                    key: row.get(0)?,
                    original: row.get(1)?,
                    category: row.get(2)?,
                    occurrences: row.get(3)?,
                    solutions: Vec::new(),
                    first_seen: ts_from_sql(4, &first)?,
                    last_seen: ts_from_sql(5, &last)?,
                })
            },
        )
        .optional()?;

    let Some(mut pattern) = head else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT solution, context, recorded_at FROM mistake_solutions
         WHERE pattern_key = ?1 ORDER BY seq ASC",
    )?;
    let solutions = stmt.query_map(params![key], |row| {
        let recorded: String = row.get(2)?;
        Ok(SolutionEntry {
            solution: row.get(0)?,
            context: row.get(1)?,
            recorded_at: ts_from_sql(2, &recorded)?,
        })
    })?;
    pattern.solutions = solutions.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Some(pattern))
}

/// Outcome of one atomic track transaction.
pub struct AppliedMistake {
    pub pattern: MistakePattern,
    pub rule: Option<Rule>,
    /// Whether the rule row was written in this transaction.
    pub rule_changed: bool,
}

impl BrainStore {
    /// Record one observation of `key` and let `synthesize` decide the rule,
    /// all in a single transaction: the counter increment, the solution append
    /// and the rule write commit together or not at all.
    ///
    /// `synthesize` receives the updated pattern and the current rule (if any)
    /// and returns the rule that should exist afterwards.
    pub fn apply_mistake<F>(
        &self,
        key: &str,
        report: &MistakeReport,
        at: &DateTime<Utc>,
        synthesize: F,
    ) -> EngineResult<AppliedMistake>
    where
        F: FnOnce(&MistakePattern, Option<Rule>) -> Option<Rule>,
    {
        let now = ts_to_sql(at);
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(EngineError::storage)?;

        tx.execute(
            "INSERT INTO mistake_patterns (key, original, category, occurrences, first_seen, last_seen)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)
             ON CONFLICT(key) DO UPDATE SET occurrences = occurrences + 1, last_seen = ?4",
            params![key, report.pattern.trim(), report.category, now],
        )
        .map_err(EngineError::storage)?;

        // Append unless identical to the most recent entry.
        let last: Option<(i64, String)> = tx
            .query_row(
                "SELECT seq, solution FROM mistake_solutions
                 WHERE pattern_key = ?1 ORDER BY seq DESC LIMIT 1",
                params![key],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let solution = report.solution.trim();
        let next_seq = match last {
            Some((_, ref prev)) if prev == solution => None,
            Some((seq, _)) => Some(seq + 1),
            None => Some(0),
        };
        if let Some(seq) = next_seq {
            tx.execute(
                "INSERT INTO mistake_solutions (pattern_key, seq, solution, context, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![key, seq, solution, report.context, now],
            )
            .map_err(EngineError::storage)?;
        }

        let pattern = load_pattern(&tx, key)?
            .ok_or_else(|| EngineError::storage(format!("pattern {key} vanished mid-transaction")))?;
        let existing = load_rule(&tx, key)?;
        let rule = synthesize(&pattern, existing.clone());

        let rule_changed = rule.is_some() && rule != existing;
        if let Some(ref r) = rule {
            if rule_changed {
                write_rule(&tx, r)?;
            }
        }

        tx.commit().map_err(EngineError::storage)?;
        Ok(AppliedMistake {
            pattern,
            rule,
            rule_changed,
        })
    }

    pub fn mistake_pattern(&self, key: &str) -> EngineResult<Option<MistakePattern>> {
        let conn = self.conn.lock();
        load_pattern(&conn, key)
    }

    /// All patterns, most frequent first.
    pub fn list_mistake_patterns(&self) -> EngineResult<Vec<MistakePattern>> {
        let conn = self.conn.lock();
        let keys: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT key FROM mistake_patterns ORDER BY occurrences DESC, last_seen DESC",
            )?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let mut patterns = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(p) = load_pattern(&conn, &key)? {
                patterns.push(p);
            }
        }
        Ok(patterns)
    }
}
