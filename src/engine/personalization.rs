// Athena Engine — Personalization Profile
//
// Preference dimensions learned from stored memories and emitted rules with
// an exponential moving average:  new = old·(1-α) + signal·α
//
// Every update is logged (`profile_events`) together with the snapshot it
// produced, so the snapshot is always a replay of the log. Forgetting a
// memory or retiring a rule deletes that source's events and replays the
// rest; dimensions the removed source never touched come out unchanged.
//
// Readers get an `Arc<ProfileSnapshot>` and never block writers; writers
// serialize on `update_lock`, build the next snapshot and swap the pointer.
// `gate` orders evidence writers against removals: a store holds it shared
// from insert until its event is logged, forget/retention hold it exclusive.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::evolution_types::{ProfileSnapshot, Rule};
use crate::atoms::types::RecordMeta;
use crate::engine::store::BrainStore;

pub struct PersonalizationProfile {
    db: Arc<BrainStore>,
    learning_rate: f64,
    current: RwLock<Arc<ProfileSnapshot>>,
    update_lock: Mutex<()>,
    gate: RwLock<()>,
}

impl PersonalizationProfile {
    /// Restore the persisted profile, or rebuild it from the event log.
    pub fn open(db: Arc<BrainStore>, learning_rate: f64) -> EngineResult<Self> {
        if !(learning_rate > 0.0 && learning_rate < 1.0) {
            return Err(EngineError::Config(format!(
                "learning rate must be within (0, 1), got {learning_rate}"
            )));
        }
        let persisted = match db.load_profile() {
            Ok(p) => p,
            Err(e) => {
                warn!("[profile] Persisted profile unreadable, rebuilding: {}", e);
                None
            }
        };
        let mut logged = db.count_profile_events()?;
        if logged == 0 {
            logged = backfill_events(&db)?;
        }

        let stale = persisted.as_ref().map_or(true, |p| p.observations != logged);
        let profile = PersonalizationProfile {
            db,
            learning_rate,
            current: RwLock::new(Arc::new(persisted.unwrap_or_default())),
            update_lock: Mutex::new(()),
            gate: RwLock::new(()),
        };
        if stale {
            profile.rebuild()?;
        }
        Ok(profile)
    }

    /// Immutable view of the profile at this instant.
    pub fn snapshot(&self) -> Arc<ProfileSnapshot> {
        self.current.read().clone()
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Shared side of the gate. Hold from writing a memory until its update
    /// is logged.
    pub fn observing(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read()
    }

    /// Exclusive side of the gate. Hold across deleting evidence and
    /// `drop_sources`.
    pub fn forgetting(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write()
    }

    pub fn update_from_memory(&self, meta: &RecordMeta) -> Arc<ProfileSnapshot> {
        self.apply(&memory_source(&meta.id), &memory_signals(meta))
    }

    pub fn update_from_rule(&self, rule: &Rule) -> Arc<ProfileSnapshot> {
        self.apply(&rule_source(&rule.pattern_key), &rule_signals(rule))
    }

    /// Fold, log and publish one update. If the log write fails the update
    /// is dropped, so the snapshot never holds a signal the log lacks.
    fn apply(&self, source: &str, signals: &[(String, f64)]) -> Arc<ProfileSnapshot> {
        let _guard = self.update_lock.lock();
        let current = self.snapshot();
        let mut next = ProfileSnapshot::clone(&current);
        fold(&mut next, signals, self.learning_rate);
        next.version += 1;
        next.observations += 1;
        let now = Utc::now();
        next.updated_at = Some(now);

        if let Err(e) = self.db.append_profile_event(source, signals, &next, &now) {
            warn!("[profile] Failed to log update from {}, skipped: {}", source, e);
            return current;
        }
        let next = Arc::new(next);
        *self.current.write() = next.clone();
        next
    }

    /// Remove everything `sources` contributed and replay what is left.
    pub fn drop_sources(&self, sources: &[String]) -> EngineResult<Arc<ProfileSnapshot>> {
        let _guard = self.update_lock.lock();
        let dropped = self.db.delete_profile_events(sources)?;
        info!(
            "[profile] Dropped {} event(s) from {} source(s)",
            dropped,
            sources.len()
        );
        self.replay()
    }

    /// Recompute from scratch by replaying the whole event log.
    pub fn rebuild(&self) -> EngineResult<Arc<ProfileSnapshot>> {
        let _guard = self.update_lock.lock();
        self.replay()
    }

    /// Caller holds `update_lock`.
    fn replay(&self) -> EngineResult<Arc<ProfileSnapshot>> {
        let events = self.db.profile_events()?;
        let mut next = ProfileSnapshot {
            version: self.current.read().version + 1,
            ..ProfileSnapshot::default()
        };
        for event in &events {
            fold(&mut next, &event.signals, self.learning_rate);
        }
        next.observations = events.len() as u64;
        next.updated_at = Some(Utc::now());
        info!(
            "[profile] Rebuilt from {} observation(s), {} dimension(s)",
            next.observations,
            next.weights.len()
        );
        Ok(self.commit(next))
    }

    /// Persist (best effort) and publish. Caller holds `update_lock`.
    fn commit(&self, next: ProfileSnapshot) -> Arc<ProfileSnapshot> {
        if let Err(e) = self.db.save_profile(&next) {
            warn!("[profile] Failed to persist profile v{}: {}", next.version, e);
        }
        let next = Arc::new(next);
        *self.current.write() = next.clone();
        next
    }
}

/// Vaults written before the event log existed: seed it from the memories
/// and active rules they hold, oldest first.
fn backfill_events(db: &BrainStore) -> EngineResult<u64> {
    let mut seeded = Vec::new();
    for meta in db.list_memory_meta()? {
        seeded.push((meta.created_at, memory_source(&meta.id), memory_signals(&meta)));
    }
    for rule in db.list_rules(false)? {
        seeded.push((rule.updated_at, rule_source(&rule.pattern_key), rule_signals(&rule)));
    }
    if seeded.is_empty() {
        return Ok(0);
    }
    seeded.sort_by_key(|(at, _, _)| *at);
    let events: Vec<(String, Vec<(String, f64)>)> =
        seeded.into_iter().map(|(_, source, signals)| (source, signals)).collect();
    let n = db.append_profile_events(&events)?;
    info!("[profile] Seeded event log with {} observation(s)", n);
    Ok(n as u64)
}

pub fn memory_source(id: &str) -> String {
    format!("memory:{id}")
}

pub fn rule_source(pattern_key: &str) -> String {
    format!("rule:{pattern_key}")
}

/// One EMA step; an unseen dimension starts from 0.
pub fn ema(old: f64, signal: f64, learning_rate: f64) -> f64 {
    old * (1.0 - learning_rate) + signal * learning_rate
}

fn fold(snapshot: &mut ProfileSnapshot, signals: &[(String, f64)], learning_rate: f64) {
    for (dimension, signal) in signals {
        let weight = snapshot.weights.entry(dimension.clone()).or_insert(0.0);
        *weight = ema(*weight, *signal, learning_rate);
    }
}

fn memory_signals(meta: &RecordMeta) -> Vec<(String, f64)> {
    let mut signals = vec![(format!("category:{}", meta.category), 1.0)];
    signals.extend(meta.tags.iter().map(|t| (format!("tag:{t}"), 1.0)));
    if let Some(emotion) = meta.emotion {
        signals.push((format!("emotion:{emotion}"), 1.0));
    }
    signals
}

fn rule_signals(rule: &Rule) -> Vec<(String, f64)> {
    vec![
        (format!("rule:{}", rule.pattern_key), rule.confidence),
        (format!("mistake:{}", rule.category), 1.0),
    ]
}
