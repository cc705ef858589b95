// Athena Engine — Mistake Tracker
//
// Records (pattern, solution, context) observations under a normalized key.
// One track() is one SQLite transaction: increment, solution append and rule
// synthesis commit together. Tracks on the same key are serialized by a
// keyed lock; different keys never wait on each other.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use super::normalize_pattern;
use super::synthesizer::RuleSynthesizer;
use crate::atoms::constants::LOG_PREVIEW_CHARS;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::evolution_types::{
    MistakePattern, MistakeReport, Rule, RuleStatus, TrackOutcome,
};
use crate::engine::locks::KeyedLocks;
use crate::engine::memory::normalize_category;
use crate::engine::personalization::{rule_source, PersonalizationProfile};
use crate::engine::store::BrainStore;
use crate::engine::vault::safe_log_preview;

pub struct MistakeTracker {
    db: Arc<BrainStore>,
    synthesizer: RuleSynthesizer,
    profile: Arc<PersonalizationProfile>,
    key_locks: KeyedLocks<String>,
}

impl MistakeTracker {
    pub fn new(
        db: Arc<BrainStore>,
        synthesizer: RuleSynthesizer,
        profile: Arc<PersonalizationProfile>,
    ) -> Self {
        MistakeTracker {
            db,
            synthesizer,
            profile,
            key_locks: KeyedLocks::new(),
        }
    }

    pub fn synthesizer(&self) -> &RuleSynthesizer {
        &self.synthesizer
    }

    /// Record one observation. A rule is emitted or refreshed synchronously
    /// once the pattern has been seen `threshold` times.
    pub fn track(&self, report: &MistakeReport) -> EngineResult<TrackOutcome> {
        let key = normalize_pattern(&report.pattern).map_err(|e| e.context("track"))?;
        if report.solution.trim().is_empty() {
            return Err(EngineError::invalid("track: solution cannot be empty"));
        }
        if report.solution.contains('\0') || report.pattern.contains('\0') {
            return Err(EngineError::invalid("track: input must not contain null bytes"));
        }
        let report = MistakeReport {
            category: normalize_category(&report.category),
            ..report.clone()
        };

        let slot = self.key_locks.slot(&key);
        let _guard = slot.lock();

        let now = Utc::now();
        let synthesizer = self.synthesizer;
        let applied = self
            .db
            .apply_mistake(&key, &report, &now, |pattern, existing| {
                synthesizer.synthesize(pattern, existing, now)
            })
            .map_err(|e| e.context("track"))?;

        let occurrences = applied.pattern.occurrences;
        let state = self.synthesizer.state_of(occurrences, applied.rule.as_ref());
        if let Some(rule) = applied.rule.as_ref().filter(|_| applied.rule_changed) {
            if rule.version == 1 {
                info!(
                    "[evolution] Rule emitted for \"{}\" after {} occurrences (confidence {:.2})",
                    safe_log_preview(&key, LOG_PREVIEW_CHARS),
                    occurrences,
                    rule.confidence
                );
            } else {
                info!(
                    "[evolution] Rule for \"{}\" refreshed to v{} (confidence {:.2})",
                    safe_log_preview(&key, LOG_PREVIEW_CHARS),
                    rule.version,
                    rule.confidence
                );
            }
            if rule.status == RuleStatus::Active {
                self.profile.update_from_rule(rule);
            }
        }

        Ok(TrackOutcome {
            key,
            occurrences,
            state,
            rule: applied.rule,
        })
    }

    /// Look a pattern up by key or by any text that normalizes to it.
    pub fn pattern(&self, key_or_text: &str) -> EngineResult<Option<MistakePattern>> {
        let key = normalize_pattern(key_or_text)?;
        self.db.mistake_pattern(&key)
    }

    /// Every pattern, most frequent first.
    pub fn patterns(&self) -> EngineResult<Vec<MistakePattern>> {
        self.db.list_mistake_patterns()
    }

    pub fn rules(&self, include_retired: bool) -> EngineResult<Vec<Rule>> {
        self.db.list_rules(include_retired)
    }

    pub fn rule(&self, key_or_text: &str) -> EngineResult<Option<Rule>> {
        let key = normalize_pattern(key_or_text)?;
        self.db.rule(&key)
    }

    /// Retire a rule. It stays for audit but is no longer served or refreshed,
    /// and its contribution is dropped from the profile.
    pub fn retire_rule(&self, key_or_text: &str) -> EngineResult<Rule> {
        let key = normalize_pattern(key_or_text).map_err(|e| e.context("retire_rule"))?;
        let slot = self.key_locks.slot(&key);
        let _guard = slot.lock();

        let rule = self
            .db
            .set_rule_status(&key, RuleStatus::Retired, &Utc::now())?
            .ok_or_else(|| EngineError::not_found(format!("rule for pattern \"{key}\"")))?;
        info!("[evolution] Retired rule for \"{}\"", safe_log_preview(&key, LOG_PREVIEW_CHARS));
        if let Err(e) = self.profile.drop_sources(&[rule_source(&key)]) {
            warn!("[evolution] Profile rebuild after retire failed: {}", e);
        }
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::evolution_types::RuleState;

    fn tracker(threshold: u32) -> MistakeTracker {
        let db = Arc::new(BrainStore::open_in_memory().unwrap());
        let profile = Arc::new(PersonalizationProfile::open(db.clone(), 0.1).unwrap());
        MistakeTracker::new(db, RuleSynthesizer::new(threshold).unwrap(), profile)
    }

    #[test]
    fn null_check_scenario() {
        let t = tracker(2);
        let first = t
            .track(&MistakeReport::new("null check missing", "add null guard"))
            .unwrap();
        assert_eq!(first.occurrences, 1);
        assert_eq!(first.state, RuleState::Dormant);
        assert!(first.rule.is_none());

        let second = t
            .track(&MistakeReport::new("Null Check Missing", "add null guard"))
            .unwrap();
        assert_eq!(second.key, "null check missing");
        assert_eq!(second.occurrences, 2);
        assert_eq!(second.state, RuleState::Active);
        let rule = second.rule.unwrap();
        assert_eq!(rule.confidence, 0.5);
        assert!(rule.text.contains("add null guard"));
        assert_eq!(t.rules(false).unwrap().len(), 1);
    }

    #[test]
    fn threshold_one_emits_immediately() {
        let t = tracker(1);
        let out = t.track(&MistakeReport::new("off by one", "use ..=")).unwrap();
        assert_eq!(out.state, RuleState::Active);
        assert_eq!(out.rule.unwrap().confidence, 0.5);
    }

    #[test]
    fn invalid_reports() {
        let t = tracker(2);
        assert!(matches!(
            t.track(&MistakeReport::new("   ", "fix")),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            t.track(&MistakeReport::new("pattern", "  ")),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(t.patterns().unwrap().is_empty());
    }

    #[test]
    fn rule_feeds_profile() {
        let t = tracker(2);
        let report = MistakeReport::new("unwrap on none", "use ?").category("Rust");
        t.track(&report).unwrap();
        t.track(&report).unwrap();
        let snap = t.profile.snapshot();
        assert!(snap.weight("rule:unwrap on none") > 0.0);
        assert!(snap.weight("mistake:rust") > 0.0);
    }

    #[test]
    fn retire_stops_refresh_and_drops_profile_weight() {
        let t = tracker(2);
        let report = MistakeReport::new("unwrap on none", "use ?");
        t.track(&report).unwrap();
        t.track(&report).unwrap();

        let retired = t.retire_rule("Unwrap  on NONE").unwrap();
        assert_eq!(retired.status, RuleStatus::Retired);
        assert!(t.rules(false).unwrap().is_empty());
        assert_eq!(t.rules(true).unwrap().len(), 1);
        assert_eq!(t.profile.snapshot().weight("rule:unwrap on none"), 0.0);

        let later = t.track(&report).unwrap();
        assert_eq!(later.occurrences, 3);
        assert_eq!(later.state, RuleState::Retired);
        assert_eq!(later.rule.unwrap().version, retired.version);

        assert!(matches!(t.retire_rule("never seen"), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn lookup_by_text() {
        let t = tracker(3);
        t.track(&MistakeReport::new("Forgot   await", "add .await").context("tokio handler"))
            .unwrap();
        let p = t.pattern("forgot await").unwrap().unwrap();
        assert_eq!(p.original, "Forgot   await");
        assert_eq!(p.solutions[0].context.as_deref(), Some("tokio handler"));
        assert!(t.rule("forgot await").unwrap().is_none());
    }
}
