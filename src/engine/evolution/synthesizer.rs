// Athena Engine — Rule Synthesizer
//
// Per-pattern state machine:
//
//   Dormant ──count ≥ threshold──▶ Eligible ──synthesize──▶ Active ─┐
//                                                             ▲      │ track
//                                                             └──────┘
//   Active ──retire (caller)──▶ Retired   (terminal; never resurrected)
//
// Eligible is transient: synthesis runs in the same transaction as the
// track that crossed the threshold.

use chrono::{DateTime, Utc};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::evolution_types::{MistakePattern, Rule, RuleState, RuleStatus};

#[derive(Debug, Clone, Copy)]
pub struct RuleSynthesizer {
    threshold: u32,
}

impl RuleSynthesizer {
    pub fn new(threshold: u32) -> EngineResult<Self> {
        if threshold == 0 {
            return Err(EngineError::Config("rule threshold must be >= 1".into()));
        }
        Ok(RuleSynthesizer { threshold })
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// `min(1.0, count / (2 * threshold))`
    pub fn confidence(&self, occurrences: u32) -> f64 {
        (occurrences as f64 / (2.0 * self.threshold as f64)).min(1.0)
    }

    pub fn state_of(&self, occurrences: u32, rule: Option<&Rule>) -> RuleState {
        match rule.map(|r| r.status) {
            Some(RuleStatus::Retired) => RuleState::Retired,
            Some(RuleStatus::Active) => RuleState::Active,
            None if occurrences >= self.threshold => RuleState::Eligible,
            None => RuleState::Dormant,
        }
    }

    /// The rule that should exist for `pattern` after its latest track.
    /// Retired rules come back untouched; confidence never goes down.
    pub fn synthesize(
        &self,
        pattern: &MistakePattern,
        existing: Option<Rule>,
        now: DateTime<Utc>,
    ) -> Option<Rule> {
        match self.state_of(pattern.occurrences, existing.as_ref()) {
            RuleState::Dormant | RuleState::Retired => existing,
            RuleState::Eligible => Some(Rule {
                pattern_key: pattern.key.clone(),
                category: pattern.category.clone(),
                text: render_text(pattern),
                confidence: self.confidence(pattern.occurrences),
                evidence_count: pattern.occurrences,
                version: 1,
                status: RuleStatus::Active,
                created_at: now,
                updated_at: now,
            }),
            RuleState::Active => {
                let current = existing?;
                if current.evidence_count == pattern.occurrences {
                    return Some(current);
                }
                Some(Rule {
                    text: render_text(pattern),
                    confidence: current.confidence.max(self.confidence(pattern.occurrences)),
                    evidence_count: pattern.occurrences,
                    version: current.version + 1,
                    updated_at: now,
                    ..current
                })
            }
        }
    }
}

/// Distinct solutions, most recent first.
pub fn ranked_solutions(pattern: &MistakePattern) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::new();
    for entry in pattern.solutions.iter().rev() {
        if !seen.contains(&entry.solution.as_str()) {
            seen.push(entry.solution.as_str());
        }
    }
    seen
}

/// Rule text: the pattern, how often it was seen, and the fixes in
/// precedence order (1 = apply first).
pub fn render_text(pattern: &MistakePattern) -> String {
    let solutions = ranked_solutions(pattern);
    let mut text = format!(
        "When \"{}\" comes up (seen {} times), apply in order:",
        pattern.key, pattern.occurrences
    );
    for (i, solution) in solutions.iter().enumerate() {
        text.push_str(&format!("\n{}. {}", i + 1, solution));
    }
    text
}
