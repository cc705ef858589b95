// ── Athena Atoms: Evolution & Personalization Types ────────────────────────
//
// Data carried by the self-evolution loop:
//   MistakeReport  → what a caller submits to `track()`
//   MistakePattern → the audit-trail entity keyed by normalized pattern text
//   Rule           → the derived artifact, at most one per pattern key
//   RuleState      → where a pattern sits in the Dormant/Eligible/Active FSM
//   ProfileSnapshot → immutable view of the personalization profile

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atoms::constants::DEFAULT_CATEGORY;
use crate::atoms::error::{EngineError, EngineResult};

// ═════════════════════════════════════════════════════════════════════════════
// Mistakes
// ═════════════════════════════════════════════════════════════════════════════

/// One observation submitted to the mistake tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MistakeReport {
    pub pattern: String,
    pub solution: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl MistakeReport {
    pub fn new(pattern: impl Into<String>, solution: impl Into<String>) -> Self {
        MistakeReport {
            pattern: pattern.into(),
            solution: solution.into(),
            context: None,
            category: default_category(),
        }
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

/// A recorded fix for a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionEntry {
    pub solution: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Audit-trail entity for one normalized pattern key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MistakePattern {
    pub key: String,
    /// Pattern text as first reported, before normalization.
    pub original: String,
    pub category: String,
    pub occurrences: u32,
    /// Oldest first.
    pub solutions: Vec<SolutionEntry>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

// ═════════════════════════════════════════════════════════════════════════════
// Rules
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Active,
    Retired,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Retired => "retired",
        }
    }
}

impl std::str::FromStr for RuleStatus {
    type Err = EngineError;
    fn from_str(s: &str) -> EngineResult<Self> {
        match s {
            "active" => Ok(Self::Active),
            "retired" => Ok(Self::Retired),
            other => Err(EngineError::invalid(format!("unknown rule status: {other}"))),
        }
    }
}

/// Behavioral rule synthesized from repeated mistake evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub pattern_key: String,
    /// Category of the source pattern.
    pub category: String,
    pub text: String,
    /// `min(1.0, occurrences / (2 * threshold))`
    pub confidence: f64,
    /// Occurrence count the current text/confidence were computed from.
    pub evidence_count: u32,
    /// Bumped on every re-synthesis.
    pub version: u32,
    pub status: RuleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-pattern position in the synthesis state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleState {
    /// Pattern exists, count below threshold.
    Dormant,
    /// Count reached threshold, no rule yet.
    Eligible,
    /// Rule emitted and in force.
    Active,
    /// Rule explicitly retired by a caller.
    Retired,
}

/// Result of one `track()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackOutcome {
    pub key: String,
    pub occurrences: u32,
    pub state: RuleState,
    /// The rule after this call, if one exists for the key.
    pub rule: Option<Rule>,
}

// ═════════════════════════════════════════════════════════════════════════════
// Personalization
// ═════════════════════════════════════════════════════════════════════════════

/// Immutable copy of the personalization profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    /// Incremented on every committed update.
    pub version: u64,
    /// Preference dimension → EMA weight.
    pub weights: BTreeMap<String, f64>,
    /// Number of logged updates folded into this snapshot.
    pub observations: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProfileSnapshot {
    pub fn weight(&self, dimension: &str) -> f64 {
        self.weights.get(dimension).copied().unwrap_or(0.0)
    }

    /// Highest-weighted dimensions, descending.
    pub fn top_dimensions(&self, n: usize) -> Vec<(String, f64)> {
        let mut dims: Vec<(String, f64)> =
            self.weights.iter().map(|(k, v)| (k.clone(), *v)).collect();
        dims.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        dims.truncate(n);
        dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_dimensions_orders_by_weight_then_name() {
        let mut snap = ProfileSnapshot::default();
        snap.weights.insert("tag:b".into(), 0.2);
        snap.weights.insert("tag:a".into(), 0.2);
        snap.weights.insert("category:preference".into(), 0.5);
        let top = snap.top_dimensions(2);
        assert_eq!(top[0].0, "category:preference");
        assert_eq!(top[1].0, "tag:a");
        assert_eq!(snap.weight("missing"), 0.0);
    }

    #[test]
    fn report_defaults_to_general_category() {
        let report = MistakeReport::new("p", "s");
        assert_eq!(report.category, "general");
        let report: MistakeReport =
            serde_json::from_str(r#"{"pattern":"p","solution":"s"}"#).unwrap();
        assert_eq!(report.category, "general");
        assert!(report.context.is_none());
    }
}
