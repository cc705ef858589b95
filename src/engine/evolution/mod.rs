// Athena Engine — Self-Evolution
//
// Recurring mistakes become behavioural rules:
//   tracker     — MistakeTracker: normalized pattern counters + solution history
//   synthesizer — RuleSynthesizer: Dormant → Eligible → Active (→ Retired)

pub mod synthesizer;
pub mod tracker;

pub use synthesizer::RuleSynthesizer;
pub use tracker::MistakeTracker;

use crate::atoms::error::{EngineError, EngineResult};

/// Pattern key: trimmed, case-folded, inner whitespace collapsed to one space.
pub fn normalize_pattern(raw: &str) -> EngineResult<String> {
    let key = raw
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    if key.is_empty() {
        return Err(EngineError::invalid("mistake pattern cannot be empty"));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_converge() {
        let variants = [
            "null check missing",
            "Null Check Missing",
            "  NULL   check\tmissing \n",
        ];
        for v in variants {
            assert_eq!(normalize_pattern(v).unwrap(), "null check missing");
        }
    }

    #[test]
    fn blank_is_rejected() {
        assert!(normalize_pattern("").is_err());
        assert!(normalize_pattern(" \t\n").is_err());
    }

    #[test]
    fn unicode_case_folds() {
        assert_eq!(normalize_pattern("ÜBER Fehler").unwrap(), "über fehler");
    }
}
