// Athena Engine — Emotion Inference
//
// Lexicon heuristic that assigns one of the closed-set emotion tags to a
// memory when the caller gives none. No model call: a single pass over the
// lowercased text. Single-word markers match whole tokens; multi-word
// markers match as substrings.

use crate::atoms::types::EmotionTag;

const FRUSTRATION_MARKERS: &[&str] = &[
    "frustrated",
    "frustrating",
    "annoying",
    "annoyed",
    "broken",
    "terrible",
    "hate",
    "awful",
    "worst",
    "angry",
    "stuck",
    "useless",
    "again",
    "still failing",
    "keeps failing",
    "waste of time",
];

const SATISFACTION_MARKERS: &[&str] = &[
    "thank",
    "thanks",
    "great",
    "perfect",
    "love",
    "prefer",
    "prefers",
    "likes",
    "excellent",
    "helpful",
    "glad",
    "happy",
    "pleased",
    "works",
    "good job",
    "well done",
];

const SURPRISE_MARKERS: &[&str] = &[
    "unexpected",
    "unexpectedly",
    "surprisingly",
    "wow",
    "whoa",
    "bizarre",
    "weird",
    "strange",
    "oddly",
    "didn't expect",
    "never thought",
    "turns out",
    "plot twist",
];

const CONFUSION_MARKERS: &[&str] = &[
    "confused",
    "confusing",
    "unclear",
    "unsure",
    "why",
    "huh",
    "lost",
    "don't understand",
    "doesn't make sense",
    "not sure",
    "what does",
];

const PRIDE_MARKERS: &[&str] = &[
    "proud",
    "finally",
    "shipped",
    "nailed",
    "achieved",
    "milestone",
    "breakthrough",
    "solved",
    "figured out",
    "pulled off",
];

/// Lexicons in tie-break order: on equal hit counts the earlier one wins.
const LEXICONS: [(EmotionTag, &[&str]); 5] = [
    (EmotionTag::Frustration, FRUSTRATION_MARKERS),
    (EmotionTag::Confusion, CONFUSION_MARKERS),
    (EmotionTag::Surprise, SURPRISE_MARKERS),
    (EmotionTag::Pride, PRIDE_MARKERS),
    (EmotionTag::Satisfaction, SATISFACTION_MARKERS),
];

/// Best-matching emotion, or `None` when no marker fires.
pub fn detect_emotion(content: &str) -> Option<EmotionTag> {
    let lower = content.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|t| !t.is_empty())
        .collect();

    let mut best: Option<(EmotionTag, usize)> = None;
    for (tag, markers) in LEXICONS {
        let hits = count_marker_hits(&lower, &tokens, markers);
        if hits > 0 && best.map_or(true, |(_, top)| hits > top) {
            best = Some((tag, hits));
        }
    }
    best.map(|(tag, _)| tag)
}

fn count_marker_hits(text: &str, tokens: &[&str], markers: &[&str]) -> usize {
    markers
        .iter()
        .filter(|m| {
            if m.contains(' ') {
                text.contains(**m)
            } else {
                tokens.contains(*m)
            }
        })
        .count()
}
