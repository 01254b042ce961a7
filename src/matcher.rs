//! Phrase matching and confidence selection over recognition results.
//!
//! Pure functions: the engine feeds recognition alternatives through these
//! to decide whether a listening turn satisfied a match node.

use regex::Regex;

/// Pick the most confident result among recognition alternatives.
///
/// Without confidence scores the first result wins. With scores, the
/// highest score wins and ties break toward the later index. Returns
/// `None` on empty input.
pub fn select_most_confident<'a>(
    results: &'a [String],
    confidences: Option<&[f32]>,
) -> Option<&'a str> {
    let first = results.first()?;
    let Some(scores) = confidences.filter(|s| !s.is_empty()) else {
        return Some(first.as_str());
    };

    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for i in 0..results.len() {
        let score = scores.get(i).copied().unwrap_or(f32::NEG_INFINITY);
        if score >= best_score {
            best = i;
            best_score = score;
        }
    }
    results.get(best).map(String::as_str)
}

/// True if `candidate` contains any of `phrases` as a whole word,
/// case-insensitively.
pub fn matches(candidate: &str, phrases: &[String]) -> bool {
    whole_word_pattern(phrases).is_some_and(|p| p.is_match(candidate))
}

/// Index of the first recognition alternative containing any expected
/// phrase as a whole word, or `None` if no alternative matches.
pub fn first_match(candidates: &[String], phrases: &[String]) -> Option<usize> {
    let pattern = whole_word_pattern(phrases)?;
    candidates.iter().position(|c| pattern.is_match(c))
}

/// True if any recognition alternative matches any expected phrase.
pub fn any_matches(candidates: &[String], phrases: &[String]) -> bool {
    first_match(candidates, phrases).is_some()
}

/// Build one case-insensitive alternation anchored to word boundaries:
/// `\b(phrase1|phrase2|…)\b`. Phrases are escaped literally.
fn whole_word_pattern(phrases: &[String]) -> Option<Regex> {
    if phrases.is_empty() {
        return None;
    }
    let alternation = phrases
        .iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    // Escaped literals cannot produce an invalid pattern.
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).ok()
}
