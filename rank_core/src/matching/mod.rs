//! Team name similarity scoring.
//!
//! Domain-specific to youth team names: provider rows carry strings like
//! "Rapids 2013B Blue" or "FC Thunder U12 Boys" that must score high against
//! each other when they are the same squad and low against the club's other
//! squads. The scorer is token-based with a Jaro-Winkler blend and a
//! club-name bonus; cohort restriction happens in the resolver, not here.

use strsim::jaro_winkler;

/// Tokens too generic to identify a team on their own.
const NOISE_WORDS: &[&str] = &[
    "fc", "sc", "cf", "afc", "club", "soccer", "futbol", "football", "academy", "youth", "team",
    "athletics", "athletic", "the", "of", "and", "boys", "girls", "coed",
];

/// Club-name bonus applied when the club sides agree.
const CLUB_BONUS: f64 = 0.08;

/// Club similarity at or above which the bonus applies.
const CLUB_MATCH_THRESHOLD: f64 = 0.85;

/// Normalize a string for comparison.
pub fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tokenize into normalized words.
pub fn tokenize(s: &str) -> Vec<String> {
    normalize(s)
        .split_whitespace()
        .map(|w| w.to_string())
        .collect()
}

fn is_noise_word(word: &str) -> bool {
    NOISE_WORDS.contains(&word)
}

/// Age markers embedded in team names: "u12", birth years, bare numbers.
/// The cohort axis already constrains age, so these carry no signal.
fn is_age_token(word: &str) -> bool {
    if let Some(rest) = word.strip_prefix('u') {
        return !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit());
    }
    word.chars().all(|c| c.is_ascii_digit())
}

/// Tokens that actually identify the team. Falls back to the full token set
/// when filtering would leave nothing (e.g. a name that is only a year).
fn significant_tokens(s: &str) -> Vec<String> {
    let all = tokenize(s);
    let kept: Vec<String> = all
        .iter()
        .filter(|w| !is_noise_word(w.as_str()) && !is_age_token(w.as_str()))
        .cloned()
        .collect();
    if kept.is_empty() {
        all
    } else {
        kept
    }
}

fn sorted(tokens: &[String]) -> Vec<&String> {
    let mut out: Vec<&String> = tokens.iter().collect();
    out.sort();
    out
}

fn token_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.iter().filter(|t| b.contains(*t)).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// Similarity between two team (or club) names in [0, 1].
///
/// Exact normalized equality scores 1.0; otherwise a blend of significant
/// token overlap and Jaro-Winkler over the joined significant tokens, so
/// reordered words still match and one-letter typos stay close.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a_norm = normalize(a);
    let b_norm = normalize(b);
    if a_norm.is_empty() || b_norm.is_empty() {
        return 0.0;
    }
    if a_norm == b_norm {
        return 1.0;
    }

    let a_sig = significant_tokens(a);
    let b_sig = significant_tokens(b);
    let a_joined = a_sig.join(" ");
    let b_joined = b_sig.join(" ");
    if !a_joined.is_empty() && a_joined == b_joined {
        // Same identity modulo noise tokens ("FC Thunder U12" vs "Thunder").
        return 0.97;
    }
    if !a_sig.is_empty() && sorted(&a_sig) == sorted(&b_sig) {
        // Same words, different order ("Blue Rapids" vs "Rapids Blue").
        return 0.95;
    }

    let overlap = token_overlap(&a_sig, &b_sig);
    let edit = jaro_winkler(&a_joined, &b_joined);
    (0.6 * overlap + 0.4 * edit).clamp(0.0, 1.0)
}

/// Score a provider team reference against a canonical candidate.
///
/// The base score comes from the team names; agreeing club names add a small
/// bonus. Anything cohort-related is deliberately absent: candidates are
/// generated cohort-restricted upstream.
pub fn score_candidate(
    team_name: &str,
    club_name: &str,
    candidate_name: &str,
    candidate_club: &str,
) -> f64 {
    let base = name_similarity(team_name, candidate_name);
    if base == 0.0 {
        return 0.0;
    }

    let club_a = normalize(club_name);
    let club_b = normalize(candidate_club);
    if club_a.is_empty() || club_b.is_empty() {
        return base;
    }

    if name_similarity(&club_a, &club_b) >= CLUB_MATCH_THRESHOLD {
        (base + CLUB_BONUS).min(1.0)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation() {
        assert_eq!(normalize("FC  Thunder - U12!"), "fc thunder u12");
    }

    #[test]
    fn test_identical_names_score_one() {
        assert_eq!(name_similarity("Rapids 2013 Blue", "Rapids 2013 Blue"), 1.0);
        assert_eq!(name_similarity("rapids 2013 blue", "Rapids 2013  Blue"), 1.0);
    }

    #[test]
    fn test_noise_and_age_tokens_ignored() {
        // Same squad modulo boilerplate tokens.
        let score = name_similarity("FC Thunder U12 Boys", "Thunder U12");
        assert!(score > 0.9, "score was {score}");
    }

    #[test]
    fn test_different_squads_same_club_score_low() {
        // Color-coded squads of one club are distinct teams.
        let score = name_similarity("Rapids 2013 Blue", "Rapids 2013 Red");
        assert!(score < 0.90, "score was {score}");
    }

    #[test]
    fn test_unrelated_names_score_near_zero() {
        let score = name_similarity("Rapids Blue", "Harbour City Mariners");
        assert!(score < 0.5, "score was {score}");
    }

    #[test]
    fn test_club_bonus_applies() {
        let with_club = score_candidate("Thunder Blue", "FC Thunder", "Thunder Blue 2013", "Thunder FC");
        let without_club = score_candidate("Thunder Blue", "", "Thunder Blue 2013", "Thunder FC");
        assert!(with_club > without_club);
        assert!(with_club <= 1.0);
    }

    #[test]
    fn test_club_bonus_never_exceeds_one() {
        let score = score_candidate("Thunder", "FC Thunder", "Thunder", "FC Thunder");
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_empty_name_scores_zero() {
        assert_eq!(name_similarity("", "Thunder"), 0.0);
        assert_eq!(score_candidate("", "", "Thunder", ""), 0.0);
    }

    #[test]
    fn test_word_order_insensitive() {
        let score = name_similarity("Blue Rapids 2013", "Rapids 2013 Blue");
        assert!(score > 0.9, "score was {score}");
    }
}
