use std::collections::HashSet;

/// Largest length gap (in chars) at which substring containment still counts.
const MAX_CONTAINMENT_LEN_DIFF: usize = 4;
/// Candidates with at least this many tokens match when fully contained.
const SUBSET_MIN_TOKENS: usize = 5;
/// References with fewer tokens need a perfect token overlap.
const SHORT_REFERENCE_TOKENS: usize = 3;
const SUPERSET_MIN_RATIO: f64 = 0.6;
const DEFAULT_MIN_RATIO: f64 = 0.75;

/// Decides whether two normalized titles denote the same work.
///
/// The check is directional only in the subset rule: a long `candidate`
/// whose tokens all appear in `reference` matches, but not the other way
/// around. Callers pass the scraped or queried title as `candidate` and the
/// list title as `reference`.
pub(crate) fn is_match(candidate: &str, reference: &str) -> bool {
    if candidate.is_empty() || reference.is_empty() {
        return false;
    }
    if candidate == reference {
        return true;
    }

    if candidate.contains(reference) || reference.contains(candidate) {
        let diff = candidate
            .chars()
            .count()
            .abs_diff(reference.chars().count());
        if diff <= MAX_CONTAINMENT_LEN_DIFF {
            return true;
        }
    }

    let candidate_tokens = tokenize(candidate);
    let reference_tokens = tokenize(reference);
    if candidate_tokens.is_empty() || reference_tokens.is_empty() {
        return false;
    }

    let reference_set: HashSet<&str> = reference_tokens.iter().map(String::as_str).collect();
    if candidate_tokens.len() >= SUBSET_MIN_TOKENS
        && candidate_tokens
            .iter()
            .all(|token| reference_set.contains(token.as_str()))
    {
        return true;
    }

    let candidate_set: HashSet<&str> = candidate_tokens.iter().map(String::as_str).collect();
    let matches = candidate_set.intersection(&reference_set).count();
    let union = candidate_set.union(&reference_set).count();
    let ratio = matches as f64 / union as f64;

    if reference_set.len() < SHORT_REFERENCE_TOKENS {
        return matches == union;
    }
    if reference_set.is_subset(&candidate_set) {
        return ratio >= SUPERSET_MIN_RATIO;
    }
    ratio >= DEFAULT_MIN_RATIO
}

fn tokenize(key: &str) -> Vec<String> {
    key.split_whitespace()
        .filter(|token| token.chars().count() > 1)
        .map(|token| token.replace('-', ""))
        .filter(|token| !token.is_empty())
        .collect()
}
