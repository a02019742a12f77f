use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Titles shorter than this are treated as unmatchable.
pub(crate) const MIN_TITLE_CHARS: usize = 3;

const STOP_WORDS: &[&str] = &[
    // format tags
    "tv",
    "movie",
    "ova",
    "ona",
    "special",
    "dub",
    "dubbed",
    "sub",
    "subbed",
    "subtitled",
    "dublado",
    "legendado",
    "uncensored",
    // quality tags
    "hd",
    "fhd",
    "1080p",
    "720p",
    "480p",
    // site and language boilerplate
    "assistir",
    "online",
    "gratis",
    "watch",
    "free",
    "completo",
    "episodio",
    "episodios",
    "episode",
    "episodes",
    "filme",
    "temporada",
    "todos",
    // generic nouns
    "anime",
    "season",
    "part",
    "cour",
    "final",
];

static EPISODE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:episode|ep|e)\s*\d+\b").expect("episode marker regex should compile")
});

static ORDINAL_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d+)(?:st|nd|rd|th|ª|º)\b").expect("ordinal regex should compile")
});

static STOP_WORD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let alternation = STOP_WORDS
        .iter()
        .map(|word| regex::escape(word))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{alternation})\b")).expect("stop word regex should compile")
});

/// Canonical comparison key for a title. Returns an empty string for
/// titles that are too short to compare.
pub(crate) fn normalize(raw: &str) -> String {
    if raw.trim().chars().count() < MIN_TITLE_CHARS {
        return String::new();
    }

    // Every pass after the first only removes characters, so this settles.
    let mut current = normalize_pass(raw);
    loop {
        let next = normalize_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }

    if current.chars().count() < MIN_TITLE_CHARS {
        return String::new();
    }
    current
}

fn normalize_pass(raw: &str) -> String {
    let folded = fold_text(raw);
    let without_episode = EPISODE_MARKER.replace_all(&folded, " ");
    let without_ordinals = ORDINAL_SUFFIX.replace_all(&without_episode, "$1");
    let without_separators = without_ordinals.replace(" - ", " ");
    let spaced = without_separators.replace(['[', ']', '(', ')', '{', '}', '_', '.'], " ");
    let without_stop_words = STOP_WORD_PATTERN.replace_all(&spaced, " ");

    let kept = without_stop_words
        .chars()
        .filter_map(|ch| match ch {
            'a'..='z' | '0'..='9' | '-' | ' ' => Some(ch),
            ch if ch.is_whitespace() => Some(' '),
            _ => None,
        })
        .collect::<String>();

    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches('-').trim_end().to_string()
}

/// Lower-cases text and strips diacritical marks.
pub(crate) fn fold_text(raw: &str) -> String {
    raw.to_lowercase()
        .nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .collect()
}

/// Strings the release detector looks for in folded page text, most
/// specific first. Never contains empty or too-short strings.
pub(crate) fn detection_needles(raw: &str) -> Vec<String> {
    let folded = fold_text(raw);
    let literal = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    let alnum_only = folded
        .chars()
        .filter(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || *ch == ' ')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut needles: Vec<String> = Vec::new();
    for needle in [normalize(raw), literal, alnum_only] {
        if needle.chars().count() < MIN_TITLE_CHARS || needles.contains(&needle) {
            continue;
        }
        needles.push(needle);
    }
    needles
}
