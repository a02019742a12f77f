use regex::{Regex, RegexBuilder};

use super::list::ListEntry;
use super::normalize::{detection_needles, fold_text};

/// How far past a title the episode number may start.
const PROXIMITY_WINDOW: usize = 150;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReleaseCandidate {
    pub(crate) external_id: i64,
    pub(crate) title: String,
    pub(crate) episode: u32,
}

impl ReleaseCandidate {
    pub(crate) fn release_text(&self) -> String {
        format!("{} - Episode {}", self.title, self.episode)
    }
}

/// Finds watching entries whose next episode shows up near their title.
pub(crate) fn detect<'a>(
    page_text: &str,
    watching: impl IntoIterator<Item = &'a ListEntry>,
) -> Vec<ReleaseCandidate> {
    if page_text.trim().is_empty() {
        return Vec::new();
    }
    let page = fold_text(page_text);

    let mut candidates = Vec::new();
    for entry in watching {
        let next_episode = entry.watched_episodes.saturating_add(1);
        let found = entry.titles().any(|title| {
            detection_needles(title)
                .iter()
                .any(|needle| mentions_episode(&page, needle, next_episode))
        });
        if found {
            tracing::debug!(
                title = %entry.title,
                episode = next_episode,
                "release spotted on monitored page"
            );
            candidates.push(ReleaseCandidate {
                external_id: entry.external_id,
                title: entry.title.clone(),
                episode: next_episode,
            });
        }
    }
    candidates
}

/// `page` must already be folded with [`fold_text`].
pub(crate) fn mentions_episode(page: &str, needle: &str, episode: u32) -> bool {
    if needle.is_empty() || !page.contains(needle) {
        return false;
    }
    match proximity_pattern(needle, episode) {
        Ok(pattern) => pattern.is_match(page),
        Err(err) => {
            tracing::warn!(needle, %err, "release pattern failed to build");
            false
        }
    }
}

fn proximity_pattern(needle: &str, episode: u32) -> Result<Regex, regex::Error> {
    let pattern = format!(
        r"{}.{{0,{PROXIMITY_WINDOW}}}?\b(?:(?:episodio|episode|ep|e)\s*\.?\s*)?0*{episode}\b",
        regex::escape(needle)
    );
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
}
