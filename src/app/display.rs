use chrono::{DateTime, Local};

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        s.chars().take(max.saturating_sub(3)).collect::<String>() + "..."
    } else {
        s.to_string()
    }
}

pub(crate) fn format_last_seen_display(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M %:z")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

/// Splits `"<title> - Episode <n>"` at its last separator.
pub(crate) fn split_release_text(text: &str) -> (&str, Option<&str>) {
    match text.rsplit_once(" - ") {
        Some((title, episode)) if !title.trim().is_empty() => (title.trim(), Some(episode.trim())),
        _ => (text.trim(), None),
    }
}
