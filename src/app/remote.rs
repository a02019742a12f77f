use anyhow::{Context, Result};
use serde_json::Value;

use crate::http::{HttpClient, RetryPolicy};

const MAL_BASE_URL: &str = "https://myanimelist.net";
const JIKAN_BASE_URL: &str = "https://api.jikan.moe/v4";
/// MAL status filter meaning "all statuses".
const MAL_ALL_STATUSES: &str = "7";
const SEARCH_LIMIT: &str = "5";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SearchCandidate {
    pub(crate) external_id: i64,
    pub(crate) titles: Vec<String>,
}

/// The network side of the app. Implementations must be shareable across
/// the two fetches of a monitor cycle.
pub(crate) trait Remote: Sync {
    /// Raw JSON of one list page starting at `offset`.
    fn list_page(&self, username: &str, offset: usize) -> Result<String>;

    /// Monitored page body; failures come back as an empty string.
    fn page_text(&self, url: &str) -> String;

    /// Ranked search hits for a free-text title query.
    fn search(&self, query: &str) -> Result<Vec<SearchCandidate>>;

    /// Whether the profile exists at all.
    fn user_exists(&self, username: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub(crate) struct HttpRemote {
    client: HttpClient,
    mal_base: String,
    jikan_base: String,
}

impl HttpRemote {
    pub(crate) fn new() -> Self {
        Self {
            client: HttpClient::new(RetryPolicy::default()),
            mal_base: MAL_BASE_URL.to_string(),
            jikan_base: JIKAN_BASE_URL.to_string(),
        }
    }
}

impl Remote for HttpRemote {
    fn list_page(&self, username: &str, offset: usize) -> Result<String> {
        let url = format!("{}/animelist/{username}/load.json", self.mal_base);
        let offset = offset.to_string();
        self.client
            .get_text(&url, &[("status", MAL_ALL_STATUSES), ("offset", &offset)])
            .with_context(|| format!("failed to fetch list page at offset {offset} for {username}"))
    }

    fn page_text(&self, url: &str) -> String {
        match self.client.get_text(url, &[]) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(url, %err, "monitored page fetch failed");
                String::new()
            }
        }
    }

    fn search(&self, query: &str) -> Result<Vec<SearchCandidate>> {
        let url = format!("{}/anime", self.jikan_base);
        let raw = self
            .client
            .get_text(&url, &[("q", query), ("limit", SEARCH_LIMIT)])
            .with_context(|| format!("search request failed for '{query}'"))?;
        Ok(parse_search_candidates(&raw))
    }

    fn user_exists(&self, username: &str) -> Result<bool> {
        let url = format!("{}/users/{username}", self.jikan_base);
        match self.client.get_text(&url, &[]) {
            Ok(_) => Ok(true),
            Err(err) if err.status() == Some(404) => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to look up user {username}")),
        }
    }
}

/// Reads Jikan `data[]` hits, keeping every non-empty title per hit.
pub(crate) fn parse_search_candidates(raw: &str) -> Vec<SearchCandidate> {
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => return Vec::new(),
    };
    let Some(items) = parsed.get("data").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let external_id = item.get("mal_id")?.as_i64()?;
            let titles = ["title", "title_english"]
                .iter()
                .filter_map(|field| item.get(*field)?.as_str())
                .map(str::trim)
                .filter(|title| !title.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>();
            if titles.is_empty() {
                return None;
            }
            Some(SearchCandidate {
                external_id,
                titles,
            })
        })
        .collect()
}

/// Outcome of checking a profile before saving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProfileCheck {
    Ok,
    NotFound,
    ListUnavailable,
}

impl ProfileCheck {
    pub(crate) fn message(&self) -> &'static str {
        match self {
            Self::Ok => "Saved successfully!",
            Self::NotFound => "User not found.",
            Self::ListUnavailable => "Profile is private or API error.",
        }
    }
}

pub(crate) fn check_profile(remote: &impl Remote, username: &str) -> ProfileCheck {
    match remote.user_exists(username) {
        Ok(true) => {}
        Ok(false) => return ProfileCheck::NotFound,
        Err(err) => {
            tracing::warn!(username, error = %format!("{err:#}"), "user lookup failed");
            return ProfileCheck::NotFound;
        }
    }

    match remote.list_page(username, 0) {
        Ok(raw) if serde_json::from_str::<Value>(&raw).is_ok_and(|value| value.is_array()) => {
            ProfileCheck::Ok
        }
        Ok(_) => ProfileCheck::ListUnavailable,
        Err(err) => {
            tracing::warn!(username, error = %format!("{err:#}"), "list probe failed");
            ProfileCheck::ListUnavailable
        }
    }
}
