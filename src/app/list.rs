use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::matcher::is_match;
use super::normalize::normalize;

pub(crate) const LIST_PAGE_SIZE: usize = 300;
pub(crate) const LIST_RECORD_CAP: usize = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ListStatus {
    Watching,
    Completed,
    OnHold,
    Dropped,
    PlanToWatch,
}

impl ListStatus {
    pub(crate) fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Watching),
            2 => Some(Self::Completed),
            3 => Some(Self::OnHold),
            4 => Some(Self::Dropped),
            6 => Some(Self::PlanToWatch),
            _ => None,
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Watching => "WATCHING",
            Self::Completed => "COMPLETED",
            Self::OnHold => "ON HOLD",
            Self::Dropped => "DROPPED",
            Self::PlanToWatch => "PLAN TO WATCH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ListEntry {
    pub(crate) title: String,
    pub(crate) normalized_key: String,
    #[serde(default)]
    pub(crate) alt_titles: Vec<String>,
    pub(crate) status: ListStatus,
    pub(crate) external_id: i64,
    pub(crate) watched_episodes: u32,
    pub(crate) score: Option<f64>,
}

impl ListEntry {
    /// Parses one `load.json` row. Rows without a usable title, a positive
    /// numeric id, or a known status code are dropped.
    pub(crate) fn from_record(record: &Value) -> Option<Self> {
        let object = record.as_object()?;
        let title = object.get("anime_title").and_then(value_as_text)?;
        let normalized_key = normalize(&title);
        if normalized_key.is_empty() {
            return None;
        }
        let status = ListStatus::from_code(object.get("status").and_then(value_as_i64)?)?;
        let external_id = object
            .get("anime_id")
            .and_then(value_as_i64)
            .filter(|id| *id > 0)?;
        let watched_episodes = object
            .get("num_watched_episodes")
            .and_then(value_as_i64)
            .and_then(|count| u32::try_from(count).ok())
            .unwrap_or(0);
        let score = object
            .get("score")
            .and_then(value_as_f64)
            .filter(|score| *score > 0.0);
        let alt_titles = object
            .get("anime_title_eng")
            .and_then(value_as_text)
            .filter(|alt| !alt.eq_ignore_ascii_case(&title))
            .into_iter()
            .collect();

        Some(Self {
            title,
            normalized_key,
            alt_titles,
            status,
            external_id,
            watched_episodes,
            score,
        })
    }

    /// Primary title followed by any alternates.
    pub(crate) fn titles(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.title.as_str()).chain(self.alt_titles.iter().map(String::as_str))
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Normalized title to list entry, in insertion order.
#[derive(Debug, Clone, Default)]
pub(crate) struct ListIndex {
    entries: Vec<ListEntry>,
    positions: HashMap<String, usize>,
}

impl ListIndex {
    pub(crate) fn build(records: &[Value]) -> Self {
        Self::from_entries(records.iter().filter_map(ListEntry::from_record))
    }

    /// Later entries with an existing key replace the earlier entry in place.
    pub(crate) fn from_entries(entries: impl IntoIterator<Item = ListEntry>) -> Self {
        let mut index = Self::default();
        for entry in entries {
            match index.positions.get(&entry.normalized_key) {
                Some(&position) => index.entries[position] = entry,
                None => {
                    index
                        .positions
                        .insert(entry.normalized_key.clone(), index.entries.len());
                    index.entries.push(entry);
                }
            }
        }
        index
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> &[ListEntry] {
        &self.entries
    }

    /// Exact key first, then the first fuzzy match in iteration order.
    pub(crate) fn lookup(&self, key: &str) -> Option<&ListEntry> {
        if key.is_empty() {
            return None;
        }
        if let Some(&position) = self.positions.get(key) {
            return self.entries.get(position);
        }
        self.entries
            .iter()
            .find(|entry| is_match(key, &entry.normalized_key))
    }

    pub(crate) fn lookup_title(&self, raw: &str) -> Option<&ListEntry> {
        self.lookup(&normalize(raw))
    }

    pub(crate) fn get_by_id(&self, external_id: i64) -> Option<&ListEntry> {
        self.entries
            .iter()
            .find(|entry| entry.external_id == external_id)
    }

    pub(crate) fn watching(&self) -> impl Iterator<Item = &ListEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.status == ListStatus::Watching)
    }
}

/// What a single list page turned out to hold.
#[derive(Debug)]
pub(crate) enum ListPage {
    Records(Vec<Value>),
    Malformed,
}

pub(crate) fn parse_list_page(raw: &str) -> ListPage {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(records)) => ListPage::Records(records),
        _ => ListPage::Malformed,
    }
}

/// Pages through the list by offset until a short page, a malformed page,
/// or the record cap. Transport errors abort the whole fetch.
pub(crate) fn fetch_full_list<F>(mut fetch_page: F) -> Result<Vec<Value>>
where
    F: FnMut(usize) -> Result<String>,
{
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < LIST_RECORD_CAP {
        let raw = fetch_page(offset)?;
        let page = match parse_list_page(&raw) {
            ListPage::Records(page) => page,
            ListPage::Malformed => {
                tracing::warn!(offset, "list page is not a JSON array; keeping earlier pages");
                break;
            }
        };

        let page_len = page.len();
        records.extend(page);
        if page_len < LIST_PAGE_SIZE {
            break;
        }
        offset += LIST_PAGE_SIZE;
    }

    if records.len() > LIST_RECORD_CAP {
        records.truncate(LIST_RECORD_CAP);
    }
    tracing::debug!(records = records.len(), "fetched list records");
    Ok(records)
}

/// Cached list payload with the identity and time it was fetched for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CacheEnvelope {
    pub(crate) timestamp_millis: i64,
    pub(crate) owner: String,
    pub(crate) payload: Vec<ListEntry>,
}

impl CacheEnvelope {
    pub(crate) fn is_fresh(&self, now_millis: i64, ttl_millis: i64) -> bool {
        let age = now_millis - self.timestamp_millis;
        (0..ttl_millis).contains(&age)
    }

    pub(crate) fn is_owned_by(&self, identity: &str) -> bool {
        self.owner == identity
    }
}
