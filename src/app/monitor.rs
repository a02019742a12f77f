use std::thread;

use anyhow::{Context, Result};
use chrono::Utc;

use super::dedup::SeenLedger;
use super::detect::{ReleaseCandidate, detect};
use super::list::{CacheEnvelope, ListEntry, ListIndex, fetch_full_list};
use super::matcher::is_match;
use super::normalize::normalize;
use super::remote::Remote;
use super::settings::Settings;
use crate::db::Database;

/// Receives each cycle's batch of new releases.
pub(crate) trait Notifier {
    fn notify(&self, releases: &[ReleaseCandidate]);
}

/// Prints releases to stdout.
#[derive(Debug, Default)]
pub(crate) struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn notify(&self, releases: &[ReleaseCandidate]) {
        println!("New episodes out:");
        for release in releases {
            println!("  {}", release.release_text());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CycleReport {
    pub(crate) releases: Vec<String>,
    pub(crate) candidates: Vec<ReleaseCandidate>,
    pub(crate) ledger_changed: bool,
}

/// How a page title was tied to a list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchSource {
    List,
    Search,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TitleLabel {
    pub(crate) query: String,
    pub(crate) entry: Option<(ListEntry, MatchSource)>,
}

struct LoadedIndex {
    owner: String,
    loaded_at_ms: i64,
    index: ListIndex,
}

/// Owns everything one account's checks need between cycles: the settings
/// snapshot and the in-memory list index.
pub(crate) struct Session<'a, R: Remote> {
    db: &'a mut Database,
    remote: &'a R,
    settings: Settings,
    loaded: Option<LoadedIndex>,
}

impl<'a, R: Remote> Session<'a, R> {
    pub(crate) fn new(db: &'a mut Database, remote: &'a R) -> Result<Self> {
        let settings = Settings::load(db)?;
        Ok(Self {
            db,
            remote,
            settings,
            loaded: None,
        })
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    #[cfg(test)]
    pub(crate) fn database(&self) -> &Database {
        self.db
    }

    /// Re-reads settings; a changed username drops the in-memory index.
    /// A failed read keeps the current snapshot.
    pub(crate) fn reload_settings(&mut self) {
        let settings = match Settings::load(self.db) {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "keeping previous settings");
                return;
            }
        };
        if settings.username != self.settings.username {
            self.loaded = None;
        }
        self.settings = settings;
    }

    /// Index for the configured user, from memory, the stored cache, or the
    /// network, in that order.
    pub(crate) fn list_index(&mut self, now_ms: i64) -> Result<&ListIndex> {
        let username = self
            .settings
            .username
            .clone()
            .context("no username configured; run `malwatch user <name>` first")?;
        let ttl = self.settings.cache_ttl_millis();

        let reusable = self.loaded.as_ref().is_some_and(|loaded| {
            loaded.owner == username && (0..ttl).contains(&(now_ms - loaded.loaded_at_ms))
        });
        if !reusable {
            let (loaded_at_ms, index) = match self.cached_index(&username, now_ms, ttl)? {
                Some(found) => found,
                None => (now_ms, self.fetch_index(&username, now_ms)?),
            };
            self.loaded = Some(LoadedIndex {
                owner: username,
                loaded_at_ms,
                index,
            });
        }

        self.loaded
            .as_ref()
            .map(|loaded| &loaded.index)
            .context("list index missing after load")
    }

    /// Fetches the list from the network regardless of cache state.
    pub(crate) fn refresh_list(&mut self, now_ms: i64) -> Result<&ListIndex> {
        self.loaded = None;
        self.db.clear_list_cache()?;
        self.list_index(now_ms)
    }

    fn cached_index(
        &self,
        username: &str,
        now_ms: i64,
        ttl: i64,
    ) -> Result<Option<(i64, ListIndex)>> {
        let Some((owner, fetched_at_ms, payload)) = self.db.list_cache()? else {
            return Ok(None);
        };
        let envelope = match serde_json::from_str::<Vec<ListEntry>>(&payload) {
            Ok(payload) => CacheEnvelope {
                timestamp_millis: fetched_at_ms,
                owner,
                payload,
            },
            Err(err) => {
                tracing::warn!(%err, "discarding unreadable list cache");
                self.db.clear_list_cache()?;
                return Ok(None);
            }
        };

        if !envelope.is_owned_by(username) || !envelope.is_fresh(now_ms, ttl) {
            tracing::debug!(owner = %envelope.owner, "list cache stale or for another user");
            return Ok(None);
        }
        tracing::debug!(entries = envelope.payload.len(), "using cached list");
        Ok(Some((
            envelope.timestamp_millis,
            ListIndex::from_entries(envelope.payload),
        )))
    }

    fn fetch_index(&self, username: &str, now_ms: i64) -> Result<ListIndex> {
        let records = fetch_full_list(|offset| self.remote.list_page(username, offset))?;
        let index = ListIndex::build(&records);
        tracing::info!(
            username,
            records = records.len(),
            entries = index.len(),
            "list refreshed"
        );

        let payload = serde_json::to_string(index.entries()).context("failed to encode list")?;
        self.db.store_list_cache(username, now_ms, &payload)?;
        Ok(index)
    }

    /// One monitor pass. Never fails: problems are logged and the report
    /// comes back empty, leaving the next scheduled cycle to retry.
    pub(crate) fn run_cycle(&mut self, notifier: &dyn Notifier) -> CycleReport {
        self.run_cycle_at(Utc::now().timestamp_millis(), notifier)
    }

    pub(crate) fn run_cycle_at(&mut self, now_ms: i64, notifier: &dyn Notifier) -> CycleReport {
        match self.try_cycle(now_ms, notifier) {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "monitor cycle aborted");
                CycleReport::default()
            }
        }
    }

    fn try_cycle(&mut self, now_ms: i64, notifier: &dyn Notifier) -> Result<CycleReport> {
        let (Some(_), Some(url)) = (
            self.settings.username.clone(),
            self.settings.active_monitor_url().map(str::to_string),
        ) else {
            tracing::debug!("monitoring not configured; skipping cycle");
            return Ok(CycleReport::default());
        };

        let remote = self.remote;
        let (page_text, watching) = thread::scope(|scope| {
            let page = scope.spawn(|| remote.page_text(&url));
            let watching = self
                .list_index(now_ms)
                .map(|index| index.watching().cloned().collect::<Vec<_>>());
            let page_text = page.join().unwrap_or_else(|_| {
                tracing::warn!(url = %url, "monitored page fetch panicked");
                String::new()
            });
            (page_text, watching)
        });
        let watching = watching?;

        let mut ledger = SeenLedger::from_rows(self.db.seen_episodes()?);
        let mut report = CycleReport::default();
        for candidate in detect(&page_text, &watching) {
            if ledger.is_seen(candidate.external_id, candidate.episode) {
                continue;
            }
            ledger.mark_seen(candidate.external_id, candidate.episode);
            report.ledger_changed = true;
            report.releases.push(candidate.release_text());
            report.candidates.push(candidate);
        }

        if report.ledger_changed {
            let rows = ledger.rows().collect::<Vec<_>>();
            self.db
                .record_cycle(&rows, &report.releases, self.settings.history_limit)?;
            notifier.notify(&report.candidates);
        }

        tracing::info!(
            watching = watching.len(),
            new_releases = report.releases.len(),
            "monitor cycle finished"
        );
        Ok(report)
    }

    /// Resolves raw page titles to list entries. When `use_search` is set,
    /// titles missing from the list are checked against search hits.
    pub(crate) fn label_titles(
        &mut self,
        titles: &[String],
        use_search: bool,
        now_ms: i64,
    ) -> Result<Vec<TitleLabel>> {
        let remote = self.remote;
        let index = self.list_index(now_ms)?;

        let labels = titles
            .iter()
            .map(|query| {
                let entry = index
                    .lookup_title(query)
                    .map(|entry| (entry.clone(), MatchSource::List))
                    .or_else(|| {
                        use_search
                            .then(|| resolve_with_search(remote, index, query))
                            .flatten()
                            .map(|entry| (entry.clone(), MatchSource::Search))
                    });
                TitleLabel {
                    query: query.clone(),
                    entry,
                }
            })
            .collect();
        Ok(labels)
    }
}

/// Picks the first search hit whose title really matches the query and
/// maps it back onto the list by id. Search rank alone is not trusted.
pub(crate) fn resolve_with_search<'i>(
    remote: &impl Remote,
    index: &'i ListIndex,
    query: &str,
) -> Option<&'i ListEntry> {
    let key = normalize(query);
    if key.is_empty() {
        return None;
    }

    let candidates = match remote.search(query) {
        Ok(candidates) => candidates,
        Err(err) => {
            tracing::warn!(query, error = %format!("{err:#}"), "search verification failed");
            return None;
        }
    };

    candidates
        .iter()
        .find(|candidate| {
            candidate
                .titles
                .iter()
                .any(|title| is_match(&key, &normalize(title)))
        })
        .and_then(|candidate| index.get_by_id(candidate.external_id))
}
