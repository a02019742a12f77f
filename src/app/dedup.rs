use std::collections::{BTreeMap, VecDeque};

/// Episodes remembered per title before the oldest is evicted.
pub(crate) const LEDGER_CAPACITY: usize = 5;

/// Recently notified episodes per list id, oldest first.
///
/// Eviction is by insertion order, so an old episode number can be
/// reported again once five newer distinct episodes have been marked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SeenLedger {
    entries: BTreeMap<i64, VecDeque<u32>>,
}

impl SeenLedger {
    pub(crate) fn is_seen(&self, external_id: i64, episode: u32) -> bool {
        self.entries
            .get(&external_id)
            .is_some_and(|episodes| episodes.contains(&episode))
    }

    /// Records an episode; returns whether the ledger changed.
    pub(crate) fn mark_seen(&mut self, external_id: i64, episode: u32) -> bool {
        let episodes = self.entries.entry(external_id).or_default();
        if episodes.contains(&episode) {
            return false;
        }
        episodes.push_back(episode);
        while episodes.len() > LEDGER_CAPACITY {
            episodes.pop_front();
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn episodes(&self, external_id: i64) -> Vec<u32> {
        self.entries
            .get(&external_id)
            .map(|episodes| episodes.iter().copied().collect())
            .unwrap_or_default()
    }

    /// `(external_id, episode)` pairs, each id's episodes oldest first.
    pub(crate) fn rows(&self) -> impl Iterator<Item = (i64, u32)> + '_ {
        self.entries
            .iter()
            .flat_map(|(id, episodes)| episodes.iter().map(move |episode| (*id, *episode)))
    }

    /// Rebuilds a ledger from rows in the order [`SeenLedger::rows`] yields.
    pub(crate) fn from_rows(rows: impl IntoIterator<Item = (i64, u32)>) -> Self {
        let mut ledger = Self::default();
        for (external_id, episode) in rows {
            ledger.mark_seen(external_id, episode);
        }
        ledger
    }
}
