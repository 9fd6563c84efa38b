//! Refreshable cache of the most recently used rows (spec §4.5): backs
//! `exact`/`fuzzy` mode's ≤2-character path, `regex` mode's full scan, and
//! the plain paged view for an empty query. Bounded so memory doesn't grow
//! unboundedly for huge corpora; the bound isn't named numerically in the
//! spec (see DESIGN.md).

use scopy_core::ids::ItemId;

use crate::indexed_item::IndexedItem;

pub const RECENT_CACHE_CAP: usize = 5_000;

#[derive(Default)]
pub struct RecentItemsCache {
    items: Vec<IndexedItem>,
    total_text_len: usize,
    max_text_len: usize,
}

impl RecentItemsCache {
    pub fn rebuild(mut items: Vec<IndexedItem>) -> Self {
        items.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.last_used_at.partial_cmp(&a.last_used_at).unwrap())
        });
        items.truncate(RECENT_CACHE_CAP);

        let total_text_len = items.iter().map(|i| i.text.len()).sum();
        let max_text_len = items.iter().map(|i| i.text.len()).max().unwrap_or(0);
        Self {
            items,
            total_text_len,
            max_text_len,
        }
    }

    pub fn items(&self) -> &[IndexedItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Updates a cached row's pinned flag in place and re-sorts, since
    /// pinned is the primary sort key.
    pub fn set_pinned(&mut self, id: ItemId, pinned: bool) {
        if let Some(item) = self.items.iter_mut().find(|item| item.id == id) {
            item.is_pinned = pinned;
            item.dto.is_pinned = pinned;
        }
        self.resort();
    }

    pub fn upsert(&mut self, item: IndexedItem) {
        self.items.retain(|existing| existing.id != item.id);
        self.items.push(item);
        self.resort();
        self.items.truncate(RECENT_CACHE_CAP);
        self.recompute_text_len_stats();
    }

    pub fn remove(&mut self, id: ItemId) {
        self.items.retain(|item| item.id != id);
        self.recompute_text_len_stats();
    }

    /// Recomputes the running totals from scratch. Called after any mutation
    /// that adds, replaces, evicts, or removes a row, since a replaced row's
    /// old length must come back out of `total_text_len` and an evicted or
    /// removed row may have held the current `max_text_len`.
    fn recompute_text_len_stats(&mut self) {
        self.total_text_len = self.items.iter().map(|i| i.text.len()).sum();
        self.max_text_len = self.items.iter().map(|i| i.text.len()).max().unwrap_or(0);
    }

    fn resort(&mut self) {
        self.items.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.last_used_at.partial_cmp(&a.last_used_at).unwrap())
        });
    }

    /// "long-text heavy" test from spec §4.5: average length ≥1024 or max
    /// ≥100k.
    pub fn is_long_text_heavy(&self) -> bool {
        if self.items.is_empty() {
            return false;
        }
        let avg = self.total_text_len as f64 / self.items.len() as f64;
        avg >= 1024.0 || self.max_text_len >= 100_000
    }
}
