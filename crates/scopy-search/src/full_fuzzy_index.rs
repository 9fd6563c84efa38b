//! In-memory index making fuzzy search roughly O(matches + candidates)
//! instead of O(corpus) (spec §3, §4.5, §9 "cyclic references" redesign
//! note): an arena of slots plus an id → slot map, so a removal is a
//! tombstone rather than a vector shift, with per-character postings for
//! candidate selection.

use std::collections::{HashMap, HashSet};

use scopy_core::ids::ItemId;

use crate::indexed_item::IndexedItem;
use crate::scoring::{fuzzy_plus_score, fuzzy_single_score};

/// Rebuild threshold: ≥25% tombstones, with at least 64 slots and 16
/// tombstones (spec §3).
const STALE_TOMBSTONE_RATIO: f64 = 0.25;
const STALE_MIN_SLOTS: usize = 64;
const STALE_MIN_TOMBSTONES: usize = 16;

pub struct FullFuzzyIndex {
    slots: Vec<Option<IndexedItem>>,
    id_to_slot: HashMap<ItemId, usize>,
    postings: HashMap<char, Vec<usize>>,
    tombstones: usize,
    generation: u64,
}

impl FullFuzzyIndex {
    pub fn build(items: Vec<IndexedItem>) -> Self {
        let mut index = Self {
            slots: Vec::with_capacity(items.len()),
            id_to_slot: HashMap::with_capacity(items.len()),
            postings: HashMap::new(),
            tombstones: 0,
            generation: 0,
        };
        for item in items {
            index.push_slot(item);
        }
        index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn push_slot(&mut self, item: IndexedItem) {
        let slot = self.slots.len();
        self.id_to_slot.insert(item.id, slot);
        for ch in chars_for_postings(&item.text) {
            self.postings.entry(ch).or_default().push(slot);
        }
        self.slots.push(Some(item));
        self.generation += 1;
    }

    pub fn upsert(&mut self, item: IndexedItem) {
        if let Some(&slot) = self.id_to_slot.get(&item.id) {
            self.slots[slot] = None;
            self.tombstones += 1;
            self.id_to_slot.remove(&item.id);
        }
        self.push_slot(item);
    }

    pub fn remove(&mut self, id: ItemId) {
        if let Some(slot) = self.id_to_slot.remove(&id) {
            self.slots[slot] = None;
            self.tombstones += 1;
            self.generation += 1;
        }
    }

    pub fn is_stale(&self) -> bool {
        self.slots.len() >= STALE_MIN_SLOTS
            && self.tombstones >= STALE_MIN_TOMBSTONES
            && (self.tombstones as f64) / (self.slots.len() as f64) >= STALE_TOMBSTONE_RATIO
    }

    /// Candidate slots whose item contains every non-whitespace character
    /// of the lowercased query (spec §8 invariant).
    fn candidate_slots(&self, query_lower: &str) -> Option<Vec<usize>> {
        let chars: Vec<char> = chars_for_postings(query_lower).into_iter().collect();
        if chars.is_empty() {
            return None;
        }

        let mut lists: Vec<&Vec<usize>> = Vec::with_capacity(chars.len());
        for ch in &chars {
            lists.push(self.postings.get(ch)?);
        }
        lists.sort_by_key(|l| l.len());

        let mut candidates: HashSet<usize> = lists[0].iter().copied().collect();
        for list in &lists[1..] {
            let set: HashSet<usize> = list.iter().copied().collect();
            candidates.retain(|slot| set.contains(slot));
            if candidates.is_empty() {
                break;
            }
        }
        Some(candidates.into_iter().collect())
    }

    /// Scores every live candidate for `fuzzy`/`fuzzyPlus` mode. Returns
    /// `(item id, score)` pairs; the caller applies filters/sort/paging.
    pub fn search_fuzzy(&self, query_lower: &str, fuzzy_plus: bool) -> Vec<(IndexedItem, i64)> {
        let Some(candidate_slots) = self.candidate_slots(query_lower) else {
            return Vec::new();
        };
        let mut results = Vec::new();
        for slot in candidate_slots {
            let Some(item) = &self.slots[slot] else { continue };
            let score = if fuzzy_plus {
                fuzzy_plus_score(&item.text, query_lower)
            } else {
                fuzzy_single_score(&item.text, query_lower)
            };
            if let Some(score) = score {
                results.push((item.clone(), score));
            }
        }
        results
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.tombstones
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn chars_for_postings(text: &str) -> HashSet<char> {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopy_core::clipboard::ClipboardItemType;
    use scopy_core::dto::ClipboardItemDto;

    fn item(id: ItemId, text: &str) -> IndexedItem {
        IndexedItem {
            id,
            text: text.to_lowercase(),
            is_pinned: false,
            last_used_at: 0.0,
            item_type: ClipboardItemType::Text,
            app_bundle_id: None,
            dto: ClipboardItemDto {
                id: id.to_string(),
                item_type: ClipboardItemType::Text,
                preview: text.to_string(),
                note: None,
                app_bundle_id: None,
                created_at: 0.0,
                last_used_at: 0.0,
                use_count: 1,
                is_pinned: false,
                size_bytes: text.len() as i64,
                file_size_bytes: None,
                has_thumbnail: false,
            },
        }
    }

    #[test]
    fn fuzzy_search_finds_both_substring_and_plain_matches() {
        let a = ItemId::new();
        let b = ItemId::new();
        let index = FullFuzzyIndex::build(vec![item(a, "Hello World"), item(b, "hello there")]);

        let results = index.search_fuzzy("hello", false);
        let ids: HashSet<ItemId> = results.iter().map(|(i, _)| i.id).collect();
        assert!(ids.contains(&a));
        assert!(ids.contains(&b));
    }

    #[test]
    fn exact_substring_match_outranks_a_scattered_subsequence_match() {
        let exact_id = ItemId::new();
        let scattered_id = ItemId::new();
        let index = FullFuzzyIndex::build(vec![
            item(exact_id, "hello world"),
            item(scattered_id, "h e l l o, far away, w o r l d"),
        ]);

        let results = index.search_fuzzy("world", false);
        let exact_score = results.iter().find(|(i, _)| i.id == exact_id).unwrap().1;
        let scattered_score = results.iter().find(|(i, _)| i.id == scattered_id).unwrap().1;
        assert!(exact_score > scattered_score);
    }

    #[test]
    fn upsert_tombstones_the_previous_slot() {
        let id = ItemId::new();
        let mut index = FullFuzzyIndex::build(vec![item(id, "first version")]);
        index.upsert(item(id, "second version"));
        assert_eq!(index.len(), 1);

        let results = index.search_fuzzy("second", false);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn staleness_threshold_requires_both_ratio_and_minimums() {
        let items: Vec<_> = (0..64).map(|_| item(ItemId::new(), "filler text here")).collect();
        let mut index = FullFuzzyIndex::build(items);
        assert!(!index.is_stale());

        let ids: Vec<_> = index.slots.iter().flatten().map(|i| i.id).take(16).collect();
        for id in ids {
            index.remove(id);
        }
        assert!(index.is_stale());
    }
}
