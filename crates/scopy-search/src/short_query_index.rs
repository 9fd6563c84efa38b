//! ASCII-only character and bigram posting lists that accelerate 1-2
//! character queries (spec §3, §4.5). Built asynchronously once the
//! corpus passes [`BUILD_THRESHOLD`]; mutations arriving mid-build are
//! queued and replayed once the build finishes, per spec.

use std::collections::HashMap;

use scopy_core::ids::ItemId;

use crate::indexed_item::IndexedItem;

/// Corpus size at which building the short-query index becomes worth the
/// memory; not named numerically in the spec, chosen here (see DESIGN.md).
pub const BUILD_THRESHOLD: usize = 500;

#[derive(Debug, Clone)]
enum PendingUpdate {
    Upsert(IndexedItem),
    Remove(ItemId),
}

enum State {
    NotBuilt,
    Building { pending: Vec<PendingUpdate> },
    Ready(Built),
}

struct Built {
    items: HashMap<ItemId, IndexedItem>,
    char_postings: HashMap<u8, Vec<ItemId>>,
    bigram_postings: HashMap<(u8, u8), Vec<ItemId>>,
}

pub struct ShortQueryIndex {
    state: State,
}

impl Default for ShortQueryIndex {
    fn default() -> Self {
        Self { state: State::NotBuilt }
    }
}

impl ShortQueryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// Marks a build as in-flight; subsequent `upsert`/`remove` calls queue
    /// instead of mutating a structure that doesn't exist yet.
    pub fn begin_build(&mut self) {
        if matches!(self.state, State::NotBuilt) {
            self.state = State::Building { pending: Vec::new() };
        }
    }

    /// Installs a freshly built index (typically produced off-actor from
    /// the read-only connection) and replays whatever queued during the
    /// build.
    pub fn finish_build(&mut self, items: Vec<IndexedItem>) {
        let pending = match std::mem::replace(&mut self.state, State::NotBuilt) {
            State::Building { pending } => pending,
            _ => Vec::new(),
        };

        let mut built = Built {
            items: HashMap::with_capacity(items.len()),
            char_postings: HashMap::new(),
            bigram_postings: HashMap::new(),
        };
        for item in items {
            insert_into(&mut built, item);
        }
        self.state = State::Ready(built);

        for update in pending {
            match update {
                PendingUpdate::Upsert(item) => self.upsert(item),
                PendingUpdate::Remove(id) => self.remove(id),
            }
        }
    }

    pub fn upsert(&mut self, item: IndexedItem) {
        match &mut self.state {
            State::Ready(built) => {
                remove_from(built, item.id);
                insert_into(built, item);
            }
            State::Building { pending } => pending.push(PendingUpdate::Upsert(item)),
            State::NotBuilt => {}
        }
    }

    pub fn remove(&mut self, id: ItemId) {
        match &mut self.state {
            State::Ready(built) => remove_from(built, id),
            State::Building { pending } => pending.push(PendingUpdate::Remove(id)),
            State::NotBuilt => {}
        }
    }

    /// Candidates for a 1-2 ASCII-byte query. `None` if the index isn't
    /// ready, or the query isn't ASCII (spec: non-ASCII short queries skip
    /// this index entirely).
    pub fn candidates(&self, query_lower: &str) -> Option<Vec<IndexedItem>> {
        let State::Ready(built) = &self.state else {
            return None;
        };
        if !query_lower.is_ascii() || query_lower.is_empty() || query_lower.len() > 2 {
            return None;
        }
        let bytes = query_lower.as_bytes();
        let ids = if bytes.len() == 1 {
            built.char_postings.get(&bytes[0])
        } else {
            built.bigram_postings.get(&(bytes[0], bytes[1]))
        };
        Some(
            ids.into_iter()
                .flatten()
                .filter_map(|id| built.items.get(id).cloned())
                .collect(),
        )
    }
}

fn insert_into(built: &mut Built, item: IndexedItem) {
    let mut seen_bytes: Vec<u8> = Vec::new();
    for &byte in ascii_bytes(&item.text) {
        if seen_bytes.contains(&byte) {
            continue;
        }
        seen_bytes.push(byte);
        built.char_postings.entry(byte).or_default().push(item.id);
    }
    let mut seen_bigrams: Vec<(u8, u8)> = Vec::new();
    for pair in ascii_bigrams(&item.text) {
        if seen_bigrams.contains(&pair) {
            continue;
        }
        seen_bigrams.push(pair);
        built.bigram_postings.entry(pair).or_default().push(item.id);
    }
    built.items.insert(item.id, item);
}

fn remove_from(built: &mut Built, id: ItemId) {
    if let Some(item) = built.items.remove(&id) {
        for &byte in ascii_bytes(&item.text) {
            if let Some(list) = built.char_postings.get_mut(&byte) {
                list.retain(|existing| *existing != id);
            }
        }
        for pair in ascii_bigrams(&item.text) {
            if let Some(list) = built.bigram_postings.get_mut(&pair) {
                list.retain(|existing| *existing != id);
            }
        }
    }
}

fn ascii_bytes(text: &str) -> impl Iterator<Item = &u8> {
    text.as_bytes().iter().filter(|b| b.is_ascii() && !b.is_ascii_whitespace())
}

fn ascii_bigrams(text: &str) -> Vec<(u8, u8)> {
    let bytes: Vec<u8> = text
        .as_bytes()
        .iter()
        .copied()
        .filter(|b| b.is_ascii() && !b.is_ascii_whitespace())
        .collect();
    bytes.windows(2).map(|w| (w[0], w[1])).collect()
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
    fn one_and_two_byte_queries_find_candidates() {
        let id = ItemId::new();
        let mut index = ShortQueryIndex::new();
        index.finish_build(vec![item(id, "ab cd")]);

        assert!(index.candidates("a").unwrap().iter().any(|i| i.id == id));
        assert!(index.candidates("ab").unwrap().iter().any(|i| i.id == id));
        assert!(index.candidates("zz").unwrap().is_empty());
    }

    #[test]
    fn non_ascii_query_returns_none() {
        let mut index = ShortQueryIndex::new();
        index.finish_build(vec![item(ItemId::new(), "hello")]);
        assert!(index.candidates("漢").is_none());
    }

    #[test]
    fn updates_during_build_are_queued_then_applied() {
        let mut index = ShortQueryIndex::new();
        index.begin_build();
        let id = ItemId::new();
        index.upsert(item(id, "xy"));
        assert!(!index.is_ready());

        index.finish_build(vec![]);
        assert!(index.is_ready());
        assert!(index.candidates("xy").unwrap().iter().any(|i| i.id == id));
    }
}
