//! Owns the read-only connection search runs against (spec §4.5): a
//! separate [`rusqlite::Connection`] from the writable one `scopy-storage`
//! holds, tuned the same way, synchronized only through `PRAGMA
//! data_version`. Dispatches across the four [`SearchMode`]s and keeps the
//! in-memory indexes ([`FullFuzzyIndex`], [`ShortQueryIndex`]) and the
//! recent-items cache in step with incremental update calls rather than
//! full rebuilds on every write.

use std::collections::HashMap;

use regex::RegexBuilder;
use rusqlite::{params, Connection, Row};
use scopy_core::clipboard::{ClipboardItemType, StorageLocation, StoredItem};
use scopy_core::ids::{ContentHash, ItemId};
use scopy_core::search::{SearchMode, SearchRequest, SearchResultPage, SortMode};
use tracing::{debug, instrument};

use crate::error::{SearchError, SearchResult};
use crate::full_fuzzy_index::FullFuzzyIndex;
use crate::indexed_item::IndexedItem;
use crate::recent_cache::RecentItemsCache;
use crate::scoring::utf16_len;
use crate::short_query_index::ShortQueryIndex;

/// Corpus size past which a `fuzzy`/`fuzzyPlus` query against a "long-text
/// heavy" corpus returns a prefilter page instead of a fully refined one,
/// unless the caller sets `force_full_fuzzy` (spec §4.5).
const LONG_TEXT_PREFILTER_LIMIT: usize = 20_000;

fn select_columns() -> &'static str {
    "SELECT id, type, content_hash, plain_text, note, app_bundle_id,
        created_at, last_used_at, use_count, is_pinned, size_bytes, file_size_bytes
     FROM clipboard_items"
}

fn row_to_stored_item(row: &Row<'_>) -> rusqlite::Result<StoredItem> {
    let id: String = row.get(0)?;
    let item_type: String = row.get(1)?;
    let content_hash: String = row.get(2)?;
    Ok(StoredItem {
        id: ItemId::parse(&id).unwrap_or_default(),
        item_type: ClipboardItemType::parse(&item_type).unwrap_or(ClipboardItemType::Other),
        content_hash: ContentHash::new(content_hash),
        plain_text: row.get(3)?,
        note: row.get(4)?,
        app_bundle_id: row.get(5)?,
        created_at: row.get(6)?,
        last_used_at: row.get(7)?,
        use_count: row.get(8)?,
        is_pinned: row.get(9)?,
        size_bytes: row.get(10)?,
        file_size_bytes: row.get(11)?,
        storage: StorageLocation::None,
    })
}

fn tune_readonly(conn: &Connection) -> SearchResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "busy_timeout", 500i64)?;
    conn.pragma_update(None, "cache_size", -64_000i64)?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 256i64 * 1024 * 1024)?;
    conn.pragma_update(None, "query_only", true)?;
    Ok(())
}

fn data_version(conn: &Connection) -> SearchResult<i64> {
    conn.query_row("PRAGMA data_version", [], |row| row.get(0))
        .map_err(Into::into)
}

fn verify_tables(conn: &Connection) -> SearchResult<()> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('clipboard_items', 'scopy_meta')",
        [],
        |row| row.get(0),
    )?;
    if count < 2 {
        return Err(SearchError::NotStarted);
    }
    Ok(())
}

fn trigram_table_exists(conn: &Connection) -> SearchResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'clipboard_fts_trigram'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub struct SearchEngine {
    conn: Connection,
    trigram_available: bool,
    last_data_version: i64,
    recent: RecentItemsCache,
    full_index: Option<FullFuzzyIndex>,
    short_index: ShortQueryIndex,
    sorted_cache: HashMap<String, Vec<IndexedItem>>,
}

impl SearchEngine {
    #[instrument(skip(path), fields(path = %path))]
    pub fn open(path: &str) -> SearchResult<Self> {
        let conn = Connection::open(path)?;
        tune_readonly(&conn)?;
        verify_tables(&conn)?;
        let trigram_available = trigram_table_exists(&conn)?;
        let last_data_version = data_version(&conn)?;
        let mut engine = Self {
            conn,
            trigram_available,
            last_data_version,
            recent: RecentItemsCache::default(),
            full_index: None,
            short_index: ShortQueryIndex::new(),
            sorted_cache: HashMap::new(),
        };
        engine.rebuild_from_db()?;
        debug!(trigram_available, "search engine opened");
        Ok(engine)
    }

    pub fn trigram_available(&self) -> bool {
        self.trigram_available
    }

    /// A handle the caller can use to interrupt an in-flight query on
    /// timeout (spec §4.5: 5s steady-state, 30s while the full-fuzzy index
    /// is being built).
    pub fn interrupt_handle(&self) -> rusqlite::InterruptHandle {
        self.conn.get_interrupt_handle()
    }

    fn rebuild_from_db(&mut self) -> SearchResult<()> {
        let mut stmt = self.conn.prepare(select_columns())?;
        let items: Vec<IndexedItem> = stmt
            .query_map([], row_to_stored_item)?
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .map(IndexedItem::from)
            .collect();
        drop(stmt);

        self.recent = RecentItemsCache::rebuild(items.clone());
        if items.len() >= crate::short_query_index::BUILD_THRESHOLD {
            self.short_index.begin_build();
            self.short_index.finish_build(items.clone());
        } else {
            self.short_index = ShortQueryIndex::new();
        }
        self.full_index = Some(FullFuzzyIndex::build(items));
        self.sorted_cache.clear();
        Ok(())
    }

    /// Detects external writers (another process, a direct `sqlite3` repair)
    /// via `PRAGMA data_version` and invalidates everything if it moved.
    fn sync_with_db(&mut self) -> SearchResult<()> {
        let current = data_version(&self.conn)?;
        if current != self.last_data_version {
            self.last_data_version = current;
            self.rebuild_from_db()?;
        }
        Ok(())
    }

    pub fn invalidate_cache(&mut self) {
        self.sorted_cache.clear();
    }

    pub fn handle_upserted(&mut self, item: &StoredItem) {
        let indexed = IndexedItem::from(item);
        self.recent.upsert(indexed.clone());
        if let Some(full) = &mut self.full_index {
            full.upsert(indexed.clone());
            if full.is_stale() {
                let _ = self.rebuild_from_db();
                return;
            }
        }
        self.short_index.upsert(indexed);
        self.invalidate_cache();
    }

    pub fn handle_pinned_change(&mut self, id: ItemId, pinned: bool) {
        self.recent.set_pinned(id, pinned);
        if let Some(item) = self.recent.items().iter().find(|item| item.id == id).cloned() {
            if let Some(full) = &mut self.full_index {
                full.upsert(item.clone());
            }
            self.short_index.upsert(item);
        }
        self.invalidate_cache();
    }

    pub fn handle_deletion(&mut self, id: ItemId) {
        self.recent.remove(id);
        if let Some(full) = &mut self.full_index {
            full.remove(id);
            if full.is_stale() {
                let _ = self.rebuild_from_db();
                return;
            }
        }
        self.short_index.remove(id);
        self.invalidate_cache();
    }

    pub fn handle_clear_all(&mut self) {
        let _ = self.rebuild_from_db();
    }

    #[instrument(skip(self, request), fields(mode = ?request.mode))]
    pub fn search(&mut self, request: &SearchRequest, now: f64) -> SearchResult<SearchResultPage> {
        self.sync_with_db()?;

        if request.limit == 0 {
            return Ok(SearchResultPage::empty());
        }

        let query_lower = request.query.trim().to_lowercase();
        if query_lower.is_empty() {
            return Ok(self.paged_from(self.recent.items().to_vec(), request));
        }

        match request.mode {
            SearchMode::Exact => self.search_exact(&query_lower, request),
            SearchMode::Fuzzy => self.search_fuzzy(&query_lower, request, false, now),
            SearchMode::FuzzyPlus => self.search_fuzzy(&query_lower, request, true, now),
            SearchMode::Regex => self.search_regex(request.query.trim(), request),
        }
    }

    fn search_exact(&mut self, query_lower: &str, request: &SearchRequest) -> SearchResult<SearchResultPage> {
        if utf16_len(query_lower) <= 2 {
            let matches: Vec<IndexedItem> = self
                .recent
                .items()
                .iter()
                .filter(|item| item.text.contains(query_lower))
                .cloned()
                .collect();
            return Ok(self.paged_from(matches, request));
        }

        let fts_matches = self.fts_query(query_lower, self.trigram_available)?;
        if !fts_matches.is_empty() || query_lower.is_ascii() {
            return Ok(self.paged_from_ranked(fts_matches, request));
        }

        // Non-ASCII query that the FTS tokenizer couldn't match: fall back
        // to a plain substring scan over the cached corpus.
        let matches: Vec<IndexedItem> = self
            .recent
            .items()
            .iter()
            .filter(|item| item.text.contains(query_lower))
            .cloned()
            .collect();
        Ok(self.paged_from(matches, request))
    }

    fn search_fuzzy(
        &mut self,
        query_lower: &str,
        request: &SearchRequest,
        fuzzy_plus: bool,
        _now: f64,
    ) -> SearchResult<SearchResultPage> {
        if utf16_len(query_lower) <= 2 && !fuzzy_plus {
            if let Some(candidates) = self.short_index.candidates(query_lower) {
                return Ok(self.paged_from(candidates, request));
            }
            let matches: Vec<IndexedItem> = self
                .recent
                .items()
                .iter()
                .filter(|item| item.text.contains(query_lower))
                .cloned()
                .collect();
            return Ok(self.paged_from(matches, request));
        }

        let heavy = self.recent.is_long_text_heavy();
        if heavy && !request.force_full_fuzzy {
            let mut prefiltered = self.fts_query(query_lower, self.trigram_available)?;
            prefiltered.truncate(LONG_TEXT_PREFILTER_LIMIT);
            for item in self.recent.items() {
                if item.is_pinned && !prefiltered.iter().any(|existing| existing.id == item.id) {
                    prefiltered.push(item.clone());
                }
            }
            let mut page = self.paged_from(prefiltered, request);
            page.is_prefilter = true;
            page.total = -1;
            return Ok(page);
        }

        let Some(full) = &self.full_index else {
            return Ok(SearchResultPage::empty());
        };
        let cache_key = cache_key_for(request, full.generation());
        if request.offset > 0 {
            if let Some(cached) = self.sorted_cache.get(&cache_key) {
                return Ok(slice_page(cached, request));
            }
        }

        let mut scored: Vec<(IndexedItem, i64)> = full
            .search_fuzzy(query_lower, fuzzy_plus)
            .into_iter()
            .filter(|(item, _)| item.matches_filters(request.app_filter.as_deref(), request.type_filter.as_ref()))
            .collect();
        match request.sort {
            SortMode::Relevance => scored.sort_by(|(a, sa), (b, sb)| {
                b.is_pinned
                    .cmp(&a.is_pinned)
                    .then(sb.cmp(sa))
                    .then(a.id.as_uuid().cmp(&b.id.as_uuid()))
            }),
            SortMode::Recent => scored.sort_by(|(a, _), (b, _)| {
                b.is_pinned
                    .cmp(&a.is_pinned)
                    .then(b.last_used_at.partial_cmp(&a.last_used_at).unwrap())
                    .then(a.id.as_uuid().cmp(&b.id.as_uuid()))
            }),
        }
        let sorted: Vec<IndexedItem> = scored.into_iter().map(|(item, _)| item).collect();
        let page = slice_page(&sorted, request);
        self.sorted_cache.insert(cache_key, sorted);
        Ok(page)
    }

    /// `pattern_source` is the trimmed query exactly as the caller typed it
    /// (not lowercased: folding case would invert metacharacter classes
    /// like `\D`/`\S`/`\W`/`\B`). Case-insensitivity comes only from
    /// `.case_insensitive(true)` below, matching against the already
    /// lowercased cached text.
    fn search_regex(&mut self, pattern_source: &str, request: &SearchRequest) -> SearchResult<SearchResultPage> {
        let pattern = RegexBuilder::new(pattern_source)
            .case_insensitive(true)
            .build()
            .map_err(|err| SearchError::InvalidQuery(err.to_string()))?;
        let matches: Vec<IndexedItem> = self
            .recent
            .items()
            .iter()
            .filter(|item| pattern.is_match(&item.text))
            .cloned()
            .collect();
        Ok(self.paged_from(matches, request))
    }

    /// Runs a sanitized FTS query (spec §4.5: strip `*`, fold `-` to
    /// whitespace, quote and AND-join each remaining token) against whichever
    /// shadow table is available, ranked by `bm25()` for relevance sort or
    /// recency otherwise.
    fn fts_query(&self, query_lower: &str, use_trigram: bool) -> SearchResult<Vec<IndexedItem>> {
        let sanitized = sanitize_fts_query(query_lower);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let table = if use_trigram { "clipboard_fts_trigram" } else { "clipboard_fts" };
        let sql = format!(
            "SELECT ci.id, ci.type, ci.content_hash, ci.plain_text, ci.note, ci.app_bundle_id,
                    ci.created_at, ci.last_used_at, ci.use_count, ci.is_pinned, ci.size_bytes, ci.file_size_bytes
             FROM {table} f JOIN clipboard_items ci ON ci.id = f.id
             WHERE f.{table} MATCH ?1
             ORDER BY bm25(f) LIMIT 500"
        );
        let mut stmt = match self.conn.prepare(&sql) {
            Ok(stmt) => stmt,
            Err(_) => return Ok(Vec::new()),
        };
        let rows = stmt.query_map(params![sanitized], row_to_stored_item);
        let rows = match rows {
            Ok(rows) => rows,
            Err(_) => return Ok(Vec::new()),
        };
        let items = rows
            .filter_map(Result::ok)
            .map(|item| IndexedItem::from(&item))
            .collect();
        Ok(items)
    }

    /// Applies filters, sort mode, and paging, building the final
    /// `SearchResultPage`. Caches the sorted (pre-paging) list for repeat
    /// calls with `offset > 0` against the same request shape.
    fn paged_from(&mut self, matches: Vec<IndexedItem>, request: &SearchRequest) -> SearchResultPage {
        self.paged_from_inner(matches, request, false)
    }

    /// Like [`Self::paged_from`], but `matches` already carry a meaningful
    /// relevance order (e.g. `bm25()` from `fts_query`) that a `Relevance`
    /// sort must preserve rather than re-rank by id (spec §4.5: exact mode
    /// runs "with `bm25` ordering or recency as requested").
    fn paged_from_ranked(&mut self, matches: Vec<IndexedItem>, request: &SearchRequest) -> SearchResultPage {
        self.paged_from_inner(matches, request, true)
    }

    fn paged_from_inner(&mut self, mut matches: Vec<IndexedItem>, request: &SearchRequest, preserve_order: bool) -> SearchResultPage {
        matches.retain(|item| item.matches_filters(request.app_filter.as_deref(), request.type_filter.as_ref()));

        let cache_key = cache_key_for(request, self.full_index.as_ref().map(|f| f.generation()).unwrap_or(0));
        if request.offset > 0 {
            if let Some(cached) = self.sorted_cache.get(&cache_key) {
                return slice_page(cached, request);
            }
        }

        sort_matches(&mut matches, request.sort, preserve_order);
        let page = slice_page(&matches, request);
        self.sorted_cache.insert(cache_key, matches);
        page
    }
}

fn sort_matches(matches: &mut [IndexedItem], sort: SortMode, preserve_order: bool) {
    match sort {
        SortMode::Recent => matches.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.last_used_at.partial_cmp(&a.last_used_at).unwrap())
                .then(a.id.as_uuid().cmp(&b.id.as_uuid()))
        }),
        SortMode::Relevance => {
            if preserve_order {
                // `sort_by` is stable, so non-pinned rows keep the rank
                // order they arrived in (bm25 for FTS results) while pinned
                // rows float to the top.
                matches.sort_by(|a, b| b.is_pinned.cmp(&a.is_pinned));
            } else {
                matches.sort_by(|a, b| {
                    b.is_pinned
                        .cmp(&a.is_pinned)
                        .then(a.id.as_uuid().cmp(&b.id.as_uuid()))
                });
            }
        }
    }
}

fn slice_page(matches: &[IndexedItem], request: &SearchRequest) -> SearchResultPage {
    let total = matches.len();
    let page: Vec<IndexedItem> = matches.iter().skip(request.offset).take(request.limit).cloned().collect();
    let has_more = request.offset + page.len() < total;
    SearchResultPage {
        items: page.iter().map(|item| item.dto.clone()).collect(),
        total: total as i64,
        has_more,
        is_prefilter: false,
    }
}

fn cache_key_for(request: &SearchRequest, generation: u64) -> String {
    format!(
        "{:?}|{:?}|{}|{:?}|{:?}|{}|{}",
        request.mode,
        request.sort,
        request.query.to_lowercase(),
        request.app_filter,
        request.type_filter,
        request.force_full_fuzzy,
        generation
    )
}

/// Strips `*`, folds `-` to whitespace, quotes each remaining token, and
/// AND-joins them — enough to keep user input from being interpreted as
/// FTS5 query syntax (spec §4.5).
fn sanitize_fts_query(query_lower: &str) -> String {
    let cleaned = query_lower.replace('*', "").replace('-', " ");
    cleaned
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" AND ")
}
