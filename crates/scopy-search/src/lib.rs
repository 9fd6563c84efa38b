pub mod engine;
pub mod error;
pub mod full_fuzzy_index;
pub mod indexed_item;
pub mod recent_cache;
pub mod scoring;
pub mod short_query_index;

pub use engine::SearchEngine;
pub use error::{SearchError, SearchResult};
pub use indexed_item::IndexedItem;

#[cfg(test)]
mod tests {
    use rusqlite::{params, Connection};
    use scopy_core::clipboard::ClipboardItemType;
    use scopy_core::search::{SearchMode, SearchRequest, SortMode};
    use uuid::Uuid;

    use super::*;

    fn seed_db() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("clipboard.sqlite3");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE clipboard_items (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                content_hash TEXT NOT NULL UNIQUE,
                plain_text TEXT NOT NULL,
                note TEXT,
                app_bundle_id TEXT,
                created_at REAL NOT NULL,
                last_used_at REAL NOT NULL,
                use_count INTEGER NOT NULL DEFAULT 1,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                file_size_bytes INTEGER,
                storage_ref TEXT,
                raw_data BLOB
            );
            CREATE TABLE scopy_meta (
                id INTEGER PRIMARY KEY,
                item_count INTEGER NOT NULL,
                unpinned_count INTEGER NOT NULL,
                total_size_bytes INTEGER NOT NULL,
                mutation_seq INTEGER NOT NULL
            );
            INSERT INTO scopy_meta (id, item_count, unpinned_count, total_size_bytes, mutation_seq)
                VALUES (1, 0, 0, 0, 0);
            CREATE VIRTUAL TABLE clipboard_fts USING fts5(id UNINDEXED, plain_text, note, tokenize='unicode61');",
        )
        .unwrap();

        let insert = |text: &str, pinned: bool| {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO clipboard_items (id, type, content_hash, plain_text, note, app_bundle_id,
                    created_at, last_used_at, use_count, is_pinned, size_bytes, file_size_bytes)
                 VALUES (?1, 'text', ?2, ?3, NULL, NULL, 0, 0, 1, ?4, ?5, NULL)",
                params![id, id, text, pinned, text.len() as i64],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO clipboard_fts (id, plain_text, note) VALUES (?1, ?2, '')",
                params![id, text],
            )
            .unwrap();
        };
        insert("Hello World", false);
        insert("hello there", false);
        insert("completely unrelated", false);
        drop(conn);
        dir
    }

    fn db_path(dir: &tempfile::TempDir) -> String {
        dir.path().join("clipboard.sqlite3").to_str().unwrap().to_string()
    }

    #[test]
    fn fuzzy_search_ranks_exact_substring_match_first() {
        let dir = seed_db();
        let mut engine = SearchEngine::open(&db_path(&dir)).unwrap();

        let mut request = SearchRequest::new("hello", SearchMode::Fuzzy);
        request.sort = SortMode::Relevance;
        let page = engine.search(&request, 0.0).unwrap();

        assert!(page.items.len() >= 2);
        assert!(page.items[0].preview.contains("Hello World"));
    }

    #[test]
    fn regex_dot_star_matches_every_item_respecting_limit() {
        let dir = seed_db();
        let mut engine = SearchEngine::open(&db_path(&dir)).unwrap();

        let mut request = SearchRequest::new(".*", SearchMode::Regex);
        request.limit = 2;
        let page = engine.search(&request, 0.0).unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 3);
        assert!(page.has_more);
    }

    #[test]
    fn full_fuzzy_search_only_returns_items_containing_every_query_character() {
        let dir = seed_db();
        let mut engine = SearchEngine::open(&db_path(&dir)).unwrap();

        let request = SearchRequest::new("xyz123", SearchMode::Fuzzy);
        let page = engine.search(&request, 0.0).unwrap();
        assert!(page.items.is_empty());
    }

    #[test]
    fn empty_query_behaves_like_fetch_recent() {
        let dir = seed_db();
        let mut engine = SearchEngine::open(&db_path(&dir)).unwrap();

        let request = SearchRequest::new("", SearchMode::Fuzzy);
        let page = engine.search(&request, 0.0).unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(!page.has_more);
    }

    #[test]
    fn zero_limit_returns_empty_page_without_more() {
        let dir = seed_db();
        let mut engine = SearchEngine::open(&db_path(&dir)).unwrap();

        let mut request = SearchRequest::new("hello", SearchMode::Fuzzy);
        request.limit = 0;
        let page = engine.search(&request, 0.0).unwrap();
        assert!(page.items.is_empty());
        assert!(!page.has_more);
    }

    #[test]
    fn type_filter_excludes_non_matching_items() {
        let dir = seed_db();
        let mut engine = SearchEngine::open(&db_path(&dir)).unwrap();

        let mut request = SearchRequest::new("hello", SearchMode::Fuzzy);
        request.type_filter = Some(scopy_core::search::TypeFilter::Single(ClipboardItemType::Image));
        let page = engine.search(&request, 0.0).unwrap();
        assert!(page.items.is_empty());
    }
}
