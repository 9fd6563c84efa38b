//! Owns the single writable SQLite connection: migrations, the main table,
//! the FTS shadow tables, and the transactional write API (spec §4.2).
//! Grounded on the `HistoryDatabase` shape (a `Mutex<Connection>` plus
//! narrow, parameterized methods) used throughout the pack's other
//! clipboard-manager examples.

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Row};
use scopy_core::clipboard::{ClipboardItemType, StorageLocation, StoredItem};
use scopy_core::ids::{ContentHash, ItemId};
use tracing::{debug, instrument, warn};

use crate::error::{StorageError, StorageResult};
use crate::schema;

#[derive(Debug, Clone, Copy, Default)]
pub struct MetaCounters {
    pub item_count: i64,
    pub unpinned_count: i64,
    pub total_size_bytes: i64,
    pub mutation_seq: i64,
}

pub struct Repository {
    conn: Mutex<Connection>,
    trigram_available: bool,
}

/// Applies the Repository's open-time PRAGMA tuning (spec §4.2): WAL
/// journaling, relaxed sync, a small busy timeout, a large page cache, a
/// memory-resident temp store, and a generous mmap window.
fn tune_connection(conn: &Connection, writable: bool) -> StorageResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "busy_timeout", 500i64)?;
    conn.pragma_update(None, "cache_size", -64_000i64)?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 256i64 * 1024 * 1024)?;
    if !writable {
        conn.pragma_update(None, "query_only", true)?;
    }
    Ok(())
}

impl Repository {
    #[instrument(skip(path), fields(path = %path))]
    pub fn open(path: &str) -> StorageResult<Self> {
        let mut conn = Connection::open(path)?;
        tune_connection(&conn, true)?;
        let trigram_available = schema::migrate(&mut conn)?;
        debug!(trigram_available, "repository opened");
        Ok(Self {
            conn: Mutex::new(conn),
            trigram_available,
        })
    }

    pub fn trigram_available(&self) -> bool {
        self.trigram_available
    }

    /// Runs `body` inside a `BEGIN IMMEDIATE` transaction, bumping
    /// `mutation_seq` exactly once on success regardless of how many rows
    /// `body` touches. On any error the transaction rolls back; if the
    /// rollback itself fails the repository is reported corrupted so the
    /// caller can reopen it.
    fn write_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let result = f(&tx);
        match result {
            Ok(value) => {
                tx.execute("UPDATE scopy_meta SET mutation_seq = mutation_seq + 1 WHERE id = 1", [])?;
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "rollback failed, repository is corrupted");
                    return Err(StorageError::Corrupted(rollback_err.to_string()));
                }
                Err(err)
            }
        }
    }

    pub fn meta_counters(&self) -> StorageResult<MetaCounters> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT item_count, unpinned_count, total_size_bytes, mutation_seq FROM scopy_meta WHERE id = 1",
            [],
            |row| {
                Ok(MetaCounters {
                    item_count: row.get(0)?,
                    unpinned_count: row.get(1)?,
                    total_size_bytes: row.get(2)?,
                    mutation_seq: row.get(3)?,
                })
            },
        )
        .map_err(Into::into)
    }

    pub fn find_by_hash(&self, hash: &ContentHash) -> StorageResult<Option<StoredItem>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE content_hash = ?1"),
            params![hash.as_str()],
            row_to_item,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn get_by_id(&self, id: &ItemId) -> StorageResult<Option<StoredItem>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            params![id.to_string()],
            row_to_item,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Inserts a brand-new row. Callers must have already checked that no
    /// live row shares `item.content_hash` (see `StorageService::upsert`).
    #[instrument(skip(self, item), fields(content_hash = %item.content_hash))]
    pub fn insert(&self, item: &StoredItem) -> StorageResult<()> {
        self.write_transaction(|tx| {
            let (storage_ref, raw_data) = storage_columns(&item.storage);
            tx.execute(
                "INSERT INTO clipboard_items
                    (id, type, content_hash, plain_text, note, app_bundle_id,
                     created_at, last_used_at, use_count, is_pinned, size_bytes,
                     file_size_bytes, storage_ref, raw_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    item.id.to_string(),
                    item.item_type.as_str(),
                    item.content_hash.as_str(),
                    item.plain_text,
                    item.note,
                    item.app_bundle_id,
                    item.created_at,
                    item.last_used_at,
                    item.use_count,
                    item.is_pinned,
                    item.size_bytes,
                    item.file_size_bytes,
                    storage_ref,
                    raw_data,
                ],
            )?;
            Ok(())
        })
    }

    /// Re-ingestion path: bumps `last_used_at`/`use_count` on the existing
    /// row for `hash` and returns the refreshed row.
    pub fn touch_usage(&self, hash: &ContentHash, now: f64) -> StorageResult<StoredItem> {
        self.write_transaction(|tx| {
            tx.execute(
                "UPDATE clipboard_items SET last_used_at = ?1, use_count = use_count + 1 WHERE content_hash = ?2",
                params![now, hash.as_str()],
            )?;
            tx.query_row(
                &format!("{SELECT_COLUMNS} WHERE content_hash = ?1"),
                params![hash.as_str()],
                row_to_item,
            )
            .map_err(Into::into)
        })
    }

    pub fn set_pinned(&self, id: &ItemId, pinned: bool) -> StorageResult<()> {
        self.write_transaction(|tx| {
            tx.execute(
                "UPDATE clipboard_items SET is_pinned = ?1 WHERE id = ?2",
                params![pinned, id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn update_note(&self, id: &ItemId, note: Option<&str>) -> StorageResult<()> {
        self.write_transaction(|tx| {
            tx.execute(
                "UPDATE clipboard_items SET note = ?1 WHERE id = ?2",
                params![note, id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn touch_last_used(&self, id: &ItemId, now: f64) -> StorageResult<()> {
        self.write_transaction(|tx| {
            tx.execute(
                "UPDATE clipboard_items SET last_used_at = ?1, use_count = use_count + 1 WHERE id = ?2",
                params![now, id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Rewrites a row's payload and searchable text in one transaction
    /// (used by image optimization and PNG pre-ingest recompression).
    #[allow(clippy::too_many_arguments)]
    pub fn update_payload(
        &self,
        id: &ItemId,
        content_hash: &ContentHash,
        plain_text: &str,
        size_bytes: i64,
        storage: &StorageLocation,
    ) -> StorageResult<()> {
        self.write_transaction(|tx| {
            let (storage_ref, raw_data) = storage_columns(storage);
            tx.execute(
                "UPDATE clipboard_items SET content_hash = ?1, plain_text = ?2, size_bytes = ?3,
                    storage_ref = ?4, raw_data = ?5 WHERE id = ?6",
                params![
                    content_hash.as_str(),
                    plain_text,
                    size_bytes,
                    storage_ref,
                    raw_data,
                    id.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn set_file_size_bytes(&self, id: &ItemId, file_size_bytes: i64) -> StorageResult<()> {
        self.write_transaction(|tx| {
            tx.execute(
                "UPDATE clipboard_items SET file_size_bytes = ?1 WHERE id = ?2",
                params![file_size_bytes, id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn delete_by_id(&self, id: &ItemId) -> StorageResult<()> {
        self.write_transaction(|tx| {
            tx.execute("DELETE FROM clipboard_items WHERE id = ?1", params![id.to_string()])?;
            Ok(())
        })
    }

    /// Deletes rows in batches of at most ~1000 ids per statement (spec
    /// §4.2). Returns the `storage_ref`s of deleted rows so the caller can
    /// remove the backing blob files.
    pub fn delete_by_ids(&self, ids: &[ItemId]) -> StorageResult<Vec<String>> {
        const BATCH: usize = 1000;
        let mut removed_refs = Vec::new();
        for chunk in ids.chunks(BATCH) {
            let refs = self.write_transaction(|tx| {
                let mut refs = Vec::new();
                for id in chunk {
                    if let Some(r) = tx
                        .query_row(
                            "SELECT storage_ref FROM clipboard_items WHERE id = ?1",
                            params![id.to_string()],
                            |row| row.get::<_, Option<String>>(0),
                        )
                        .optional()?
                        .flatten()
                    {
                        refs.push(r);
                    }
                    tx.execute("DELETE FROM clipboard_items WHERE id = ?1", params![id.to_string()])?;
                }
                Ok(refs)
            })?;
            removed_refs.extend(refs);
        }
        Ok(removed_refs)
    }

    /// Deletes every unpinned row, returning their `storage_ref`s.
    pub fn clear_all_except_pinned(&self) -> StorageResult<Vec<String>> {
        self.write_transaction(|tx| {
            let refs = {
                let mut stmt =
                    tx.prepare("SELECT storage_ref FROM clipboard_items WHERE is_pinned = 0 AND storage_ref IS NOT NULL")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?
                    .filter_map(Result::ok)
                    .collect::<Vec<_>>();
                rows
            };
            tx.execute("DELETE FROM clipboard_items WHERE is_pinned = 0", [])?;
            Ok(refs)
        })
    }

    pub fn list_recent(&self, limit: i64, offset: i64) -> StorageResult<Vec<StoredItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} ORDER BY is_pinned DESC, last_used_at DESC, id LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt
            .query_map(params![limit, offset], row_to_item)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_external_files(&self) -> StorageResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM clipboard_items WHERE storage_ref IS NOT NULL",
            [],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    pub fn counts_by_type(&self) -> StorageResult<Vec<(ClipboardItemType, i64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT type, COUNT(*) FROM clipboard_items GROUP BY type")?;
        let rows = stmt
            .query_map([], |row| {
                let ty: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((ClipboardItemType::parse(&ty).unwrap_or(ClipboardItemType::Other), count))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_recent_apps(&self, limit: i64) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT app_bundle_id FROM (
                SELECT app_bundle_id, MAX(last_used_at) AS m FROM clipboard_items
                WHERE app_bundle_id IS NOT NULL GROUP BY app_bundle_id
             ) ORDER BY m DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Rows with a non-null `storage_ref`, for derived-size reconciliation
    /// (spec §4.4).
    pub fn list_external_rows(&self) -> StorageResult<Vec<(ItemId, String, i64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, storage_ref, size_bytes FROM clipboard_items WHERE storage_ref IS NOT NULL",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let storage_ref: String = row.get(1)?;
                let size_bytes: i64 = row.get(2)?;
                Ok((ItemId::parse(&id).expect("stored id is always a valid uuid"), storage_ref, size_bytes))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn reconcile_sizes(&self, updates: &[(ItemId, i64)]) -> StorageResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.write_transaction(|tx| {
            for (id, size_bytes) in updates {
                tx.execute(
                    "UPDATE clipboard_items SET size_bytes = ?1 WHERE id = ?2",
                    params![size_bytes, id.to_string()],
                )?;
            }
            Ok(())
        })
    }

    /// All `storage_ref` basenames currently referenced by a live row, used
    /// by the orphan-file sweep.
    pub fn referenced_storage_refs(&self) -> StorageResult<std::collections::HashSet<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT storage_ref FROM clipboard_items WHERE storage_ref IS NOT NULL")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(Result::ok)
            .collect();
        Ok(rows)
    }

    /// Plans a count-budget cleanup: the oldest-by-`last_used_at` unpinned
    /// rows beyond `max_items`.
    pub fn plan_excess_count(&self, max_items: i64, images_only: bool) -> StorageResult<Vec<ItemId>> {
        let conn = self.conn.lock().unwrap();
        let type_filter = if images_only { "AND type = 'image'" } else { "" };
        let sql = format!(
            "SELECT id FROM clipboard_items WHERE is_pinned = 0 {type_filter}
             ORDER BY last_used_at DESC LIMIT -1 OFFSET ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![max_items.max(0)], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok().and_then(|s| ItemId::parse(&s)))
            .collect();
        Ok(rows)
    }

    pub fn plan_age_cutoff(&self, cutoff_unix_seconds: f64, images_only: bool) -> StorageResult<Vec<ItemId>> {
        let conn = self.conn.lock().unwrap();
        let type_filter = if images_only { "AND type = 'image'" } else { "" };
        let sql = format!(
            "SELECT id FROM clipboard_items WHERE is_pinned = 0 AND last_used_at < ?1 {type_filter}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![cutoff_unix_seconds], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok().and_then(|s| ItemId::parse(&s)))
            .collect();
        Ok(rows)
    }

    /// Plans a total-size-budget cleanup over a bounded scan window
    /// (oldest-first among unpinned rows), stopping once the running
    /// remaining total would fit under `max_bytes`.
    pub fn plan_size_excess(&self, max_bytes: i64, window: i64, images_only: bool) -> StorageResult<Vec<ItemId>> {
        let conn = self.conn.lock().unwrap();
        let type_filter = if images_only { "AND type = 'image'" } else { "" };
        let total: i64 = conn.query_row("SELECT total_size_bytes FROM scopy_meta WHERE id = 1", [], |r| r.get(0))?;
        if total <= max_bytes {
            return Ok(Vec::new());
        }
        let mut to_free = total - max_bytes;
        let sql = format!(
            "SELECT id, size_bytes FROM clipboard_items WHERE is_pinned = 0 {type_filter}
             ORDER BY last_used_at ASC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut ids = Vec::new();
        let rows = stmt.query_map(params![window], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            if to_free <= 0 {
                break;
            }
            let (id, size) = row?;
            if let Some(id) = ItemId::parse(&id) {
                ids.push(id);
                to_free -= size;
            }
        }
        Ok(ids)
    }

    /// Plans removal of the oldest external-blob rows beyond `max_files`,
    /// bounded to a window of ~5000 candidates (spec §4.2).
    pub fn plan_external_storage_excess(&self, max_files: i64, images_only: bool) -> StorageResult<Vec<ItemId>> {
        const WINDOW: i64 = 5_000;
        let conn = self.conn.lock().unwrap();
        let type_filter = if images_only { "AND type = 'image'" } else { "" };
        let sql = format!(
            "SELECT id FROM clipboard_items WHERE is_pinned = 0 AND storage_ref IS NOT NULL {type_filter}
             ORDER BY last_used_at DESC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let all: Vec<String> = stmt
            .query_map(params![WINDOW], |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;
        Ok(all
            .into_iter()
            .skip(max_files.max(0) as usize)
            .filter_map(|s| ItemId::parse(&s))
            .collect())
    }

    /// Incremental vacuum of at most `pages` freelist pages, plus a passive
    /// WAL checkpoint (spec §4.4 "full" cleanup).
    pub fn incremental_vacuum_and_checkpoint(&self, pages: i64) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("PRAGMA incremental_vacuum")?;
        let _ = pages; // `incremental_vacuum(N)` needs a literal; batch form vacuums what's due.
        conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
        Ok(())
    }
}

const SELECT_COLUMNS: &str = "SELECT id, type, content_hash, plain_text, note, app_bundle_id,
    created_at, last_used_at, use_count, is_pinned, size_bytes, file_size_bytes,
    storage_ref, raw_data FROM clipboard_items";

fn storage_columns(storage: &StorageLocation) -> (Option<&str>, Option<&[u8]>) {
    match storage {
        StorageLocation::Inline(bytes) => (None, Some(bytes.as_slice())),
        StorageLocation::External(path) => (Some(path.as_str()), None),
        StorageLocation::None => (None, None),
    }
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<StoredItem> {
    let id: String = row.get(0)?;
    let item_type: String = row.get(1)?;
    let content_hash: String = row.get(2)?;
    let storage_ref: Option<String> = row.get(12)?;
    let raw_data: Option<Vec<u8>> = row.get(13)?;
    let storage = match (storage_ref, raw_data) {
        (Some(path), _) => StorageLocation::External(path),
        (None, Some(bytes)) => StorageLocation::Inline(bytes),
        (None, None) => StorageLocation::None,
    };
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
        storage,
    })
}
