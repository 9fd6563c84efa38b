//! Sequential, idempotent schema migrations gated on a stored version number
//! (spec §4.2). `clipboard_items`'s primary key is a text UUID rather than an
//! integer rowid, so the FTS shadow tables can't use FTS5's native
//! `content=`/`content_rowid=` external-content mode; instead the shadow
//! rows are kept in lockstep by ordinary triggers, keyed on `id`.

use rusqlite::{Connection, Transaction};
use tracing::{info, warn};

use crate::error::StorageResult;

pub const CURRENT_SCHEMA_VERSION: i64 = 3;

pub fn current_version(conn: &Connection) -> StorageResult<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(Into::into)
}

fn set_version(tx: &Transaction<'_>, version: i64) -> StorageResult<()> {
    tx.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Runs every migration step between the on-disk version and
/// [`CURRENT_SCHEMA_VERSION`], each in its own transaction. Returns whether
/// the trigram FTS5 tokenizer was available (it is optional and a missing
/// tokenizer must not fail the migration).
pub fn migrate(conn: &mut Connection) -> StorageResult<bool> {
    let mut version = current_version(conn)?;
    info!(version, target = CURRENT_SCHEMA_VERSION, "running migrations");

    if version < 1 {
        let tx = conn.transaction()?;
        migrate_v1_base_schema(&tx)?;
        set_version(&tx, 1)?;
        tx.commit()?;
        version = 1;
    }
    if version < 2 {
        let tx = conn.transaction()?;
        migrate_v2_note_and_file_size(&tx)?;
        set_version(&tx, 2)?;
        tx.commit()?;
        version = 2;
    }
    let trigram_available = if version < 3 {
        let tx = conn.transaction()?;
        let available = migrate_v3_trigram_fts(&tx);
        set_version(&tx, 3)?;
        tx.commit()?;
        available
    } else {
        trigram_table_exists(conn)?
    };

    verify_tables(conn)?;
    Ok(trigram_available)
}

fn migrate_v1_base_schema(tx: &Transaction<'_>) -> StorageResult<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS clipboard_items (
            id              TEXT PRIMARY KEY,
            type            TEXT NOT NULL,
            content_hash    TEXT NOT NULL,
            plain_text      TEXT NOT NULL,
            app_bundle_id   TEXT,
            created_at      REAL NOT NULL,
            last_used_at    REAL NOT NULL,
            use_count       INTEGER NOT NULL DEFAULT 1,
            is_pinned       INTEGER NOT NULL DEFAULT 0,
            size_bytes      INTEGER NOT NULL DEFAULT 0,
            storage_ref     TEXT,
            raw_data        BLOB
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_clipboard_items_content_hash
            ON clipboard_items(content_hash);
        CREATE INDEX IF NOT EXISTS idx_clipboard_items_created_at
            ON clipboard_items(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_clipboard_items_last_used_at
            ON clipboard_items(last_used_at DESC);
        CREATE INDEX IF NOT EXISTS idx_clipboard_items_pinned_recent
            ON clipboard_items(is_pinned DESC, last_used_at DESC, id);
        CREATE INDEX IF NOT EXISTS idx_clipboard_items_type
            ON clipboard_items(type);
        CREATE INDEX IF NOT EXISTS idx_clipboard_items_app
            ON clipboard_items(app_bundle_id);
        CREATE INDEX IF NOT EXISTS idx_clipboard_items_app_recent
            ON clipboard_items(app_bundle_id, last_used_at DESC);
        CREATE INDEX IF NOT EXISTS idx_clipboard_items_type_recent
            ON clipboard_items(type, last_used_at DESC);

        CREATE TABLE IF NOT EXISTS scopy_meta (
            id                INTEGER PRIMARY KEY CHECK (id = 1),
            item_count        INTEGER NOT NULL DEFAULT 0,
            unpinned_count    INTEGER NOT NULL DEFAULT 0,
            total_size_bytes  INTEGER NOT NULL DEFAULT 0,
            mutation_seq      INTEGER NOT NULL DEFAULT 0
        );
        INSERT OR IGNORE INTO scopy_meta (id, item_count, unpinned_count, total_size_bytes, mutation_seq)
            VALUES (1, 0, 0, 0, 0);

        CREATE VIRTUAL TABLE IF NOT EXISTS clipboard_fts USING fts5(
            id UNINDEXED,
            plain_text,
            note,
            tokenize = 'unicode61 remove_diacritics 2'
        );

        CREATE TRIGGER IF NOT EXISTS clipboard_items_ai AFTER INSERT ON clipboard_items BEGIN
            UPDATE scopy_meta SET
                item_count = item_count + 1,
                unpinned_count = unpinned_count + (CASE WHEN NEW.is_pinned = 0 THEN 1 ELSE 0 END),
                total_size_bytes = total_size_bytes + NEW.size_bytes
            WHERE id = 1;
            INSERT INTO clipboard_fts(id, plain_text, note) VALUES (NEW.id, NEW.plain_text, NULL);
        END;

        CREATE TRIGGER IF NOT EXISTS clipboard_items_ad AFTER DELETE ON clipboard_items BEGIN
            UPDATE scopy_meta SET
                item_count = item_count - 1,
                unpinned_count = unpinned_count - (CASE WHEN OLD.is_pinned = 0 THEN 1 ELSE 0 END),
                total_size_bytes = total_size_bytes - OLD.size_bytes
            WHERE id = 1;
            DELETE FROM clipboard_fts WHERE id = OLD.id;
        END;

        CREATE TRIGGER IF NOT EXISTS clipboard_items_au_size AFTER UPDATE OF size_bytes ON clipboard_items
        WHEN NEW.size_bytes IS NOT OLD.size_bytes BEGIN
            UPDATE scopy_meta SET
                total_size_bytes = total_size_bytes + (NEW.size_bytes - OLD.size_bytes)
            WHERE id = 1;
        END;

        CREATE TRIGGER IF NOT EXISTS clipboard_items_au_pinned AFTER UPDATE OF is_pinned ON clipboard_items
        WHEN NEW.is_pinned IS NOT OLD.is_pinned BEGIN
            UPDATE scopy_meta SET
                unpinned_count = unpinned_count + (CASE WHEN NEW.is_pinned = 0 THEN 1 ELSE -1 END)
            WHERE id = 1;
        END;

        CREATE TRIGGER IF NOT EXISTS clipboard_items_au_text AFTER UPDATE OF plain_text ON clipboard_items
        WHEN NEW.plain_text IS NOT OLD.plain_text BEGIN
            DELETE FROM clipboard_fts WHERE id = NEW.id;
            INSERT INTO clipboard_fts(id, plain_text, note) VALUES (NEW.id, NEW.plain_text, NULL);
        END;
        "#,
    )?;
    Ok(())
}

fn migrate_v2_note_and_file_size(tx: &Transaction<'_>) -> StorageResult<()> {
    // SQLite can't add a column that already exists; the version gate above
    // already ensures this body runs at most once, but an extra guard keeps
    // the step safe to replay against a hand-edited database.
    let has_note = column_exists(tx, "clipboard_items", "note")?;
    if !has_note {
        tx.execute_batch(
            r#"
            ALTER TABLE clipboard_items ADD COLUMN note TEXT;
            ALTER TABLE clipboard_items ADD COLUMN file_size_bytes INTEGER;

            DROP TRIGGER IF EXISTS clipboard_items_ai;
            CREATE TRIGGER clipboard_items_ai AFTER INSERT ON clipboard_items BEGIN
                UPDATE scopy_meta SET
                    item_count = item_count + 1,
                    unpinned_count = unpinned_count + (CASE WHEN NEW.is_pinned = 0 THEN 1 ELSE 0 END),
                    total_size_bytes = total_size_bytes + NEW.size_bytes
                WHERE id = 1;
                INSERT INTO clipboard_fts(id, plain_text, note) VALUES (NEW.id, NEW.plain_text, NEW.note);
            END;

            DROP TRIGGER IF EXISTS clipboard_items_au_text;
            CREATE TRIGGER clipboard_items_au_text AFTER UPDATE OF plain_text, note ON clipboard_items
            WHEN NEW.plain_text IS NOT OLD.plain_text OR NEW.note IS NOT OLD.note BEGIN
                DELETE FROM clipboard_fts WHERE id = NEW.id;
                INSERT INTO clipboard_fts(id, plain_text, note) VALUES (NEW.id, NEW.plain_text, NEW.note);
            END;
            "#,
        )?;
    }
    Ok(())
}

/// Trigram FTS is an optional accelerant (spec §4.2); if the build of
/// SQLite bundled doesn't carry the trigram tokenizer, this falls back
/// silently and `SearchEngine` is expected to detect the absence.
fn migrate_v3_trigram_fts(tx: &Transaction<'_>) -> bool {
    let attempt = tx.execute_batch(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS clipboard_fts_trigram USING fts5(
            id UNINDEXED,
            plain_text,
            note,
            tokenize = 'trigram'
        );

        DROP TRIGGER IF EXISTS clipboard_items_ai_trigram;
        CREATE TRIGGER clipboard_items_ai_trigram AFTER INSERT ON clipboard_items BEGIN
            INSERT INTO clipboard_fts_trigram(id, plain_text, note) VALUES (NEW.id, NEW.plain_text, NEW.note);
        END;

        DROP TRIGGER IF EXISTS clipboard_items_ad_trigram;
        CREATE TRIGGER clipboard_items_ad_trigram AFTER DELETE ON clipboard_items BEGIN
            DELETE FROM clipboard_fts_trigram WHERE id = OLD.id;
        END;

        DROP TRIGGER IF EXISTS clipboard_items_au_text_trigram;
        CREATE TRIGGER clipboard_items_au_text_trigram AFTER UPDATE OF plain_text, note ON clipboard_items
        WHEN NEW.plain_text IS NOT OLD.plain_text OR NEW.note IS NOT OLD.note BEGIN
            DELETE FROM clipboard_fts_trigram WHERE id = NEW.id;
            INSERT INTO clipboard_fts_trigram(id, plain_text, note) VALUES (NEW.id, NEW.plain_text, NEW.note);
        END;
        "#,
    );

    match attempt {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "trigram FTS5 tokenizer unavailable, falling back to unicode61 only");
            false
        }
    }
}

fn column_exists(tx: &Transaction<'_>, table: &str, column: &str) -> StorageResult<bool> {
    let mut stmt = tx.prepare(&format!("PRAGMA table_info({table})"))?;
    let found = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(Result::ok)
        .any(|name| name == column);
    Ok(found)
}

fn trigram_table_exists(conn: &Connection) -> StorageResult<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='clipboard_fts_trigram')",
        [],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn verify_tables(conn: &Connection) -> StorageResult<()> {
    for table in ["clipboard_items", "scopy_meta", "clipboard_fts"] {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = ?1)",
            [table],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(crate::error::StorageError::Corrupted(format!(
                "expected table `{table}` missing after migration"
            )));
        }
    }
    Ok(())
}
