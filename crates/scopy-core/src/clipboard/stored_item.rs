use super::item_type::ClipboardItemType;
use crate::ids::{ContentHash, ItemId};

/// Where a [`StoredItem`]'s payload bytes live on disk, if anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// Bytes are inlined in the row itself.
    Inline(Vec<u8>),
    /// Bytes live in a file under the external blob directory.
    External(String),
    /// No payload is stored (text-only or metadata-only items).
    None,
}

/// A persisted clipboard history row.
///
/// Invariants (see spec §3):
/// - `content_hash` is unique across live rows.
/// - `storage` is `External` XOR `Inline`, never both.
/// - `use_count` is always `>= 1`.
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub id: ItemId,
    pub item_type: ClipboardItemType,
    pub content_hash: ContentHash,
    pub plain_text: String,
    pub note: Option<String>,
    pub app_bundle_id: Option<String>,
    pub created_at: f64,
    pub last_used_at: f64,
    pub use_count: i64,
    pub is_pinned: bool,
    pub size_bytes: i64,
    pub file_size_bytes: Option<i64>,
    pub storage: StorageLocation,
}

impl StoredItem {
    /// Lowercased concatenation of `plain_text` and `note`, the text an
    /// [`crate::search`] index keys off.
    pub fn searchable_text(&self) -> String {
        let mut text = self.plain_text.to_lowercase();
        if let Some(note) = &self.note {
            text.push('\n');
            text.push_str(&note.to_lowercase());
        }
        text
    }

    pub fn storage_ref(&self) -> Option<&str> {
        match &self.storage {
            StorageLocation::External(path) => Some(path),
            _ => None,
        }
    }
}

/// Synthesizes the `plain_text` field for non-text items the way the
/// original app did, so "exact" search can still match on it (see
/// spec.md's "Open questions": preserved here for compatibility).
pub fn synthesize_plain_text(item_type: ClipboardItemType, width: Option<u32>, height: Option<u32>, size_bytes: i64, file_paths: &[String]) -> String {
    match item_type {
        ClipboardItemType::Image => {
            let (w, h) = (width.unwrap_or(0), height.unwrap_or(0));
            let kb = (size_bytes.max(0) as f64 / 1024.0).round() as i64;
            format!("[Image: {w}x{h}, {kb} KB]")
        }
        ClipboardItemType::File => file_paths.join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn searchable_text_joins_note_with_newline() {
        let item = StoredItem {
            id: ItemId::new(),
            item_type: ClipboardItemType::Text,
            content_hash: ContentHash::new("abc"),
            plain_text: "Hello World".into(),
            note: Some("My Note".into()),
            app_bundle_id: None,
            created_at: 0.0,
            last_used_at: 0.0,
            use_count: 1,
            is_pinned: false,
            size_bytes: 11,
            file_size_bytes: None,
            storage: StorageLocation::None,
        };
        assert_eq!(item.searchable_text(), "hello world\nmy note");
    }

    #[test]
    fn synthesize_plain_text_formats_image_metadata() {
        let text = synthesize_plain_text(ClipboardItemType::Image, Some(100), Some(50), 2048, &[]);
        assert_eq!(text, "[Image: 100x50, 2 KB]");
    }
}
