use serde::{Deserialize, Serialize};

use crate::clipboard::{ClipboardItemType, StoredItem};
use crate::ids::ItemId;

/// Outward-facing view of a [`StoredItem`], shaped for the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardItemDto {
    pub id: String,
    pub item_type: ClipboardItemType,
    pub preview: String,
    pub note: Option<String>,
    pub app_bundle_id: Option<String>,
    pub created_at: f64,
    pub last_used_at: f64,
    pub use_count: i64,
    pub is_pinned: bool,
    pub size_bytes: i64,
    pub file_size_bytes: Option<i64>,
    pub has_thumbnail: bool,
}

impl From<&StoredItem> for ClipboardItemDto {
    fn from(item: &StoredItem) -> Self {
        Self {
            id: item.id.to_string(),
            item_type: item.item_type,
            preview: item.plain_text.clone(),
            note: item.note.clone(),
            app_bundle_id: item.app_bundle_id.clone(),
            created_at: item.created_at,
            last_used_at: item.last_used_at,
            use_count: item.use_count,
            is_pinned: item.is_pinned,
            size_bytes: item.size_bytes,
            file_size_bytes: item.file_size_bytes,
            has_thumbnail: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageStats {
    pub item_count: i64,
    pub size_bytes: i64,
}

#[derive(Debug, Clone)]
pub struct DetailedStorageStats {
    pub item_count: i64,
    pub unpinned_count: i64,
    pub size_bytes: i64,
    pub external_file_count: i64,
    pub by_type: Vec<(ClipboardItemType, i64)>,
}

/// Outcome of [`crate::ports::StorageContract::optimize_image`] (see
/// SPEC_FULL.md's "[SUPPLEMENT] optimize_image operation").
#[derive(Debug, Clone)]
pub enum OptimizationOutcome {
    Optimized { old_size: i64, new_size: i64 },
    Unchanged,
    Skipped(String),
}

/// Identifies an item for event-stream purposes without pulling in the
/// full DTO.
pub type EventItemId = ItemId;
