use scopy_core::clipboard::{ClipboardItemType, StoredItem};
use scopy_core::dto::ClipboardItemDto;
use scopy_core::ids::ItemId;

/// In-memory index entry: lowercased `plain_text ++ "\n" ++ note` plus the
/// metadata ranking needs (spec §3 "Index entities"), carrying the outward
/// [`ClipboardItemDto`] so a match can be returned without a DB round trip.
#[derive(Debug, Clone)]
pub struct IndexedItem {
    pub id: ItemId,
    pub text: String,
    pub is_pinned: bool,
    pub last_used_at: f64,
    pub item_type: ClipboardItemType,
    pub app_bundle_id: Option<String>,
    pub dto: ClipboardItemDto,
}

impl IndexedItem {
    pub fn matches_filters(&self, app_filter: Option<&str>, type_filter: Option<&scopy_core::search::TypeFilter>) -> bool {
        if let Some(app) = app_filter {
            if self.app_bundle_id.as_deref() != Some(app) {
                return false;
            }
        }
        if let Some(filter) = type_filter {
            if !filter.matches(self.item_type) {
                return false;
            }
        }
        true
    }
}

impl From<&StoredItem> for IndexedItem {
    fn from(item: &StoredItem) -> Self {
        Self {
            id: item.id,
            text: item.searchable_text(),
            is_pinned: item.is_pinned,
            last_used_at: item.last_used_at,
            item_type: item.item_type,
            app_bundle_id: item.app_bundle_id.clone(),
            dto: ClipboardItemDto::from(item),
        }
    }
}
