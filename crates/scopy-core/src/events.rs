use std::path::PathBuf;

use crate::dto::ClipboardItemDto;
use crate::ids::ItemId;

/// Events emitted by the service actor after a state-changing operation has
/// already been applied to storage and search (see spec §5 ordering
/// guarantee). The event stream never carries errors.
#[derive(Debug, Clone)]
pub enum ClipboardEvent {
    NewItem(ClipboardItemDto),
    ItemUpdated(ClipboardItemDto),
    ItemContentUpdated(ClipboardItemDto),
    ItemPinned(ItemId),
    ItemUnpinned(ItemId),
    ItemDeleted(ItemId),
    ItemsCleared { keep_pinned: bool },
    ThumbnailUpdated { id: ItemId, path: PathBuf },
    SettingsChanged,
}
