mod content;
mod item_type;
mod stored_item;

pub use content::{ClipboardContent, PayloadSource};
pub use item_type::ClipboardItemType;
pub use stored_item::{synthesize_plain_text, StorageLocation, StoredItem};
