use std::path::PathBuf;

use super::item_type::ClipboardItemType;
use crate::ids::ContentHash;

/// Where the payload bytes for an ingested [`ClipboardContent`] live.
#[derive(Debug, Clone)]
pub enum PayloadSource {
    /// Small payload carried inline in memory.
    Inline(Vec<u8>),
    /// Payload already materialized as a file by the monitor (e.g. a
    /// dropped file, or a spooled video/document).
    ExternalFile(PathBuf),
    /// No payload bytes (metadata-only entries such as plain text whose
    /// canonical form is the text itself).
    None,
}

impl PayloadSource {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// A record produced by the (external) clipboard monitor, about to be
/// ingested by [`crate::ports::monitor::MonitorPort`] consumers.
#[derive(Debug, Clone)]
pub struct ClipboardContent {
    pub item_type: ClipboardItemType,
    pub plain_text: String,
    pub payload: PayloadSource,
    pub app_bundle_id: Option<String>,
    pub content_hash: ContentHash,
    pub declared_size_bytes: i64,
    pub file_size_bytes: Option<i64>,
}

impl ClipboardContent {
    pub fn text(plain_text: impl Into<String>, content_hash: ContentHash) -> Self {
        let plain_text = plain_text.into();
        let declared_size_bytes = plain_text.len() as i64;
        Self {
            item_type: ClipboardItemType::Text,
            plain_text,
            payload: PayloadSource::None,
            app_bundle_id: None,
            content_hash,
            declared_size_bytes,
            file_size_bytes: None,
        }
    }
}
