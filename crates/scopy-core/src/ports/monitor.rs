use async_trait::async_trait;

use crate::clipboard::ClipboardItemType;

/// External collaborator that watches the OS pasteboard and can write back
/// to it. Out of scope per spec §1; this is only the seam the service actor
/// calls through.
#[async_trait]
pub trait MonitorPort: Send + Sync {
    /// Starts watching and returns the channel new content arrives on.
    async fn start(&self, polling_interval_ms: u64) -> anyhow::Result<tokio::sync::mpsc::Receiver<crate::clipboard::ClipboardContent>>;

    async fn stop(&self) -> anyhow::Result<()>;

    async fn write_text(&self, text: &str) -> anyhow::Result<()>;

    async fn write_bytes(&self, bytes: &[u8], item_type: ClipboardItemType) -> anyhow::Result<()>;

    async fn write_file_urls(&self, paths: &[String]) -> anyhow::Result<()>;
}
