use async_trait::async_trait;

use crate::settings::SettingsDto;

/// Opaque, externally owned settings persistence (spec §6). The core only
/// needs load/save; the file format is the caller's business.
#[async_trait]
pub trait SettingsStorePort: Send + Sync {
    async fn load(&self) -> anyhow::Result<SettingsDto>;

    async fn save(&self, settings: &SettingsDto) -> anyhow::Result<()>;
}
