use async_trait::async_trait;

/// Uniform "produce PNG bytes at max side `max_height`" contract over the
/// three backends named in spec §6 (image decoder, video frame extractor,
/// QuickLook-style fallback). Always invoked off the service actor.
#[async_trait]
pub trait ThumbnailerPort: Send + Sync {
    async fn from_image_bytes(&self, bytes: &[u8], max_height: u32) -> anyhow::Result<Vec<u8>>;

    async fn from_file_path(&self, path: &str, max_height: u32) -> anyhow::Result<Vec<u8>>;

    async fn from_video_url(&self, url: &str, max_height: u32) -> anyhow::Result<Vec<u8>>;

    /// QuickLook-style fallback used for file items whose type doesn't fit
    /// the other two backends.
    async fn fallback(&self, path: &str, max_height: u32) -> anyhow::Result<Vec<u8>>;
}
