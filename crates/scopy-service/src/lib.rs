pub mod error;
pub mod service;

pub use error::{ServiceError, ServiceResult};
pub use service::{ClipboardService, ClipboardServiceConfig};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use scopy_core::clipboard::{ClipboardContent, ClipboardItemType, PayloadSource};
    use scopy_core::events::ClipboardEvent;
    use scopy_core::ids::ContentHash;
    use scopy_core::ports::{MonitorPort, SettingsStorePort, ThumbnailerPort};
    use scopy_core::search::{SearchMode, SearchRequest, SortMode};
    use scopy_core::settings::SettingsDto;
    use tokio::sync::{mpsc, Mutex};

    use super::*;

    struct FakeMonitor {
        sender: Mutex<Option<mpsc::Sender<ClipboardContent>>>,
        written_text: Mutex<Vec<String>>,
    }

    impl FakeMonitor {
        fn new() -> Self {
            Self {
                sender: Mutex::new(None),
                written_text: Mutex::new(Vec::new()),
            }
        }

        async fn push(&self, content: ClipboardContent) {
            let guard = self.sender.lock().await;
            if let Some(sender) = guard.as_ref() {
                sender.send(content).await.ok();
            }
        }
    }

    #[async_trait]
    impl MonitorPort for FakeMonitor {
        async fn start(&self, _polling_interval_ms: u64) -> anyhow::Result<mpsc::Receiver<ClipboardContent>> {
            let (tx, rx) = mpsc::channel(32);
            *self.sender.lock().await = Some(tx);
            Ok(rx)
        }

        async fn stop(&self) -> anyhow::Result<()> {
            *self.sender.lock().await = None;
            Ok(())
        }

        async fn write_text(&self, text: &str) -> anyhow::Result<()> {
            self.written_text.lock().await.push(text.to_string());
            Ok(())
        }

        async fn write_bytes(&self, _bytes: &[u8], _item_type: ClipboardItemType) -> anyhow::Result<()> {
            Ok(())
        }

        async fn write_file_urls(&self, _paths: &[String]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FakeSettingsStore {
        settings: Mutex<SettingsDto>,
    }

    impl FakeSettingsStore {
        fn new(settings: SettingsDto) -> Self {
            Self {
                settings: Mutex::new(settings),
            }
        }
    }

    #[async_trait]
    impl SettingsStorePort for FakeSettingsStore {
        async fn load(&self) -> anyhow::Result<SettingsDto> {
            Ok(self.settings.lock().await.clone())
        }

        async fn save(&self, settings: &SettingsDto) -> anyhow::Result<()> {
            *self.settings.lock().await = settings.clone();
            Ok(())
        }
    }

    struct FakeThumbnailer;

    #[async_trait]
    impl ThumbnailerPort for FakeThumbnailer {
        async fn from_image_bytes(&self, _bytes: &[u8], _max_height: u32) -> anyhow::Result<Vec<u8>> {
            Ok(vec![0x89, b'P', b'N', b'G'])
        }

        async fn from_file_path(&self, _path: &str, _max_height: u32) -> anyhow::Result<Vec<u8>> {
            Ok(vec![0x89, b'P', b'N', b'G'])
        }

        async fn from_video_url(&self, _url: &str, _max_height: u32) -> anyhow::Result<Vec<u8>> {
            Ok(vec![0x89, b'P', b'N', b'G'])
        }

        async fn fallback(&self, _path: &str, _max_height: u32) -> anyhow::Result<Vec<u8>> {
            Ok(vec![0x89, b'P', b'N', b'G'])
        }
    }

    async fn started_service(settings: SettingsDto) -> (tempfile::TempDir, Arc<ClipboardService>, Arc<FakeMonitor>) {
        let dir = tempfile::tempdir().unwrap();
        let config = ClipboardServiceConfig {
            db_path: dir.path().join("clipboard.sqlite").to_str().unwrap().to_string(),
            external_root: dir.path().join("external"),
            thumbnail_root: dir.path().join("thumbnails"),
            event_queue_capacity: 64,
        };
        let monitor = Arc::new(FakeMonitor::new());
        let settings_store = Arc::new(FakeSettingsStore::new(settings));
        let thumbnailer = Arc::new(FakeThumbnailer);
        let service = ClipboardService::new(config, monitor.clone(), settings_store, thumbnailer);
        service.start().await.unwrap();
        (dir, service, monitor)
    }

    async fn drain_event(service: &ClipboardService) -> ClipboardEvent {
        tokio::time::timeout(Duration::from_secs(2), service.events().dequeue())
            .await
            .expect("event within timeout")
            .expect("queue not finished")
    }

    #[tokio::test]
    async fn ingest_three_distinct_texts_returns_reverse_insertion_order() {
        let (_dir, service, monitor) = started_service(SettingsDto::default()).await;

        for text in ["alpha", "beta", "gamma"] {
            monitor
                .push(ClipboardContent::text(text, ContentHash::new(format!("hash-{text}"))))
                .await;
            assert!(matches!(drain_event(&service).await, ClipboardEvent::NewItem(_)));
        }

        let recent = service.fetch_recent(10, 0).await.unwrap();
        let previews: Vec<_> = recent.iter().map(|dto| dto.preview.clone()).collect();
        assert_eq!(previews, vec!["gamma", "beta", "alpha"]);

        let stats = service.get_storage_stats().await.unwrap();
        assert_eq!(stats.item_count, 3);
        assert_eq!(stats.size_bytes, 5 + 4 + 5);
    }

    #[tokio::test]
    async fn reingesting_same_hash_bumps_use_count_and_emits_item_updated() {
        let (_dir, service, monitor) = started_service(SettingsDto::default()).await;
        let hash = ContentHash::new("dup");

        monitor.push(ClipboardContent::text("alpha", hash.clone())).await;
        assert!(matches!(drain_event(&service).await, ClipboardEvent::NewItem(_)));

        monitor.push(ClipboardContent::text("alpha", hash)).await;
        match drain_event(&service).await {
            ClipboardEvent::ItemUpdated(dto) => assert_eq!(dto.use_count, 2),
            other => panic!("expected ItemUpdated, got {other:?}"),
        }

        let stats = service.get_storage_stats().await.unwrap();
        assert_eq!(stats.item_count, 1);
    }

    #[tokio::test]
    async fn image_ingest_is_dropped_when_save_images_is_disabled() {
        let mut settings = SettingsDto::default();
        settings.save_images = false;
        let (_dir, service, monitor) = started_service(settings).await;

        let content = ClipboardContent {
            item_type: ClipboardItemType::Image,
            plain_text: "[Image: 1x1, 1 KB]".into(),
            payload: PayloadSource::Inline(vec![1, 2, 3]),
            app_bundle_id: None,
            content_hash: ContentHash::new("img-1"),
            declared_size_bytes: 3,
            file_size_bytes: None,
        };
        monitor.push(content).await;

        // No event should ever arrive for the dropped ingest; a short grace
        // period stands in for "never" without hanging the test forever.
        let outcome = tokio::time::timeout(Duration::from_millis(200), service.events().dequeue()).await;
        assert!(outcome.is_err(), "expected no event from a gated ingest");

        let stats = service.get_storage_stats().await.unwrap();
        assert_eq!(stats.item_count, 0);
    }

    #[tokio::test]
    async fn cleanup_enforces_max_items_keeping_most_recently_used() {
        let mut settings = SettingsDto::default();
        settings.max_items = 5;
        let (_dir, service, monitor) = started_service(settings).await;

        for i in 0..10 {
            let text = format!("item-{i}");
            monitor.push(ClipboardContent::text(text.clone(), ContentHash::new(text))).await;
            assert!(matches!(drain_event(&service).await, ClipboardEvent::NewItem(_)));
        }

        tokio::time::sleep(Duration::from_millis(2100)).await;

        let stats = service.get_storage_stats().await.unwrap();
        assert_eq!(stats.item_count, 5);
    }

    #[tokio::test]
    async fn pin_then_unpin_round_trips_and_emits_both_events() {
        let (_dir, service, monitor) = started_service(SettingsDto::default()).await;
        monitor.push(ClipboardContent::text("keep-me", ContentHash::new("keep-me"))).await;
        let id = match drain_event(&service).await {
            ClipboardEvent::NewItem(dto) => scopy_core::ids::ItemId::parse(&dto.id).unwrap(),
            other => panic!("expected NewItem, got {other:?}"),
        };

        service.pin(id).await.unwrap();
        assert!(matches!(drain_event(&service).await, ClipboardEvent::ItemPinned(pinned) if pinned == id));

        service.unpin(id).await.unwrap();
        assert!(matches!(drain_event(&service).await, ClipboardEvent::ItemUnpinned(unpinned) if unpinned == id));
    }

    #[tokio::test]
    async fn fuzzy_search_ranks_exact_substring_match_first() {
        let (_dir, service, monitor) = started_service(SettingsDto::default()).await;
        monitor.push(ClipboardContent::text("Hello World", ContentHash::new("hw"))).await;
        drain_event(&service).await;
        monitor.push(ClipboardContent::text("hello there", ContentHash::new("ht"))).await;
        drain_event(&service).await;

        let mut request = SearchRequest::new("hello", SearchMode::Fuzzy);
        request.sort = SortMode::Relevance;
        let page = service.search(request).await.unwrap();

        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].preview.contains("Hello World"));
    }

    #[tokio::test]
    async fn regex_dot_star_matches_every_item_respecting_limit() {
        let (_dir, service, monitor) = started_service(SettingsDto::default()).await;
        for text in ["alpha", "beta", "gamma"] {
            monitor.push(ClipboardContent::text(text, ContentHash::new(text))).await;
            drain_event(&service).await;
        }

        let mut request = SearchRequest::new(".*", SearchMode::Regex);
        request.limit = 2;
        let page = service.search(request).await.unwrap();

        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (_dir, service, _monitor) = started_service(SettingsDto::default()).await;
        service.stop().await.unwrap();
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn operations_before_start_report_not_started() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClipboardServiceConfig {
            db_path: dir.path().join("clipboard.sqlite").to_str().unwrap().to_string(),
            external_root: dir.path().join("external"),
            thumbnail_root: dir.path().join("thumbnails"),
            event_queue_capacity: 8,
        };
        let service = ClipboardService::new(
            config,
            Arc::new(FakeMonitor::new()),
            Arc::new(FakeSettingsStore::new(SettingsDto::default())),
            Arc::new(FakeThumbnailer),
        );
        let err = service.fetch_recent(10, 0).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotStarted));
    }
}
