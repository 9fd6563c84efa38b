//! Embedded SQLite repository, external blob store, and the
//! `StorageService` that composes them (spec §4.2-§4.4).

mod blob_store;
mod error;
mod repository;
mod schema;
mod service;

pub use blob_store::{validate_storage_ref, BlobStore};
pub use error::{StorageError, StorageResult};
pub use repository::{MetaCounters, Repository};
pub use schema::CURRENT_SCHEMA_VERSION;
pub use service::{
    CleanupMode, CleanupReport, CopyPayload, StorageService, UpsertOutcome, FULL_CLEANUP_MAX_AGE_SECONDS,
    INLINE_THRESHOLD_BYTES,
};

#[cfg(test)]
mod tests {
    use super::*;
    use scopy_core::clipboard::ClipboardContent;
    use scopy_core::ids::ContentHash;
    use scopy_core::settings::CleanupBudgets;

    async fn open_service() -> (tempfile::TempDir, StorageService) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("clipboard.sqlite");
        let service = StorageService::open(
            db_path.to_str().unwrap(),
            dir.path().join("external"),
            dir.path().join("thumbnails"),
        )
        .await
        .unwrap();
        (dir, service)
    }

    #[tokio::test]
    async fn ingest_three_distinct_items_then_fetch_recent() {
        let (_dir, service) = open_service().await;
        for text in ["alpha", "beta", "gamma"] {
            let content = ClipboardContent::text(text, ContentHash::new(format!("hash-{text}")));
            service.upsert(content).await.unwrap();
        }

        let recent = service.fetch_recent(10, 0).await.unwrap();
        let texts: Vec<_> = recent.iter().map(|i| i.plain_text.as_str()).collect();
        assert_eq!(texts, vec!["gamma", "beta", "alpha"]);

        let stats = service.storage_stats().await.unwrap();
        assert_eq!(stats.item_count, 3);
        assert_eq!(stats.size_bytes, 5 + 4 + 5);
    }

    #[tokio::test]
    async fn reingesting_same_hash_bumps_use_count_instead_of_inserting() {
        let (_dir, service) = open_service().await;
        let hash = ContentHash::new("dup");
        service
            .upsert(ClipboardContent::text("alpha", hash.clone()))
            .await
            .unwrap();
        let outcome = service
            .upsert(ClipboardContent::text("alpha", hash))
            .await
            .unwrap();

        assert!(!outcome.inserted);
        assert_eq!(outcome.item.use_count, 2);

        let stats = service.storage_stats().await.unwrap();
        assert_eq!(stats.item_count, 1);
    }

    #[tokio::test]
    async fn cleanup_enforces_max_items_keeping_most_recently_used() {
        let (_dir, service) = open_service().await;
        for i in 0..10 {
            let text = format!("item-{i}");
            service
                .upsert(ClipboardContent::text(text.clone(), ContentHash::new(text)))
                .await
                .unwrap();
        }

        let budgets = CleanupBudgets {
            max_items: 5,
            max_storage_bytes: u64::MAX,
            images_only: false,
        };
        service.cleanup(CleanupMode::Light, budgets).await.unwrap();

        let stats = service.storage_stats().await.unwrap();
        assert_eq!(stats.item_count, 5);

        let recent = service.fetch_recent(10, 0).await.unwrap();
        let texts: Vec<_> = recent.iter().map(|i| i.plain_text.clone()).collect();
        assert_eq!(
            texts,
            vec!["item-9", "item-8", "item-7", "item-6", "item-5"]
        );
    }

    #[tokio::test]
    async fn pinned_items_survive_a_tight_cleanup_budget() {
        let (_dir, service) = open_service().await;
        let pinned = service
            .upsert(ClipboardContent::text("keep-me", ContentHash::new("keep-me")))
            .await
            .unwrap()
            .item;
        service.pin(pinned.id, true).await.unwrap();

        for i in 0..5 {
            let text = format!("filler-{i}");
            service
                .upsert(ClipboardContent::text(text.clone(), ContentHash::new(text)))
                .await
                .unwrap();
        }

        let budgets = CleanupBudgets {
            max_items: 1,
            max_storage_bytes: u64::MAX,
            images_only: false,
        };
        service.cleanup(CleanupMode::Light, budgets).await.unwrap();

        assert!(service.get(pinned.id).await.unwrap().is_some());
        let stats = service.storage_stats().await.unwrap();
        assert_eq!(stats.item_count, 2); // pinned + 1 surviving unpinned row
    }

    #[tokio::test]
    async fn clear_all_removes_every_unpinned_row_and_its_blob() {
        let (_dir, service) = open_service().await;
        let big_payload = vec![7u8; (INLINE_THRESHOLD_BYTES as usize) + 1];
        let content = scopy_core::clipboard::ClipboardContent {
            item_type: scopy_core::clipboard::ClipboardItemType::File,
            plain_text: "big-file".into(),
            payload: scopy_core::clipboard::PayloadSource::Inline(big_payload),
            app_bundle_id: None,
            content_hash: ContentHash::new("big-file"),
            declared_size_bytes: (INLINE_THRESHOLD_BYTES as i64) + 1,
            file_size_bytes: None,
        };
        let outcome = service.upsert(content).await.unwrap();
        let storage_ref = outcome.item.storage_ref().unwrap().to_string();
        assert!(tokio::fs::metadata(&storage_ref).await.is_ok());

        service.clear_all().await.unwrap();

        assert!(tokio::fs::metadata(&storage_ref).await.is_err());
        let stats = service.storage_stats().await.unwrap();
        assert_eq!(stats.item_count, 0);
    }
}
