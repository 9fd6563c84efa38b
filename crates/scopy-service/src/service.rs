//! The `ClipboardService` actor (spec §4.6): composes `StorageService` and
//! `SearchEngine` with the external Monitor/SettingsStore/Thumbnailer
//! collaborators. A single `tokio::sync::Mutex` over the actor's private
//! state linearizes its operations (spec §5 "cooperative single-threaded
//! per actor"); detached helper tasks (thumbnails, file-size probes,
//! debounced cleanup) reach back in through the same lock.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use scopy_core::clipboard::{ClipboardContent, ClipboardItemType, PayloadSource, StoredItem};
use scopy_core::dto::{ClipboardItemDto, DetailedStorageStats, OptimizationOutcome, StorageStats};
use scopy_core::events::ClipboardEvent;
use scopy_core::ids::{ContentHash, ItemId};
use scopy_core::ports::{MonitorPort, SettingsStorePort, ThumbnailerPort};
use scopy_core::search::{SearchRequest, SearchResultPage};
use scopy_core::settings::{CleanupBudgets, PngRecompressionSettings, SettingsDto, ThumbnailPolicy};
use scopy_queue::BoundedQueue;
use scopy_search::SearchEngine;
use scopy_storage::{CleanupMode, StorageService};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{ServiceError, ServiceResult};

const LIGHT_CLEANUP_INTERVAL_SECONDS: f64 = 60.0;
const FULL_CLEANUP_INTERVAL_SECONDS: f64 = 3600.0;
const CLEANUP_DEBOUNCE: Duration = Duration::from_secs(2);
const MAX_CONCURRENT_THUMBNAILS: usize = 2;
const MAX_CONCURRENT_FILE_PROBES: usize = 2;
const FILE_PROBE_SUPPRESSION_SECONDS: f64 = 3.0 * 3600.0;
const SEARCH_TIMEOUT: Duration = Duration::from_secs(5);

fn now_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

pub struct ClipboardServiceConfig {
    pub db_path: String,
    pub external_root: PathBuf,
    pub thumbnail_root: PathBuf,
    pub event_queue_capacity: usize,
}

struct Started {
    storage: Arc<StorageService>,
    search: SearchEngine,
    settings: SettingsDto,
    monitor_task: JoinHandle<()>,
    last_light_cleanup: f64,
    last_full_cleanup: f64,
    cleanup_generation: u64,
    thumbnail_filename_index: HashSet<String>,
    thumbnail_inflight: HashSet<String>,
    file_probe_suppressed_until: HashMap<ItemId, f64>,
}

pub struct ClipboardService {
    config: ClipboardServiceConfig,
    monitor: Arc<dyn MonitorPort>,
    settings_store: Arc<dyn SettingsStorePort>,
    thumbnailer: Arc<dyn ThumbnailerPort>,
    events: Arc<BoundedQueue<ClipboardEvent>>,
    thumbnail_semaphore: Arc<Semaphore>,
    file_probe_semaphore: Arc<Semaphore>,
    state: Mutex<Option<Started>>,
    self_ref: OnceLock<Weak<ClipboardService>>,
}

impl ClipboardService {
    pub fn new(
        config: ClipboardServiceConfig,
        monitor: Arc<dyn MonitorPort>,
        settings_store: Arc<dyn SettingsStorePort>,
        thumbnailer: Arc<dyn ThumbnailerPort>,
    ) -> Arc<Self> {
        let events = Arc::new(BoundedQueue::new(config.event_queue_capacity));
        let service = Arc::new(Self {
            thumbnail_semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_THUMBNAILS)),
            file_probe_semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_FILE_PROBES)),
            config,
            monitor,
            settings_store,
            thumbnailer,
            events,
            state: Mutex::new(None),
            self_ref: OnceLock::new(),
        });
        let _ = service.self_ref.set(Arc::downgrade(&service));
        service
    }

    /// Consumers external to the service (the UI) drain this.
    pub fn events(&self) -> Arc<BoundedQueue<ClipboardEvent>> {
        self.events.clone()
    }

    fn arc_self(&self) -> Arc<Self> {
        self.self_ref
            .get()
            .and_then(Weak::upgrade)
            .expect("ClipboardService is always constructed through ClipboardService::new")
    }

    #[instrument(skip(self))]
    pub async fn start(&self) -> ServiceResult<()> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let settings = self.settings_store.load().await.map_err(ServiceError::Other)?;
        let storage = Arc::new(
            StorageService::open(
                &self.config.db_path,
                self.config.external_root.clone(),
                self.config.thumbnail_root.clone(),
            )
            .await?,
        );
        let search = SearchEngine::open(&self.config.db_path)?;

        let receiver = self
            .monitor
            .start(settings.clipboard_polling_interval_ms)
            .await
            .map_err(ServiceError::Other)?;
        let service = self.arc_self();
        let monitor_task = tokio::spawn(async move {
            let mut receiver = receiver;
            while let Some(content) = receiver.recv().await {
                if let Err(err) = service.handle_new_content(content).await {
                    warn!(error = %err, "failed to handle new clipboard content");
                }
            }
        });

        *guard = Some(Started {
            storage: storage.clone(),
            search,
            settings,
            monitor_task,
            // Zero rather than "now": the first debounced cleanup after
            // start should be free to run immediately, not wait out a full
            // cadence window before it does anything.
            last_light_cleanup: 0.0,
            last_full_cleanup: 0.0,
            cleanup_generation: 0,
            thumbnail_filename_index: HashSet::new(),
            thumbnail_inflight: HashSet::new(),
            file_probe_suppressed_until: HashMap::new(),
        });
        drop(guard);

        tokio::spawn(async move {
            if let Err(err) = storage.startup_orphan_sweep().await {
                warn!(error = %err, "startup orphan sweep failed");
            }
        });

        info!("clipboard service started");
        Ok(())
    }

    /// Idempotent: a second call on an already-stopped service is a no-op.
    pub async fn stop(&self) -> ServiceResult<()> {
        let mut guard = self.state.lock().await;
        let Some(started) = guard.take() else {
            return Ok(());
        };
        started.monitor_task.abort();
        drop(guard);
        self.monitor.stop().await.map_err(ServiceError::Other)?;
        self.events.finish();
        info!("clipboard service stopped");
        Ok(())
    }

    #[instrument(skip(self, content))]
    async fn handle_new_content(&self, mut content: ClipboardContent) -> ServiceResult<()> {
        let mut guard = self.state.lock().await;
        let started = guard.as_mut().ok_or(ServiceError::NotStarted)?;

        let gated = matches!(content.item_type, ClipboardItemType::Image if !started.settings.save_images)
            || matches!(content.item_type, ClipboardItemType::File if !started.settings.save_files);
        if gated {
            if let PayloadSource::ExternalFile(path) = &content.payload {
                let _ = tokio::fs::remove_file(path).await;
            }
            debug!(item_type = ?content.item_type, "dropped ingest: save-toggle disabled");
            return Ok(());
        }

        if started.settings.png_recompression.enabled && content.item_type == ClipboardItemType::Image {
            recompress_png(&started.settings.png_recompression, &mut content).await;
        }

        let outcome = started.storage.upsert(content).await?;
        started.search.handle_upserted(&outcome.item);
        let dto = ClipboardItemDto::from(&outcome.item);
        let event = if outcome.inserted {
            ClipboardEvent::NewItem(dto)
        } else {
            ClipboardEvent::ItemUpdated(dto)
        };

        self.maybe_schedule_thumbnail(started, &outcome.item);
        self.maybe_schedule_file_size_probe(started, &outcome.item);
        self.schedule_cleanup(started);

        self.events.enqueue(event).await;
        Ok(())
    }

    fn schedule_cleanup(&self, started: &mut Started) {
        started.cleanup_generation += 1;
        let generation = started.cleanup_generation;
        let service = self.arc_self();
        tokio::spawn(async move {
            tokio::time::sleep(CLEANUP_DEBOUNCE).await;
            service.run_scheduled_cleanup(generation).await;
        });
    }

    async fn run_scheduled_cleanup(&self, generation: u64) {
        let mut guard = self.state.lock().await;
        let Some(started) = guard.as_mut() else {
            return;
        };
        if started.cleanup_generation != generation {
            return;
        }

        let now = now_seconds();
        let mode = if now - started.last_full_cleanup >= FULL_CLEANUP_INTERVAL_SECONDS {
            CleanupMode::Full
        } else if now - started.last_light_cleanup >= LIGHT_CLEANUP_INTERVAL_SECONDS {
            CleanupMode::Light
        } else {
            return;
        };

        let budgets = CleanupBudgets::from(&started.settings);
        match started.storage.cleanup(mode, budgets).await {
            Ok(report) => {
                started.last_light_cleanup = now;
                if mode == CleanupMode::Full {
                    started.last_full_cleanup = now;
                }
                for id in &report.deleted_ids {
                    started.search.handle_deletion(*id);
                }
                let deleted = report.deleted_ids.clone();
                drop(guard);
                for id in deleted {
                    self.events.enqueue(ClipboardEvent::ItemDeleted(id)).await;
                }
            }
            Err(err) => warn!(error = %err, ?mode, "scheduled cleanup failed"),
        }
    }

    fn maybe_schedule_thumbnail(&self, started: &mut Started, item: &StoredItem) {
        if !started.settings.show_image_thumbnails {
            return;
        }
        let (key, path, source_path) = match item.item_type {
            ClipboardItemType::Image => {
                let key = item.content_hash.as_str().to_string();
                let path = started.storage.blob_store().thumbnail_path_for_image(&key);
                (key, path, None)
            }
            ClipboardItemType::File => {
                let Some(first_url) = item.plain_text.lines().next() else {
                    return;
                };
                if !is_thumbnailable_file(first_url) {
                    return;
                }
                let key = format!("file_{}", item.content_hash.as_str());
                let path = started.storage.blob_store().thumbnail_path_for_file(item.content_hash.as_str());
                (key, path, Some(first_url.to_string()))
            }
            _ => return,
        };

        let filename = path.file_name().and_then(|f| f.to_str()).unwrap_or_default().to_string();
        if started.thumbnail_filename_index.contains(&filename) || started.thumbnail_inflight.contains(&key) {
            return;
        }
        started.thumbnail_inflight.insert(key.clone());

        let semaphore = self.thumbnail_semaphore.clone();
        let thumbnailer = self.thumbnailer.clone();
        let storage = started.storage.clone();
        let service = self.arc_self();
        let item_id = item.id;
        let item_type = item.item_type;
        let max_height = started.settings.thumbnail_height;

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            let generated = match item_type {
                ClipboardItemType::Image => match storage.get_image_data(item_id).await {
                    Ok(Some(bytes)) => thumbnailer.from_image_bytes(&bytes, max_height).await,
                    _ => return,
                },
                ClipboardItemType::File => {
                    let Some(source_path) = source_path else {
                        return;
                    };
                    thumbnailer.from_file_path(&source_path, max_height).await
                }
                _ => return,
            };
            let Ok(png_bytes) = generated else {
                return;
            };
            if storage.blob_store().write_thumbnail(&path, &png_bytes).await.is_err() {
                return;
            }
            service.finish_thumbnail(key, filename, item_id, path).await;
        });
    }

    async fn finish_thumbnail(&self, key: String, filename: String, item_id: ItemId, path: PathBuf) {
        {
            let mut guard = self.state.lock().await;
            if let Some(started) = guard.as_mut() {
                started.thumbnail_inflight.remove(&key);
                started.thumbnail_filename_index.insert(filename);
            }
        }
        self.events.enqueue(ClipboardEvent::ThumbnailUpdated { id: item_id, path }).await;
    }

    fn maybe_schedule_file_size_probe(&self, started: &mut Started, item: &StoredItem) {
        if item.item_type != ClipboardItemType::File || item.file_size_bytes.is_some() {
            return;
        }
        let now = now_seconds();
        if let Some(&suppressed_until) = started.file_probe_suppressed_until.get(&item.id) {
            if now < suppressed_until {
                return;
            }
        }
        started.file_probe_suppressed_until.insert(item.id, now + FILE_PROBE_SUPPRESSION_SECONDS);

        let semaphore = self.file_probe_semaphore.clone();
        let storage = started.storage.clone();
        let service = self.arc_self();
        let item_id = item.id;
        let paths: Vec<String> = item.plain_text.lines().map(str::to_owned).collect();

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            let mut total: i64 = 0;
            let mut found_any = false;
            for path in &paths {
                if let Ok(metadata) = tokio::fs::metadata(path).await {
                    total += metadata.len() as i64;
                    found_any = true;
                }
            }
            if !found_any {
                return;
            }
            if storage.set_file_size_bytes(item_id, total).await.is_err() {
                return;
            }
            if let Ok(Some(refreshed)) = storage.get(item_id).await {
                service.handle_file_size_probed(refreshed).await;
            }
        });
    }

    async fn handle_file_size_probed(&self, item: StoredItem) {
        {
            let mut guard = self.state.lock().await;
            if let Some(started) = guard.as_mut() {
                started.search.handle_upserted(&item);
            }
        }
        self.events
            .enqueue(ClipboardEvent::ItemContentUpdated(ClipboardItemDto::from(&item)))
            .await;
    }

    pub async fn fetch_recent(&self, limit: i64, offset: i64) -> ServiceResult<Vec<ClipboardItemDto>> {
        let guard = self.state.lock().await;
        let started = guard.as_ref().ok_or(ServiceError::NotStarted)?;
        let items = started.storage.fetch_recent(limit, offset).await?;
        Ok(items.iter().map(ClipboardItemDto::from).collect())
    }

    /// Runs under a per-call timeout (spec §4.5 / §5): 5 seconds, interrupted
    /// at the SQLite boundary via [`rusqlite::InterruptHandle`].
    pub async fn search(&self, request: SearchRequest) -> ServiceResult<SearchResultPage> {
        let mut guard = self.state.lock().await;
        let started = guard.as_mut().ok_or(ServiceError::NotStarted)?;

        let interrupt = started.search.interrupt_handle();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(SEARCH_TIMEOUT).await;
            interrupt.interrupt();
        });
        let now = now_seconds();
        let result = started.search.search(&request, now);
        timer.abort();

        match result {
            Ok(page) => Ok(page),
            Err(err) if is_interrupted(&err) => Err(ServiceError::SearchTimeout),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn pin(&self, id: ItemId) -> ServiceResult<()> {
        self.set_pinned(id, true).await
    }

    pub async fn unpin(&self, id: ItemId) -> ServiceResult<()> {
        self.set_pinned(id, false).await
    }

    async fn set_pinned(&self, id: ItemId, pinned: bool) -> ServiceResult<()> {
        let mut guard = self.state.lock().await;
        let started = guard.as_mut().ok_or(ServiceError::NotStarted)?;
        started.storage.pin(id, pinned).await?;
        started.search.handle_pinned_change(id, pinned);
        let event = if pinned {
            ClipboardEvent::ItemPinned(id)
        } else {
            ClipboardEvent::ItemUnpinned(id)
        };
        self.events.enqueue(event).await;
        Ok(())
    }

    pub async fn delete(&self, id: ItemId) -> ServiceResult<()> {
        let mut guard = self.state.lock().await;
        let started = guard.as_mut().ok_or(ServiceError::NotStarted)?;
        started.storage.delete(id).await?;
        started.search.handle_deletion(id);
        self.events.enqueue(ClipboardEvent::ItemDeleted(id)).await;
        Ok(())
    }

    pub async fn clear_all(&self) -> ServiceResult<usize> {
        let mut guard = self.state.lock().await;
        let started = guard.as_mut().ok_or(ServiceError::NotStarted)?;
        let removed = started.storage.clear_all().await?;
        started.search.handle_clear_all();
        self.events.enqueue(ClipboardEvent::ItemsCleared { keep_pinned: true }).await;
        Ok(removed)
    }

    pub async fn update_note(&self, id: ItemId, note: Option<String>) -> ServiceResult<()> {
        let mut guard = self.state.lock().await;
        let started = guard.as_mut().ok_or(ServiceError::NotStarted)?;
        started.storage.update_note(id, note).await?;
        let Some(item) = started.storage.get(id).await? else {
            return Ok(());
        };
        started.search.handle_upserted(&item);
        self.events.enqueue(ClipboardEvent::ItemUpdated(ClipboardItemDto::from(&item))).await;
        Ok(())
    }

    pub async fn copy_to_clipboard(&self, id: ItemId) -> ServiceResult<()> {
        let mut guard = self.state.lock().await;
        let started = guard.as_mut().ok_or(ServiceError::NotStarted)?;
        let payload = started.storage.prepare_copy(id).await?;
        match &payload.bytes {
            Some(bytes) if payload.item_type != ClipboardItemType::Text => {
                self.monitor.write_bytes(bytes, payload.item_type).await.map_err(ServiceError::Other)?;
            }
            _ => {
                self.monitor.write_text(&payload.plain_text).await.map_err(ServiceError::Other)?;
            }
        }
        started.storage.record_copy(id).await?;
        Ok(())
    }

    pub async fn optimize_image(&self, id: ItemId) -> ServiceResult<OptimizationOutcome> {
        let mut guard = self.state.lock().await;
        let started = guard.as_mut().ok_or(ServiceError::NotStarted)?;
        let Some((_item, bytes)) = started.storage.load_for_optimization(id).await? else {
            return Ok(OptimizationOutcome::Skipped("not an image or payload unavailable".into()));
        };
        let cfg = started.settings.png_recompression.clone();
        let Some(binary) = cfg.binary_path.clone() else {
            return Ok(OptimizationOutcome::Skipped("no recompression helper configured".into()));
        };
        let Some(new_bytes) = run_png_helper(&binary, &cfg, &bytes).await else {
            return Ok(OptimizationOutcome::Skipped("external helper failed".into()));
        };
        let new_hash = ContentHash::new(blake3::hash(&new_bytes).to_hex().to_string());
        let outcome = started.storage.commit_optimized_payload(id, new_hash, new_bytes).await?;
        if matches!(outcome, OptimizationOutcome::Optimized { .. }) {
            if let Some(refreshed) = started.storage.get(id).await? {
                started.search.handle_upserted(&refreshed);
                self.events
                    .enqueue(ClipboardEvent::ItemContentUpdated(ClipboardItemDto::from(&refreshed)))
                    .await;
            }
        }
        Ok(outcome)
    }

    pub async fn get_settings(&self) -> ServiceResult<SettingsDto> {
        let guard = self.state.lock().await;
        let started = guard.as_ref().ok_or(ServiceError::NotStarted)?;
        Ok(started.settings.clone())
    }

    pub async fn update_settings(&self, settings: SettingsDto) -> ServiceResult<()> {
        let mut guard = self.state.lock().await;
        let started = guard.as_mut().ok_or(ServiceError::NotStarted)?;

        let budgets_changed = CleanupBudgets::from(&settings) != CleanupBudgets::from(&started.settings);
        let thumbnails_changed = ThumbnailPolicy::from(&settings) != ThumbnailPolicy::from(&started.settings);

        self.settings_store.save(&settings).await.map_err(ServiceError::Other)?;
        started.settings = settings;

        if budgets_changed {
            started.search.invalidate_cache();
            self.schedule_cleanup(started);
        }
        if thumbnails_changed {
            started.thumbnail_filename_index.clear();
            started.thumbnail_inflight.clear();
        }

        self.events.enqueue(ClipboardEvent::SettingsChanged).await;
        Ok(())
    }

    pub async fn get_storage_stats(&self) -> ServiceResult<StorageStats> {
        let guard = self.state.lock().await;
        let started = guard.as_ref().ok_or(ServiceError::NotStarted)?;
        Ok(started.storage.storage_stats().await?)
    }

    pub async fn get_detailed_storage_stats(&self) -> ServiceResult<DetailedStorageStats> {
        let guard = self.state.lock().await;
        let started = guard.as_ref().ok_or(ServiceError::NotStarted)?;
        Ok(started.storage.detailed_storage_stats().await?)
    }

    pub async fn get_image_data(&self, id: ItemId) -> ServiceResult<Option<Vec<u8>>> {
        let guard = self.state.lock().await;
        let started = guard.as_ref().ok_or(ServiceError::NotStarted)?;
        Ok(started.storage.get_image_data(id).await?)
    }

    pub async fn get_recent_apps(&self, limit: i64) -> ServiceResult<Vec<String>> {
        let guard = self.state.lock().await;
        let started = guard.as_ref().ok_or(ServiceError::NotStarted)?;
        Ok(started.storage.get_recent_apps(limit).await?)
    }
}

fn is_interrupted(err: &scopy_search::SearchError) -> bool {
    matches!(err, scopy_search::SearchError::Sqlite(inner) if inner.to_string().to_lowercase().contains("interrupt"))
}

fn is_thumbnailable_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    [".png", ".jpg", ".jpeg", ".gif", ".heic", ".pdf", ".mov", ".mp4"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// Runs the configured PNG recompression helper as a subprocess, returning
/// `None` on any failure (spec §7 "external-process failure: treated as
/// no change").
async fn run_png_helper(binary: &str, cfg: &PngRecompressionSettings, bytes: &[u8]) -> Option<Vec<u8>> {
    let stem = blake3::hash(bytes).to_hex().to_string();
    let temp_dir = std::env::temp_dir();
    let input_path = temp_dir.join(format!("scopy-{stem}-in.png"));
    let output_path = temp_dir.join(format!("scopy-{stem}-out.png"));

    if tokio::fs::write(&input_path, bytes).await.is_err() {
        return None;
    }

    let status = tokio::process::Command::new(binary)
        .arg("--quality")
        .arg(format!("{}-{}", cfg.min_quality, cfg.max_quality))
        .arg("--speed")
        .arg(cfg.speed.to_string())
        .arg("--colors")
        .arg(cfg.colors.to_string())
        .arg("--output")
        .arg(&output_path)
        .arg(&input_path)
        .status()
        .await;

    let _ = tokio::fs::remove_file(&input_path).await;

    let result = match status {
        Ok(status) if status.success() => tokio::fs::read(&output_path).await.ok(),
        Ok(status) => {
            warn!(?status, binary, "png recompression helper exited non-zero");
            None
        }
        Err(err) => {
            warn!(error = %err, binary, "failed to spawn png recompression helper");
            None
        }
    };
    let _ = tokio::fs::remove_file(&output_path).await;
    result
}

/// Pre-ingest PNG recompression (spec §4.6 `handleNewContent`): replaces
/// `content`'s payload and hash in place on success, leaves it untouched on
/// any failure.
async fn recompress_png(cfg: &PngRecompressionSettings, content: &mut ClipboardContent) {
    let Some(binary) = cfg.binary_path.clone() else {
        return;
    };
    let bytes = match &content.payload {
        PayloadSource::Inline(bytes) => bytes.clone(),
        PayloadSource::ExternalFile(path) => match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(_) => return,
        },
        PayloadSource::None => return,
    };

    let Some(new_bytes) = run_png_helper(&binary, cfg, &bytes).await else {
        return;
    };
    if new_bytes.len() >= bytes.len() {
        return;
    }
    content.content_hash = ContentHash::new(blake3::hash(&new_bytes).to_hex().to_string());
    content.declared_size_bytes = new_bytes.len() as i64;
    content.payload = PayloadSource::Inline(new_bytes);
}
