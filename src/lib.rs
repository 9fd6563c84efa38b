//! Clipboard history ingestion, persistence, and search core (spec §1).
//!
//! This crate re-exports the stable service contract (spec §6): no UI, no
//! CLI, just the pieces a host application wires up against its own
//! Monitor/SettingsStore/Thumbnailer implementations.

pub use scopy_core::clipboard::{ClipboardContent, ClipboardItemType, PayloadSource, StorageLocation, StoredItem};
pub use scopy_core::dto::{ClipboardItemDto, DetailedStorageStats, OptimizationOutcome, StorageStats};
pub use scopy_core::events::ClipboardEvent;
pub use scopy_core::ids::{ContentHash, ItemId};
pub use scopy_core::ports::{MonitorPort, SettingsStorePort, ThumbnailerPort};
pub use scopy_core::search::{SearchMode, SearchRequest, SearchResultPage, SortMode, TypeFilter};
pub use scopy_core::settings::{CleanupBudgets, PngRecompressionSettings, SettingsDto, ThumbnailPolicy};

pub use scopy_queue::BoundedQueue;

pub use scopy_storage::{CleanupMode, CleanupReport, CopyPayload, StorageError, StorageService, UpsertOutcome};

pub use scopy_search::{SearchEngine, SearchError};

pub use scopy_service::{ClipboardService, ClipboardServiceConfig, ServiceError, ServiceResult};
