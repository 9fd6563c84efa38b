use serde::{Deserialize, Serialize};

use crate::search::SearchMode;

/// Options recognized from the (opaque, externally owned) settings store;
/// see spec §6. Unknown fields in a persisted file are ignored, and new
/// fields default in so older settings files keep loading (matching the
/// teacher's `#[serde(default = "...")]` convention in `src/config/setting.rs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsDto {
    #[serde(default = "default_polling_interval_ms")]
    pub clipboard_polling_interval_ms: u64,

    #[serde(default = "default_max_items")]
    pub max_items: usize,

    #[serde(default = "default_max_storage_mb")]
    pub max_storage_mb: u64,

    #[serde(default = "default_true")]
    pub save_images: bool,

    #[serde(default = "default_true")]
    pub save_files: bool,

    #[serde(default = "default_true")]
    pub show_image_thumbnails: bool,

    #[serde(default = "default_thumbnail_height")]
    pub thumbnail_height: u32,

    #[serde(default = "default_preview_delay_ms")]
    pub image_preview_delay_ms: u64,

    #[serde(default = "default_search_mode")]
    pub default_search_mode: SearchMode,

    #[serde(default)]
    pub cleanup_images_only: bool,

    #[serde(default)]
    pub png_recompression: PngRecompressionSettings,

    #[serde(default)]
    pub hotkey: HotkeySettings,
}

impl Default for SettingsDto {
    fn default() -> Self {
        Self {
            clipboard_polling_interval_ms: default_polling_interval_ms(),
            max_items: default_max_items(),
            max_storage_mb: default_max_storage_mb(),
            save_images: true,
            save_files: true,
            show_image_thumbnails: true,
            thumbnail_height: default_thumbnail_height(),
            image_preview_delay_ms: default_preview_delay_ms(),
            default_search_mode: default_search_mode(),
            cleanup_images_only: false,
            png_recompression: PngRecompressionSettings::default(),
            hotkey: HotkeySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PngRecompressionSettings {
    #[serde(default)]
    pub enabled: bool,
    pub binary_path: Option<String>,
    #[serde(default = "default_min_quality")]
    pub min_quality: u8,
    #[serde(default = "default_max_quality")]
    pub max_quality: u8,
    #[serde(default = "default_speed")]
    pub speed: u8,
    #[serde(default = "default_colors")]
    pub colors: u16,
}

impl Default for PngRecompressionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            binary_path: None,
            min_quality: default_min_quality(),
            max_quality: default_max_quality(),
            speed: default_speed(),
            colors: default_colors(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HotkeySettings {
    pub code: Option<u32>,
    #[serde(default)]
    pub modifiers: Vec<String>,
}

/// Cleanup budgets derived from [`SettingsDto`], consumed by
/// `scopy-storage`'s cleanup planners (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupBudgets {
    pub max_items: usize,
    pub max_storage_bytes: u64,
    pub images_only: bool,
}

impl From<&SettingsDto> for CleanupBudgets {
    fn from(settings: &SettingsDto) -> Self {
        Self {
            max_items: settings.max_items,
            max_storage_bytes: settings.max_storage_mb * 1024 * 1024,
            images_only: settings.cleanup_images_only,
        }
    }
}

/// Thumbnail scheduling policy derived from [`SettingsDto`] (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailPolicy {
    pub enabled: bool,
    pub max_height: u32,
}

impl From<&SettingsDto> for ThumbnailPolicy {
    fn from(settings: &SettingsDto) -> Self {
        Self {
            enabled: settings.show_image_thumbnails,
            max_height: settings.thumbnail_height,
        }
    }
}

fn default_polling_interval_ms() -> u64 {
    500
}
fn default_max_items() -> usize {
    1000
}
fn default_max_storage_mb() -> u64 {
    500
}
fn default_thumbnail_height() -> u32 {
    256
}
fn default_preview_delay_ms() -> u64 {
    150
}
fn default_search_mode() -> SearchMode {
    SearchMode::Fuzzy
}
fn default_min_quality() -> u8 {
    65
}
fn default_max_quality() -> u8 {
    90
}
fn default_speed() -> u8 {
    3
}
fn default_colors() -> u16 {
    256
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let json = r#"{"max_items": 42}"#;
        let settings: SettingsDto = serde_json::from_str(json).unwrap();
        assert_eq!(settings.max_items, 42);
        assert_eq!(settings.max_storage_mb, default_max_storage_mb());
        assert!(settings.save_images);
    }
}
