//! Domain model, ports, and DTOs for the clipboard history core.
//!
//! This crate has no I/O of its own. `scopy-storage`, `scopy-search`, and
//! `scopy-service` depend on it for the shared vocabulary: the clipboard
//! item model, the stable-contract DTOs, the event taxonomy, settings, and
//! the ports external collaborators (the OS pasteboard monitor, the
//! thumbnailer, the settings store) are adapted behind.

pub mod clipboard;
pub mod dto;
pub mod events;
pub mod ids;
pub mod ports;
pub mod search;
pub mod settings;

pub use ids::{ContentHash, ItemId};
