mod monitor;
mod settings_store;
mod thumbnailer;

pub use monitor::MonitorPort;
pub use settings_store::SettingsStorePort;
pub use thumbnailer::ThumbnailerPort;
