//! Configuration Module
//!
//! Configuration loading for the hub service.

mod settings;

pub use settings::{
    ConfigError, GroupSettings, HubConfig, ServerSettings, StorageSettings, SwarmSettings,
    TimeoutSettings, TrackerSettings, WebSocketSettings,
};
