//! Hub Configuration Settings
//!
//! Configuration types for the stream hub, loaded from environment variables.
//! Every knob is optional; the defaults below are the documented production
//! values.

use std::path::PathBuf;
use std::time::Duration;

/// Upstream swarm feed settings.
#[derive(Debug, Clone)]
pub struct SwarmSettings {
    /// WebSocket URL of the swarm feed.
    pub url: String,
    /// Partner site id sent in the session handshake.
    pub site_id: u64,
    /// Language code sent in the session handshake.
    pub language: String,
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self {
            url: "wss://eu-swarm-ws.betconstruct.com/".to_string(),
            site_id: 1,
            language: "eng".to_string(),
        }
    }
}

/// Live-tracker feed settings (the per-game animation feed).
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// WebSocket URL of the tracker feed.
    pub url: String,
    /// Partner id sent in the tracker subscribe frame.
    pub partner_id: u64,
    /// Site reference string sent in the tracker subscribe frame.
    pub site_ref: String,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            url: "wss://krosstats.betconstruct.com/".to_string(),
            partner_id: 1,
            site_ref: "dob-edge".to_string(),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP/SSE edge port.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8787 }
    }
}

/// WebSocket connection settings shared by both upstream feeds.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Ping interval while connected.
    pub heartbeat_interval: Duration,
    /// Pong timeout before the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(40),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

/// Upstream request deadlines.
#[derive(Debug, Clone)]
pub struct TimeoutSettings {
    /// Connect + session handshake deadline.
    pub connect: Duration,
    /// Default correlated-request deadline.
    pub request: Duration,
    /// Short deadline for snapshot queries.
    pub snapshot: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(60),
            snapshot: Duration::from_secs(20),
        }
    }
}

/// Group lifecycle and cadence settings.
#[derive(Debug, Clone)]
pub struct GroupSettings {
    /// How long an empty group is kept alive before teardown.
    pub grace: Duration,
    /// SSE liveness comment interval.
    pub heartbeat_interval: Duration,
    /// Counts watchdog re-query interval.
    pub watchdog_interval: Duration,
    /// Coalesced odds full-snapshot interval.
    pub snapshot_interval: Duration,
    /// Prematch games poll interval.
    pub prematch_poll_interval: Duration,
    /// Prematch odds cursor step interval.
    pub odds_poll_interval: Duration,
    /// Game ids per prematch odds query.
    pub odds_chunk_size: usize,
    /// Re-query odds entries older than this.
    pub odds_refresh_age: Duration,
    /// Maximum odds-cache entries per group.
    pub odds_cache_max: usize,
    /// Odds-cache entry time-to-live.
    pub odds_cache_ttl: Duration,
    /// Fallback poll interval when a subscribe is rejected.
    pub fallback_poll_interval: Duration,
    /// Dynamic market-priority cache time-to-live.
    pub market_priority_ttl: Duration,
    /// Per-subscriber frame buffer; a full buffer marks the subscriber dead.
    pub client_buffer: usize,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(15),
            watchdog_interval: Duration::from_secs(15),
            snapshot_interval: Duration::from_secs(15),
            prematch_poll_interval: Duration::from_secs(5),
            odds_poll_interval: Duration::from_millis(2500),
            odds_chunk_size: 30,
            odds_refresh_age: Duration::from_secs(60),
            odds_cache_max: 1000,
            odds_cache_ttl: Duration::from_secs(3600),
            fallback_poll_interval: Duration::from_secs(5),
            market_priority_ttl: Duration::from_secs(12 * 3600),
            client_buffer: 256,
        }
    }
}

/// Durable storage settings.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Directory for the hub's persisted state file.
    pub data_dir: PathBuf,
    /// Coalescing window for flushes.
    pub flush_interval: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            flush_interval: Duration::from_secs(5),
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Upstream swarm feed settings.
    pub swarm: SwarmSettings,
    /// Live-tracker feed settings.
    pub tracker: TrackerSettings,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Upstream request deadlines.
    pub timeouts: TimeoutSettings,
    /// Group lifecycle settings.
    pub groups: GroupSettings,
    /// Durable storage settings.
    pub storage: StorageSettings,
}

impl HubConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a provided value is present but empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let swarm = SwarmSettings {
            url: parse_env_string("SWARM_WS_URL", &SwarmSettings::default().url)?,
            site_id: parse_env_u64("SWARM_SITE_ID", SwarmSettings::default().site_id),
            language: parse_env_string("SWARM_LANGUAGE", &SwarmSettings::default().language)?,
        };

        let tracker = TrackerSettings {
            url: parse_env_string("TRACKER_WS_URL", &TrackerSettings::default().url)?,
            partner_id: parse_env_u64("TRACKER_PARTNER_ID", TrackerSettings::default().partner_id),
            site_ref: parse_env_string("TRACKER_SITE_REF", &TrackerSettings::default().site_ref)?,
        };

        let server = ServerSettings {
            http_port: parse_env_u16("HUB_HTTP_PORT", ServerSettings::default().http_port),
        };

        let websocket = WebSocketSettings {
            heartbeat_interval: parse_env_duration_secs(
                "HUB_WS_HEARTBEAT_INTERVAL_SECS",
                WebSocketSettings::default().heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                "HUB_WS_HEARTBEAT_TIMEOUT_SECS",
                WebSocketSettings::default().heartbeat_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "HUB_WS_RECONNECT_DELAY_INITIAL_MS",
                WebSocketSettings::default().reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "HUB_WS_RECONNECT_DELAY_MAX_SECS",
                WebSocketSettings::default().reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "HUB_WS_RECONNECT_DELAY_MULTIPLIER",
                WebSocketSettings::default().reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env_u32(
                "HUB_WS_MAX_RECONNECT_ATTEMPTS",
                WebSocketSettings::default().max_reconnect_attempts,
            ),
        };

        let timeouts = TimeoutSettings {
            connect: parse_env_duration_secs(
                "HUB_CONNECT_TIMEOUT_SECS",
                TimeoutSettings::default().connect,
            ),
            request: parse_env_duration_secs(
                "HUB_REQUEST_TIMEOUT_SECS",
                TimeoutSettings::default().request,
            ),
            snapshot: parse_env_duration_secs(
                "HUB_SNAPSHOT_TIMEOUT_SECS",
                TimeoutSettings::default().snapshot,
            ),
        };

        let groups = GroupSettings {
            grace: parse_env_duration_secs("HUB_GRACE_SECS", GroupSettings::default().grace),
            heartbeat_interval: parse_env_duration_secs(
                "HUB_SSE_HEARTBEAT_SECS",
                GroupSettings::default().heartbeat_interval,
            ),
            odds_cache_max: parse_env_usize(
                "HUB_ODDS_CACHE_MAX",
                GroupSettings::default().odds_cache_max,
            ),
            odds_cache_ttl: parse_env_duration_secs(
                "HUB_ODDS_CACHE_TTL_SECS",
                GroupSettings::default().odds_cache_ttl,
            ),
            client_buffer: parse_env_usize(
                "HUB_CLIENT_BUFFER",
                GroupSettings::default().client_buffer,
            ),
            ..GroupSettings::default()
        };

        let storage = StorageSettings {
            data_dir: std::env::var("HUB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| StorageSettings::default().data_dir),
            flush_interval: StorageSettings::default().flush_interval,
        };

        Ok(Self {
            server,
            swarm,
            tracker,
            websocket,
            timeouts,
            groups,
            storage,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_env_string(key: &str, default: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
        Ok(value) => Ok(value),
        Err(_) => Ok(default.to_string()),
    }
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
