#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access
    )
)]

//! Sports Stream Hub - Real-Time Fan-Out Multiplexer
//!
//! Maintains one session to the sportsbook swarm feed and multiplexes its
//! data to a large population of downstream SSE subscribers. Overlapping
//! client interests are aggregated into shared upstream subscriptions,
//! redundant emissions are suppressed by content fingerprints, every group
//! keeps a warm snapshot so new subscribers see data within one round-trip,
//! and idle groups are torn down after a grace period.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: payload normalisation, fingerprints, market selection
//! - **Application**: port declarations
//! - **Infrastructure**: swarm session, registry, groups, broadcaster,
//!   tracker proxy, HTTP/SSE edge, storage, metrics, telemetry
//!
//! # Data Flow
//!
//! ```text
//! swarm WS ──► session ──► registry ──► groups ──► broadcaster ──► SSE client 1
//!                                        │                    ╰──► SSE client N
//! tracker WS ──► tracker instance ───────┴──────────────────────► SSE client
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure feed-processing logic with no I/O dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain
pub use domain::fingerprint::{
    counts_fingerprint, game_fingerprint, odds_fingerprint, sport_fingerprint,
};
pub use domain::markets::OddsOutcome;
pub use domain::payload::{deep_merge, extract_games, unwrap_data};

// Configuration
pub use infrastructure::config::{ConfigError, GroupSettings, HubConfig};

// Broadcast (for integration tests)
pub use infrastructure::broadcast::{ClientSet, SseClient, SseFrame};

// Groups (for integration tests)
pub use infrastructure::groups::{GroupKey, GroupManager, StreamMode};

// Registry & session
pub use infrastructure::registry::{SubscriptionRegistry, SubscriptionUpdate};
pub use infrastructure::swarm::session::{SessionError, SessionEvent, SwarmSession};

// Edge
pub use infrastructure::http::{AppState, SharedState, router};

// Storage & stats
pub use infrastructure::stats::MetricsAggregator;
pub use infrastructure::storage::FileStore;

// Tracker
pub use infrastructure::tracker::TrackerManager;

// Hierarchy
pub use infrastructure::hierarchy::HierarchyCache;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
