//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// SSE frame model and per-subscriber sinks.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Fan-out groups and their lifecycle manager.
pub mod groups;

/// Sport/region/competition taxonomy cache.
pub mod hierarchy;

/// HTTP/SSE edge router and handlers.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Subscription registry (accumulated delta state).
pub mod registry;

/// Live-tracker metrics aggregator.
pub mod stats;

/// Durable key-value persistence.
pub mod storage;

/// Upstream swarm feed adapter.
pub mod swarm;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Per-game live-tracker proxy.
pub mod tracker;
