//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - Swarm session: correlated request/reply plus subscription deltas
//! - Broadcast: ordered frame delivery to one subscriber's sink
//! - Storage: durable key-value persistence for warm-restart state
//!
//! ## Driver Ports (Inbound)
//!
//! - SSE edge: attach/detach of subscribers onto fan-out groups
