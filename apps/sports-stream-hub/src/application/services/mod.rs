//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - Group lifecycle: attach, grace-period teardown, re-subscribe on
//!   upstream recovery
//! - Health reporting: feed connectivity and subscriber rollups
