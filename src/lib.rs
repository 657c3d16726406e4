//! iplimit - per-client source IP limit enforcement
//!
//! The proxy core cannot cap how many source addresses one client uses, so
//! this job watches the core's access log and disables inbounds whose
//! clients go over their `limitIp`, re-enabling them after a grace period.

/// Job configuration (YAML)
pub mod config;
/// Panel database: inbounds and client IP snapshots
pub mod database;
/// The enforcement job and its scheduler
pub mod job;
/// Proxy-core config, inbound settings and restart signalling
pub mod xray;
