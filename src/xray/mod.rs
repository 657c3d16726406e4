//! Proxy-core (xray) documents and the service collaborator
//!
//! - `config`: the core's JSON config, read for the access-log path
//! - `settings`: typed view of an inbound's settings document
//! - `service`: restart signalling towards the process that owns the core

pub mod config;
pub mod service;
pub mod settings;

pub use service::{RestartSignal, XrayService};
