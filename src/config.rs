//! Job configuration module
//!
//! Parses and manages the enforcement job configuration from a YAML file.
//!
//! Uses serde_yaml for parsing - define the struct and serde handles
//! the parsing, defaults and type conversion.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::job::penalty::PenaltyPolicy;

/// Main job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    // ============================================
    // Database
    // ============================================
    /// sqlx connection URL, e.g. `sqlite://x-ui.db`
    pub db_url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    // ============================================
    // Proxy core
    // ============================================
    /// Proxy-core JSON config; its `log.access` key names the access log.
    #[serde(default = "default_xray_config")]
    pub xray_config: String,

    /// Token that precedes the client identity on an access-log line.
    #[serde(default = "default_identity_marker")]
    pub identity_marker: String,

    // ============================================
    // Penalty policy
    // ============================================
    /// Grace cycles an inbound stays disabled after a breach.
    #[serde(default = "default_penalty")]
    pub penalty: u32,

    /// Counter ticks per grace cycle. The job is expected to run twice per
    /// nominal interval, so one cycle is worth two ticks by default.
    #[serde(default = "default_penalty_ticks_per_cycle")]
    pub penalty_ticks_per_cycle: u32,

    // ============================================
    // Scheduling
    // ============================================
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// How long shutdown waits for an in-flight run.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

// ============================================
// Default value functions
// ============================================

fn default_max_connections() -> u32 {
    5
}

fn default_xray_config() -> String {
    "bin/config.json".to_string()
}

fn default_identity_marker() -> String {
    "email:".to_string()
}

fn default_penalty() -> u32 {
    5
}

fn default_penalty_ticks_per_cycle() -> u32 {
    2
}

fn default_interval_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl JobConfig {
    /// Load configuration from a YAML file
    ///
    /// # Example
    /// ```no_run
    /// use iplimit::config::JobConfig;
    ///
    /// let config = JobConfig::from_file("conf/iplimit.yaml")
    ///     .expect("Failed to load config");
    /// println!("DB: {}", config.db_url);
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: JobConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML in {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(contents: &str) -> Result<Self> {
        let config: JobConfig = serde_yaml::from_str(contents)
            .context("Failed to parse YAML")?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.db_url.is_empty(), "db_url cannot be empty");
        anyhow::ensure!(
            !self.identity_marker.trim().is_empty(),
            "identity_marker cannot be empty"
        );
        anyhow::ensure!(self.interval_secs > 0, "interval_secs must be positive");
        anyhow::ensure!(
            self.penalty_ticks_per_cycle > 0,
            "penalty_ticks_per_cycle must be positive"
        );
        anyhow::ensure!(self.max_connections > 0, "max_connections must be positive");
        Ok(())
    }

    /// The grace-period policy described by `penalty` and `penalty_ticks_per_cycle`.
    pub fn penalty_policy(&self) -> PenaltyPolicy {
        PenaltyPolicy::new(self.penalty, self.penalty_ticks_per_cycle)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self)
            .context("Failed to serialize config to YAML")?;

        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config to {}", path.as_ref().display()))?;

        Ok(())
    }
}
