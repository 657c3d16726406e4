//! Proxy-core configuration document
//!
//! Only `log.access` is modeled; every other top-level key is kept
//! opaque so the document can be read without tracking the core's schema.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Value the core accepts in `log.access` to turn the access log off.
const ACCESS_LOG_DISABLED: &str = "none";

#[derive(Debug, thiserror::Error)]
pub enum XrayConfigError {
    #[error("cannot read xray config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse xray config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub access: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XrayConfig {
    #[serde(default)]
    pub log: Option<LogConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl XrayConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, XrayConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| XrayConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| XrayConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The access-log path, or `None` when the core does not write one.
    pub fn access_log_path(&self) -> Option<PathBuf> {
        let access = self.log.as_ref()?.access.as_deref()?.trim();
        if access.is_empty() || access.eq_ignore_ascii_case(ACCESS_LOG_DISABLED) {
            return None;
        }
        Some(PathBuf::from(access))
    }
}

/// Resolve `log.access` from the config at `path`.
///
/// Every failure is reported as a warning and yields `None`; a missing access
/// log only means enforcement is skipped for this run.
pub fn access_log_path<P: AsRef<Path>>(path: P) -> Option<PathBuf> {
    match XrayConfig::from_file(path) {
        Ok(config) => {
            let access = config.access_log_path();
            if access.is_none() {
                tracing::warn!("[iplimit] [config] xray access log not set in config");
            }
            access
        }
        Err(e) => {
            tracing::warn!("[iplimit] [config] {e}");
            None
        }
    }
}
