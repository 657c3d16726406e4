//! Access-log harvesting
//!
//! The proxy core appends one line per accepted connection, e.g.
//!
//! ```text
//! 2024/03/01 10:00:00 from 10.0.0.1:51234 accepted tcp:example.com:443 [in-443 >> direct] email: a@x
//! ```
//!
//! Each run reads the whole file and then truncates it. Lines appended between
//! the read and the truncate are lost; without rotation or a read cursor this
//! is a known gap, and a missed line is only one missed observation.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// Liveness-probe target the core connects to on its own.
pub const PROBE_ADDR: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);

static IPV4_TOKEN: OnceLock<Regex> = OnceLock::new();

fn ipv4_token() -> &'static Regex {
    IPV4_TOKEN.get_or_init(|| {
        Regex::new(r"[0-9]+\.[0-9]+\.[0-9]+\.[0-9]+").expect("valid IPv4 token pattern")
    })
}

#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("cannot read access log {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One (identity, source IP) pair taken from one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpObservation {
    pub identity: String,
    pub ip: Ipv4Addr,
}

/// Addresses that never count towards a client's distinct-IP total.
pub fn is_ignored_ip(ip: &Ipv4Addr) -> bool {
    ip.is_loopback() || *ip == PROBE_ADDR
}

#[derive(Debug, Clone)]
pub struct LogHarvester {
    marker: String,
}

impl LogHarvester {
    /// `marker` is the token preceding the identity, `email:` for xray.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Extract an observation from one line. Lines without a usable IPv4
    /// token or identity yield `None`.
    pub fn parse_line(&self, line: &str) -> Option<IpObservation> {
        let token = ipv4_token().find(line)?;
        let ip: Ipv4Addr = token.as_str().parse().ok()?;
        if is_ignored_ip(&ip) {
            return None;
        }

        let (_, rest) = line.split_once(self.marker.as_str())?;
        let identity = rest.split_whitespace().next()?;

        Some(IpObservation {
            identity: identity.to_string(),
            ip,
        })
    }

    pub fn parse(&self, content: &str) -> Vec<IpObservation> {
        content.lines().filter_map(|line| self.parse_line(line)).collect()
    }

    /// Read and clear the log at `path`.
    ///
    /// A read failure leaves the file untouched. A truncate failure only logs:
    /// the lines already read are returned and will be seen again next run.
    pub fn harvest(&self, path: &Path) -> Result<Vec<IpObservation>, HarvestError> {
        let data = std::fs::read(path).map_err(|source| HarvestError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        if let Err(e) = truncate(path) {
            tracing::warn!("[iplimit] [harvest] cannot clear {}: {e}", path.display());
        }

        let content = String::from_utf8_lossy(&data);
        let observations = self.parse(&content);
        tracing::debug!(
            "[iplimit] [harvest] path={} bytes={} observations={}",
            path.display(),
            data.len(),
            observations.len()
        );
        Ok(observations)
    }
}

fn truncate(path: &Path) -> std::io::Result<()> {
    std::fs::OpenOptions::new().write(true).open(path)?.set_len(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harvester() -> LogHarvester {
        LogHarvester::new("email:")
    }

    #[test]
    fn test_parse_accepted_line() {
        let line = "2024/03/01 10:00:00 from 10.0.0.1:51234 accepted tcp:example.com:443 [in >> direct] email: a@x";
        assert_eq!(
            harvester().parse_line(line),
            Some(IpObservation {
                identity: "a@x".to_string(),
                ip: Ipv4Addr::new(10, 0, 0, 1)
            })
        );
    }

    #[test]
    fn test_first_ip_wins() {
        let line = "from 10.0.0.7:1 accepted tcp:93.184.216.34:443 email: a@x";
        assert_eq!(harvester().parse_line(line).unwrap().ip, Ipv4Addr::new(10, 0, 0, 7));
    }

    #[test]
    fn test_line_without_identity() {
        assert_eq!(harvester().parse_line("from 10.0.0.1:1 accepted tcp:x:443"), None);
        assert_eq!(harvester().parse_line("from 10.0.0.1:1 accepted email:   "), None);
    }

    #[test]
    fn test_line_without_ip() {
        assert_eq!(harvester().parse_line("2024/03/01 rejected email: a@x"), None);
    }

    #[test]
    fn test_out_of_range_token_is_skipped() {
        assert_eq!(harvester().parse_line("from 300.1.1.1:1 accepted email: a@x"), None);
    }

    #[test]
    fn test_loopback_and_probe_ignored() {
        assert_eq!(harvester().parse_line("from 127.0.0.1:1 accepted email: a@x"), None);
        assert_eq!(harvester().parse_line("from 127.0.0.53:1 accepted email: a@x"), None);
        assert_eq!(harvester().parse_line("from 1.1.1.1:1 accepted email: a@x"), None);
        assert!(is_ignored_ip(&PROBE_ADDR));
        assert!(!is_ignored_ip(&Ipv4Addr::new(1, 1, 1, 2)));
    }

    #[test]
    fn test_custom_marker() {
        let h = LogHarvester::new("user=");
        assert_eq!(h.parse_line("10.1.2.3 ok user=bob").unwrap().identity, "bob");
        assert_eq!(h.parse_line("10.1.2.3 ok email: bob"), None);
    }

    #[test]
    fn test_parse_skips_garbage() {
        let content = "garbage\n\nfrom 10.0.0.1:1 email: a@x\n\u{1}\u{2}\nfrom 10.0.0.2:1 email: b@x\n";
        let obs = harvester().parse(content);
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[1].identity, "b@x");
    }

    #[test]
    fn test_harvest_reads_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(&path, "from 10.0.0.1:1 email: a@x\nfrom 10.0.0.2:1 email: a@x\n").unwrap();

        let obs = harvester().harvest(&path).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        assert!(harvester().harvest(&path).unwrap().is_empty());
    }

    #[test]
    fn test_harvest_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = harvester().harvest(&dir.path().join("nope.log")).unwrap_err();
        assert!(matches!(err, HarvestError::Read { .. }));
        assert!(err.to_string().contains("nope.log"));
    }

    #[test]
    fn test_harvest_tolerates_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let mut bytes = b"from 10.0.0.1:1 email: a@x\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        std::fs::write(&path, bytes).unwrap();

        assert_eq!(harvester().harvest(&path).unwrap().len(), 1);
    }
}
