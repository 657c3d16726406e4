//! Row types for the two tables this job reads and writes.

/// Counter value of an inbound that automatic control leaves alone.
pub const PENALTY_EXEMPT: i64 = -1;

/// Counter value of an inbound with no pending penalty.
pub const PENALTY_BASELINE: i64 = 0;

/// One proxy listener, as stored by the dashboard.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Inbound {
    pub id: i64,
    pub remark: String,
    pub enable: bool,
    pub port: i64,
    pub protocol: String,
    /// Raw settings document; see `xray::settings::InboundSettings`.
    pub settings: String,
    pub tag: String,
    pub penalty: i64,
}

/// Last observed IP set of one client identity.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct InboundClientIps {
    pub id: i64,
    pub client_email: String,
    /// JSON array of dotted IPv4 strings.
    pub ips: String,
}

impl InboundClientIps {
    /// Decode the stored IP list. A corrupt column reads as empty.
    pub fn ip_list(&self) -> Vec<String> {
        serde_json::from_str(&self.ips).unwrap_or_default()
    }
}
