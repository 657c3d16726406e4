//! Typed view of an inbound's `settings` document
//!
//! Protocols that carry authorized clients (vmess, vless, trojan, ...) store
//! them under `clients`. Each client names an identity (`email`) and may set
//! its own distinct-IP cap (`limitIp`). Keys not modeled here are preserved
//! in `extra`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default)]
    pub email: String,

    /// Max distinct source IPs. 0 means unlimited.
    #[serde(default, rename = "limitIp")]
    pub limit_ip: u32,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundSettings {
    #[serde(default)]
    pub clients: Vec<ClientSettings>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl InboundSettings {
    /// Parse a raw settings column. An empty document has no clients.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw)
    }

    /// Clients with a non-empty identity, in document order.
    pub fn identities(&self) -> impl Iterator<Item = &ClientSettings> {
        self.clients.iter().filter(|c| !c.email.trim().is_empty())
    }
}
