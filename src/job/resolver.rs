//! Identity → owning inbound resolution
//!
//! Built once per run from a typed parse of every inbound's client list.
//! Inbounds are visited by ascending id, so when two inbounds list the same
//! identity the older one owns it.

use std::collections::HashMap;

use crate::database::model::Inbound;
use crate::xray::settings::InboundSettings;

/// The inbound that owns an identity, as it stood when the index was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub inbound_id: i64,
    pub enable: bool,
    pub penalty: i64,
    /// Max distinct source IPs; 0 is unlimited.
    pub limit: u32,
}

impl ResolvedIdentity {
    /// True when `distinct_ips` breaks the limit of an inbound that is still
    /// subject to enforcement this run. A counter of -1 on an enabled inbound
    /// marks a reactivation from this same run.
    pub fn is_breached_by(&self, distinct_ips: usize) -> bool {
        self.limit > 0 && self.enable && self.penalty >= 0 && distinct_ips > self.limit as usize
    }
}

#[derive(Debug, Default)]
pub struct IdentityIndex {
    by_identity: HashMap<String, ResolvedIdentity>,
}

impl IdentityIndex {
    pub fn build(inbounds: &[Inbound]) -> Self {
        let mut ordered: Vec<&Inbound> = inbounds.iter().collect();
        ordered.sort_by_key(|i| i.id);

        let mut by_identity: HashMap<String, ResolvedIdentity> = HashMap::new();
        for inbound in ordered {
            let settings = match InboundSettings::parse(&inbound.settings) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(
                        "[iplimit] [resolve] skip inbound_id={}: bad settings: {e}",
                        inbound.id
                    );
                    continue;
                }
            };

            for client in settings.identities() {
                let email = client.email.trim();
                if let Some(owner) = by_identity.get(email) {
                    tracing::warn!(
                        "[iplimit] [resolve] identity={email} listed by inbound_id={} already owned by inbound_id={}",
                        inbound.id,
                        owner.inbound_id
                    );
                    continue;
                }
                by_identity.insert(
                    email.to_string(),
                    ResolvedIdentity {
                        inbound_id: inbound.id,
                        enable: inbound.enable,
                        penalty: inbound.penalty,
                        limit: client.limit_ip,
                    },
                );
            }
        }

        Self { by_identity }
    }

    pub fn resolve(&self, identity: &str) -> Option<&ResolvedIdentity> {
        self.by_identity.get(identity)
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}

/// Identities listed by one inbound. Unparseable settings list none.
pub fn identities_of(inbound: &Inbound) -> Vec<String> {
    match InboundSettings::parse(&inbound.settings) {
        Ok(settings) => settings
            .identities()
            .map(|c| c.email.trim().to_string())
            .collect(),
        Err(e) => {
            tracing::warn!(
                "[iplimit] [resolve] inbound_id={} has unreadable settings: {e}",
                inbound.id
            );
            Vec::new()
        }
    }
}
