//! Per-run IP aggregation and snapshot persistence

use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;

use sqlx::SqlitePool;

use crate::database::client_ips_db;

use super::harvester::IpObservation;

/// Distinct source IPs per identity for one harvesting window, in first-seen
/// order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IpAggregate {
    by_identity: BTreeMap<String, Vec<Ipv4Addr>>,
}

impl IpAggregate {
    /// Aggregate `observations`, dropping identities in `excluded`.
    pub fn collect<I>(observations: I, excluded: &HashSet<String>) -> Self
    where
        I: IntoIterator<Item = IpObservation>,
    {
        let mut aggregate = Self::default();
        for obs in observations {
            if excluded.contains(&obs.identity) {
                continue;
            }
            aggregate.record(obs);
        }
        aggregate
    }

    pub fn record(&mut self, obs: IpObservation) {
        let ips = self.by_identity.entry(obs.identity).or_default();
        if !ips.contains(&obs.ip) {
            ips.push(obs.ip);
        }
    }

    pub fn ips(&self, identity: &str) -> &[Ipv4Addr] {
        self.by_identity.get(identity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Ipv4Addr])> {
        self.by_identity.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }

    /// Rows for `inbound_client_ips`: identity → dotted IP strings.
    pub fn to_snapshots(&self) -> BTreeMap<String, Vec<String>> {
        self.by_identity
            .iter()
            .map(|(identity, ips)| (identity.clone(), ips.iter().map(Ipv4Addr::to_string).collect()))
            .collect()
    }
}

/// Replace the stored snapshots with `aggregate`. Failures are logged and
/// reported as `false`; nothing else in the run depends on this write.
pub async fn persist(pool: &SqlitePool, aggregate: &IpAggregate) -> bool {
    match client_ips_db::replace_all(pool, &aggregate.to_snapshots()).await {
        Ok(n) => {
            tracing::debug!("[iplimit] [snapshot] stored {n} identities");
            true
        }
        Err(e) => {
            tracing::warn!("[iplimit] [snapshot] couldn't store client ips: {e}");
            false
        }
    }
}
