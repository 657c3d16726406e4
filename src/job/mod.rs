//! Client IP limit enforcement job
//!
//! One run:
//! 0. enabled inbounds get their counter back to baseline
//! 1. disabled inbounds advance their grace counter or are re-enabled
//! 2. the access log is read and cleared
//! 3. observations are grouped per identity, skipping identities whose
//!    inbound is still serving a penalty
//! 4. the snapshot table is replaced with this run's IP sets
//! 5. identities over their limit disable their inbound
//!
//! Every step degrades on failure; the worst outcome of a bad run is that
//! the next one has to do the work.

pub mod harvester;
pub mod penalty;
pub mod resolver;
pub mod scheduler;
pub mod snapshot;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::config::JobConfig;
use crate::database::inbound_db;
use crate::xray::{self, RestartSignal};

use harvester::{IpObservation, LogHarvester};
use penalty::{PenaltyPolicy, PenaltyStateMachine};
use resolver::IdentityIndex;
use snapshot::IpAggregate;

/// What one run changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub penalized: Vec<i64>,
    pub reactivated: Vec<i64>,
    pub disabled: Vec<i64>,
    /// False when the access log was unset or unreadable.
    pub log_harvested: bool,
    pub observed_identities: usize,
    pub snapshots_persisted: bool,
}

impl RunReport {
    /// True when any inbound changed its enabled state.
    pub fn changed_inbounds(&self) -> bool {
        !self.reactivated.is_empty() || !self.disabled.is_empty()
    }
}

pub struct CheckClientIpJob {
    pool: SqlitePool,
    penalty: PenaltyStateMachine,
    harvester: Arc<LogHarvester>,
    xray_config: PathBuf,
    /// Runs never overlap: the log truncate and table rewrite are not
    /// safe to interleave.
    run_lock: Mutex<()>,
}

impl CheckClientIpJob {
    pub fn new(
        pool: SqlitePool,
        restart: Arc<dyn RestartSignal>,
        policy: PenaltyPolicy,
        xray_config: impl Into<PathBuf>,
        identity_marker: impl Into<String>,
    ) -> Self {
        Self {
            penalty: PenaltyStateMachine::new(pool.clone(), policy, restart),
            pool,
            harvester: Arc::new(LogHarvester::new(identity_marker)),
            xray_config: xray_config.into(),
            run_lock: Mutex::new(()),
        }
    }

    pub fn from_config(pool: SqlitePool, restart: Arc<dyn RestartSignal>, config: &JobConfig) -> Self {
        Self::new(
            pool,
            restart,
            config.penalty_policy(),
            &config.xray_config,
            config.identity_marker.as_str(),
        )
    }

    pub async fn run(&self) -> RunReport {
        let _guard = self.run_lock.lock().await;
        tracing::debug!("[iplimit] [run] Check Client IP Job...");

        let mut report = RunReport::default();

        self.penalty.restore_baseline().await;
        let grace = self.penalty.evaluate_grace().await;
        report.penalized = grace.penalized;
        report.reactivated = grace.reactivated;

        let Some(observations) = self.harvest().await else {
            return report;
        };
        report.log_harvested = true;

        let aggregate = IpAggregate::collect(observations, &grace.excluded);
        report.observed_identities = aggregate.len();
        report.snapshots_persisted = snapshot::persist(&self.pool, &aggregate).await;

        if !aggregate.is_empty() {
            report.disabled = self.enforce(&aggregate).await;
        }

        tracing::info!(
            "[iplimit] [run] identities={} penalized={} reactivated={} disabled={}",
            report.observed_identities,
            report.penalized.len(),
            report.reactivated.len(),
            report.disabled.len()
        );
        report
    }

    /// Read and clear the access log off the async workers.
    async fn harvest(&self) -> Option<Vec<IpObservation>> {
        let xray_config = self.xray_config.clone();
        let harvester = Arc::clone(&self.harvester);

        let task = tokio::task::spawn_blocking(move || {
            let path = xray::config::access_log_path(&xray_config)?;
            match harvester.harvest(&path) {
                Ok(observations) => Some(observations),
                Err(e) => {
                    tracing::warn!("[iplimit] [harvest] {e}");
                    None
                }
            }
        });

        match task.await {
            Ok(observations) => observations,
            Err(e) => {
                tracing::error!("[iplimit] [harvest] task failed: {e}");
                None
            }
        }
    }

    /// Apply at most one breach per inbound. Returns the inbounds disabled.
    async fn enforce(&self, aggregate: &IpAggregate) -> Vec<i64> {
        let inbounds = match inbound_db::all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("[iplimit] [enforce] cannot load inbounds: {e}");
                return Vec::new();
            }
        };
        let index = IdentityIndex::build(&inbounds);

        let mut seen = HashSet::new();
        let mut disabled = Vec::new();
        for (identity, ips) in aggregate.iter() {
            let Some(owner) = index.resolve(identity) else {
                tracing::debug!("[iplimit] [enforce] identity={identity} has no inbound");
                continue;
            };
            if !owner.is_breached_by(ips.len()) || !seen.insert(owner.inbound_id) {
                continue;
            }

            tracing::info!(
                "[iplimit] [breach] identity={identity} inbound_id={} ips={} limit={}",
                owner.inbound_id,
                ips.len(),
                owner.limit
            );
            if self.penalty.breach(owner.inbound_id, owner.penalty).await {
                disabled.push(owner.inbound_id);
            }
        }
        disabled
    }
}
