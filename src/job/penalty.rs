//! Inbound penalty state machine
//!
//! | state             | enable | penalty          |
//! |-------------------|--------|------------------|
//! | Active            | true   | any              |
//! | Exempt            | false  | -1               |
//! | Penalized(n)      | false  | 0 ≤ n < threshold|
//! | ReadyToReactivate | false  | n ≥ threshold    |
//!
//! Penalized inbounds gain one tick per run, ready ones are re-enabled with the
//! counter parked at -1, and a breach turns an Active inbound into
//! Penalized(0). Exempt inbounds are only ever changed by an operator.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::database::inbound_db;
use crate::database::model::{Inbound, PENALTY_EXEMPT};
use crate::xray::RestartSignal;

use super::resolver::identities_of;

/// How long a breaching inbound stays disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PenaltyPolicy {
    grace_cycles: u32,
    ticks_per_cycle: u32,
}

impl PenaltyPolicy {
    /// `grace_cycles` nominal intervals of `ticks_per_cycle` runs each.
    pub fn new(grace_cycles: u32, ticks_per_cycle: u32) -> Self {
        Self {
            grace_cycles,
            ticks_per_cycle,
        }
    }

    /// Counter value at which a disabled inbound is re-enabled.
    pub fn threshold(&self) -> i64 {
        i64::from(self.grace_cycles) * i64::from(self.ticks_per_cycle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyState {
    Active,
    Exempt,
    Penalized(i64),
    ReadyToReactivate(i64),
}

impl PenaltyState {
    pub fn of(inbound: &Inbound, policy: &PenaltyPolicy) -> Self {
        match (inbound.enable, inbound.penalty) {
            (true, _) => PenaltyState::Active,
            (false, p) if p <= PENALTY_EXEMPT => PenaltyState::Exempt,
            (false, p) if p < policy.threshold() => PenaltyState::Penalized(p),
            (false, p) => PenaltyState::ReadyToReactivate(p),
        }
    }
}

/// What the grace pass did this run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GraceOutcome {
    /// Inbounds whose counter advanced.
    pub penalized: Vec<i64>,
    /// Inbounds re-enabled after the full penalty.
    pub reactivated: Vec<i64>,
    /// Identities of inbounds still serving a penalty; their log lines are
    /// not counted this run.
    pub excluded: HashSet<String>,
}

pub struct PenaltyStateMachine {
    pool: SqlitePool,
    policy: PenaltyPolicy,
    restart: Arc<dyn RestartSignal>,
}

impl PenaltyStateMachine {
    pub fn new(pool: SqlitePool, policy: PenaltyPolicy, restart: Arc<dyn RestartSignal>) -> Self {
        Self {
            pool,
            policy,
            restart,
        }
    }

    /// Bring every enabled inbound back to a zero counter, including the ones
    /// parked at -1 by the previous run's reactivation.
    pub async fn restore_baseline(&self) {
        match inbound_db::restore_baseline(&self.pool).await {
            Ok(0) => {}
            Ok(n) => tracing::debug!("[iplimit] [penalty] baseline restored on {n} inbounds"),
            Err(e) => tracing::warn!("[iplimit] [penalty] cannot restore baseline: {e}"),
        }
    }

    /// Advance or release every disabled inbound under automatic control.
    pub async fn evaluate_grace(&self) -> GraceOutcome {
        let mut outcome = GraceOutcome::default();

        let inbounds = match inbound_db::penalized(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("[iplimit] [penalty] cannot load penalized inbounds: {e}");
                return outcome;
            }
        };

        for inbound in &inbounds {
            let id = inbound.id;
            match PenaltyState::of(inbound, &self.policy) {
                PenaltyState::Penalized(n) => {
                    outcome.excluded.extend(identities_of(inbound));
                    match inbound_db::increment_penalty(&self.pool, id, n).await {
                        Ok(true) => outcome.penalized.push(id),
                        Ok(false) => tracing::debug!(
                            "[iplimit] [penalty] inbound_id={id} changed concurrently, tick skipped"
                        ),
                        Err(e) => tracing::error!(
                            "[iplimit] [penalty] couldn't update penalty of inbound_id={id}: {e}"
                        ),
                    }
                }
                PenaltyState::ReadyToReactivate(n) => {
                    match inbound_db::reactivate(&self.pool, id, n).await {
                        Ok(true) => {
                            self.restart.set_to_need_restart();
                            outcome.reactivated.push(id);
                            tracing::warn!("[iplimit] [enable] inbound_id={id} re-enabled after penalty");
                        }
                        Ok(false) => tracing::debug!(
                            "[iplimit] [penalty] inbound_id={id} changed concurrently, not re-enabled"
                        ),
                        Err(e) => {
                            // still disabled; keep its clients out of this run
                            outcome.excluded.extend(identities_of(inbound));
                            tracing::error!("[iplimit] [penalty] couldn't re-enable inbound_id={id}: {e}");
                        }
                    }
                }
                PenaltyState::Active | PenaltyState::Exempt => {}
            }
        }

        outcome
    }

    /// Disable an Active inbound whose counter is `expected`. Returns true when
    /// the transition was applied and a restart requested.
    pub async fn breach(&self, inbound_id: i64, expected: i64) -> bool {
        match inbound_db::disable(&self.pool, inbound_id, expected).await {
            Ok(true) => {
                self.restart.set_to_need_restart();
                tracing::warn!("[iplimit] [disable] inbound_id={inbound_id} disabled");
                true
            }
            Ok(false) => {
                tracing::debug!("[iplimit] [disable] inbound_id={inbound_id} changed concurrently, left alone");
                false
            }
            Err(e) => {
                tracing::error!("[iplimit] [disable] couldn't disable inbound_id={inbound_id}: {e}");
                false
            }
        }
    }
}
