//! Fixed-cadence driver for the enforcement job
//!
//! Runs the job on its own task. Shutdown stops the ticking but lets a run
//! that already started finish, so a truncate/rewrite sequence is never cut
//! in half.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{CheckClientIpJob, RunReport};

pub struct Scheduler {
    stop: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl Scheduler {
    /// Start running `job` every `period`, the first run immediately.
    /// `after_run` sees each report once the run has released the job.
    pub fn spawn<F>(job: Arc<CheckClientIpJob>, period: Duration, mut after_run: F) -> Self
    where
        F: FnMut(&RunReport) + Send + 'static,
    {
        let (stop, mut stopped) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut runs = 0u64;

            loop {
                tokio::select! {
                    biased;
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let report = job.run().await;
                        runs += 1;
                        after_run(&report);
                    }
                }
            }

            tracing::debug!("[iplimit] [scheduler] stopped after {runs} runs");
            runs
        });

        Self { stop, handle }
    }

    /// Stop ticking and wait up to `timeout` for an in-flight run. Returns the
    /// number of completed runs, or `None` if the wait timed out.
    pub async fn shutdown(self, timeout: Duration) -> Option<u64> {
        let _ = self.stop.send(true);
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(runs)) => Some(runs),
            Ok(Err(e)) => {
                tracing::error!("[iplimit] [scheduler] job task failed: {e}");
                None
            }
            Err(_) => {
                tracing::warn!("[iplimit] [scheduler] run still in flight after {timeout:?}, giving up");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;
    use crate::job::penalty::PenaltyPolicy;
    use crate::xray::XrayService;
    use std::sync::atomic::{AtomicU64, Ordering};

    async fn idle_job(dir: &tempfile::TempDir) -> Arc<CheckClientIpJob> {
        Arc::new(CheckClientIpJob::new(
            test_pool().await,
            Arc::new(XrayService::new()),
            PenaltyPolicy::new(1, 2),
            dir.path().join("missing.json"),
            "email:",
        ))
    }

    #[tokio::test]
    async fn test_runs_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let job = idle_job(&dir).await;

        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        let scheduler = Scheduler::spawn(job, Duration::from_millis(10), move |report| {
            assert!(!report.log_harvested);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        let runs = scheduler.shutdown(Duration::from_secs(5)).await.unwrap();

        assert!(runs >= 1);
        assert_eq!(runs, seen.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_run() {
        let dir = tempfile::tempdir().unwrap();
        let job = idle_job(&dir).await;

        // hold the job so the first tick blocks inside run()
        let busy = job.run_lock.lock().await;
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        let scheduler = Scheduler::spawn(Arc::clone(&job), Duration::from_secs(60), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        let (runs, _) = tokio::join!(scheduler.shutdown(Duration::from_secs(5)), async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(busy);
        });

        assert_eq!(runs, Some(1));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_stuck_run() {
        let dir = tempfile::tempdir().unwrap();
        let job = idle_job(&dir).await;

        let busy = job.run_lock.lock().await;
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        let scheduler = Scheduler::spawn(Arc::clone(&job), Duration::from_secs(60), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(scheduler.shutdown(Duration::from_millis(20)).await, None);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        drop(busy);
    }
}
