// =============================================================================
// Scheduler — named periodic jobs with misfire coalescing (spec §4.6)
// =============================================================================
//
// Grounded on examples/original_source/market-scraper/src/market_scraper/
// orchestration/scheduler.py for the basic "one task per job, looped with a
// sleep" shape, generalized to the richer behavior
// examples/original_source/hyperliquid/hyperliquid-system/src/jobs/
// scheduler.py's APScheduler setup asks for via
// `job_defaults={"coalesce": True, "max_instances": 1,
// "misfire_grace_time": 60}`:
//   - `max_instances: 1` — each job loop awaits its callback to completion
//     before sleeping for the next tick, so a job can never overlap itself.
//   - `coalesce: True` — a job that falls more than `misfire_grace` behind
//     its schedule does not run a backlog of missed ticks; it skips
//     straight to the next future slot.
//   - `misfire_grace_time` — a job that's late but within the grace window
//     still runs (once), immediately, rather than being skipped.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct Scheduler {
    misfire_grace: Duration,
    shutdown_grace: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Mutex<Vec<(String, tokio::task::JoinHandle<()>)>>,
}

impl Scheduler {
    pub fn new(misfire_grace: Duration, shutdown_grace: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self { misfire_grace, shutdown_grace, shutdown_tx, shutdown_rx, handles: Mutex::new(Vec::new()) }
    }

    /// Schedule `job` to run every `interval`, starting one interval from
    /// now. `job` must be idempotent-safe to skip on misfire.
    pub fn schedule<F, Fut>(&self, name: impl Into<String>, interval: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let name = name.into();
        let task_name = name.clone();
        let misfire_grace = self.misfire_grace;
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut next_fire = Instant::now() + interval;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(next_fire) => {}
                    _ = shutdown_rx.changed() => {}
                }
                if *shutdown_rx.borrow() {
                    return;
                }

                let lateness = Instant::now().saturating_duration_since(next_fire);
                if lateness > misfire_grace {
                    warn!(job = %task_name, lateness_ms = lateness.as_millis() as u64, "job misfire beyond grace period, coalescing (skipping this run)");
                } else {
                    job().await;
                }

                // Advance from the scheduled slot, not from `now`, so a
                // single late run doesn't compound drift; if we're still
                // behind after one interval (the callback itself ran long,
                // or we coalesced a misfire), jump straight to the next
                // future slot instead of bursting through every missed one.
                next_fire += interval;
                let now = Instant::now();
                if next_fire <= now {
                    let behind = now.saturating_duration_since(next_fire).as_secs_f64();
                    let skip_intervals = (behind / interval.as_secs_f64()).floor() as u32 + 1;
                    next_fire += interval * skip_intervals;
                }
            }
        });

        self.handles.lock().push((name, handle));
    }

    /// Stop accepting new triggers and wait up to `shutdown_grace` for
    /// in-flight jobs to finish; beyond that, running jobs are aborted.
    pub async fn shutdown(&self) {
        info!("scheduler shutdown requested");
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<(String, tokio::task::JoinHandle<()>)> = std::mem::take(&mut *self.handles.lock());
        for (name, handle) in handles {
            match tokio::time::timeout(self.shutdown_grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(job = %name, error = %e, "scheduled job task panicked"),
                Err(_) => warn!(job = %name, "job did not finish within shutdown_grace, aborting"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn job_fires_repeatedly_at_interval() {
        let scheduler = Scheduler::new(Duration::from_secs(60), Duration::from_secs(1));
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler.schedule("test_job", Duration::from_millis(15), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(70)).await;
        scheduler.shutdown().await;

        assert!(count.load(Ordering::SeqCst) >= 3, "expected several fires, got {}", count.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn slow_job_does_not_overlap_itself() {
        let scheduler = Scheduler::new(Duration::from_secs(60), Duration::from_secs(1));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));
        let c = concurrent.clone();
        let m = max_concurrent.clone();

        scheduler.schedule("slow_job", Duration::from_millis(10), move || {
            let c = c.clone();
            let m = m.clone();
            async move {
                let now = c.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(25)).await;
                c.fetch_sub(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        scheduler.shutdown().await;

        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_further_firing() {
        let scheduler = Scheduler::new(Duration::from_secs(60), Duration::from_secs(1));
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler.schedule("test_job", Duration::from_millis(10), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.shutdown().await;
        let after_shutdown = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_shutdown);
    }
}
