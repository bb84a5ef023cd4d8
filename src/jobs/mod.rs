// =============================================================================
// Scheduled HTTP jobs (spec §4.6)
// =============================================================================
//
// Each job is a small struct holding the dependencies it needs (HTTP
// client, event bus, repository, rate limiter) and exposing one `run(&self)`
// method; `lifecycle.rs` registers `move || { let job = job.clone(); async
// move { job.run().await } }` closures with the `Scheduler`. Splitting one
// struct per job (rather than one big "jobs" god-object) mirrors the
// original's one-module-per-job layout under `hyperliquid-system/src/jobs/`.
// =============================================================================

pub mod daily_stats;
pub mod funding;
pub mod leaderboard;
pub mod onchain;
pub mod rest_fallback;
pub mod ticker;

use async_trait::async_trait;

use crate::events::StandardEvent;

/// Common contract for ambient HTTP data sources outside Hyperliquid itself
/// (Fear & Greed, CBBI, Blockchain.info, ...). Spec.md §1 scopes concrete
/// implementations of all but one out — `onchain.rs` provides the one
/// illustrative implementation; any other vendor plugs in by implementing
/// this trait.
#[async_trait]
pub trait AuxHttpProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self) -> anyhow::Result<StandardEvent>;
}
