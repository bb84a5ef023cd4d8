// =============================================================================
// FundingJob — HTTP `fundingHistory` poll (spec §4.6: `collect_funding`
// every 8h)
// =============================================================================
//
// Grounded on `hyperliquid-system/src/jobs/btc_funding.py` (`collect_
// funding`): fetch funding history for the target coin, normalize each
// `{time, delta: {fundingRate}}` record into `{metric: "funding", symbol,
// time, funding_rate}` and publish one event per record with `EventType::
// Custom` (spec.md §3 "plus extension strings" — there's no dedicated
// EventType for every HTTP-collected metric). `PersistenceHandler` maps
// these into `funding_{symbol}` (spec §4.5), deduplicated on
// `(symbol, time)` by `Repository::unique_key_fields`.
// =============================================================================

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::event_bus::EventBus;
use crate::events::{EventPayload, EventType, StandardEvent};
use crate::hyperliquid::HyperliquidClient;
use crate::rate_limit::RateLimitManager;

pub struct FundingJob {
    client: HyperliquidClient,
    bus: Arc<dyn EventBus>,
    rate_limiter: Arc<RateLimitManager>,
    target_symbol: String,
    /// Lookback window for each poll; 8h matches the job's own schedule
    /// interval so consecutive polls never miss a funding settlement.
    lookback_ms: i64,
}

impl FundingJob {
    pub fn new(client: HyperliquidClient, bus: Arc<dyn EventBus>, rate_limiter: Arc<RateLimitManager>, target_symbol: impl Into<String>) -> Self {
        Self { client, bus, rate_limiter, target_symbol: target_symbol.into(), lookback_ms: 8 * 3_600_000 }
    }

    pub async fn run(&self) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let start_ms = now_ms - self.lookback_ms;

        let records = match self.client.funding_history(&self.target_symbol, start_ms, Some(now_ms)).await {
            Ok(r) => {
                self.rate_limiter.report_success();
                r
            }
            Err(e) => {
                self.rate_limiter.report_error();
                warn!(error = %e, "collect_funding: fetch failed");
                return;
            }
        };

        for record in &records {
            let Some(time) = record.get("time").and_then(|v| v.as_i64()) else { continue };
            let funding_rate = record.get("delta").and_then(|d| d.get("fundingRate")).and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);

            let payload = json!({ "metric": "funding", "symbol": self.target_symbol, "time": time, "funding_rate": funding_rate });
            let event = StandardEvent::create(EventType::Custom, "hyperliquid_funding_rest", EventPayload::Raw(payload), None, None);
            if !self.bus.publish(event).await {
                warn!("collect_funding: bus saturated, event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::InProcessBus;

    #[tokio::test]
    async fn fetch_failure_publishes_nothing() {
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::default());
        let job = FundingJob::new(HyperliquidClient::new("http://127.0.0.1:0"), bus.clone(), Arc::new(RateLimitManager::default()), "BTC");
        job.run().await;
        assert_eq!(bus.metrics().published, 0);
    }
}
