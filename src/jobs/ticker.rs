// =============================================================================
// TickerJob — HTTP `allMids` poll (spec §4.6: `update_ticker` every 60s)
// =============================================================================
//
// Grounded on `connectors/hyperliquid/client.py`'s `all_mids` request and
// `jobs/scheduler.py`'s `update_ticker` registration. REST-sourced ticker
// updates share the exact same `EventType::Ticker` / `Raw{symbol,price}`
// shape the `AllMidsCollector` WS path emits (see `collectors/all_mids.rs`),
// so downstream processors and `PersistenceHandler` need no branch for
// "did this come from WS or REST".
// =============================================================================

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::event_bus::EventBus;
use crate::events::{EventPayload, EventType, StandardEvent};
use crate::hyperliquid::HyperliquidClient;
use crate::rate_limit::RateLimitManager;

pub struct TickerJob {
    client: HyperliquidClient,
    bus: Arc<dyn EventBus>,
    rate_limiter: Arc<RateLimitManager>,
    target_symbol: String,
}

impl TickerJob {
    pub fn new(client: HyperliquidClient, bus: Arc<dyn EventBus>, rate_limiter: Arc<RateLimitManager>, target_symbol: impl Into<String>) -> Self {
        Self { client, bus, rate_limiter, target_symbol: target_symbol.into() }
    }

    pub async fn run(&self) {
        let mids = match self.client.all_mids().await {
            Ok(mids) => {
                self.rate_limiter.report_success();
                mids
            }
            Err(e) => {
                self.rate_limiter.report_error();
                warn!(error = %e, "update_ticker: allMids fetch failed");
                return;
            }
        };

        let Some(price_str) = mids.get(&self.target_symbol).and_then(|v| v.as_str()) else {
            debug!(symbol = %self.target_symbol, "update_ticker: symbol absent from allMids response");
            return;
        };
        let Ok(price) = price_str.parse::<f64>() else { return };

        let payload = json!({ "symbol": self.target_symbol, "price": price });
        let event = StandardEvent::create(EventType::Ticker, "hyperliquid_ticker_rest", EventPayload::Raw(payload), None, None);
        if !self.bus.publish(event).await {
            warn!("update_ticker: bus saturated, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::InProcessBus;

    #[tokio::test]
    async fn fetch_failure_publishes_nothing_and_reports_rate_limit_error() {
        // A live endpoint is out of scope for unit tests; pointing the
        // client at an unroutable port exercises the fetch-failure branch,
        // which is what actually guards "nothing published" here.
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::default());
        let rate_limiter = Arc::new(RateLimitManager::default());
        let job = TickerJob::new(HyperliquidClient::new("http://127.0.0.1:0"), bus.clone(), rate_limiter.clone(), "BTC");
        job.run().await;
        assert_eq!(bus.metrics().published, 0);
    }
}
