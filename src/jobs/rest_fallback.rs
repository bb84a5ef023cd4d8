// =============================================================================
// REST-fallback collection jobs (spec §4.6 / DESIGN.md Open Question 2)
// =============================================================================
//
// Grounded on examples/original_source/hyperliquid/hyperliquid-system/src/
// jobs/btc_orderbook.py (`collect_orderbook`) and btc_trades.py
// (`collect_trades`): when the WS connection is unavailable, these jobs poll
// the same data over HTTP on a schedule instead. Each job wraps the fetched
// payload into the exact frame shape its WS-path collector already parses
// (`OrderbookCollector`/`TradesCollector`/`CandlesCollector`), so there is
// one parsing/validation/filtering implementation per data type regardless
// of transport — only scheduled by `lifecycle.rs` when
// `RuntimeConfig::ws_available` is false, mutually exclusive with the WS
// collectors for the same data.
// =============================================================================

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::warn;

use crate::collectors::candles::CandlesCollector;
use crate::collectors::orderbook::OrderbookCollector;
use crate::collectors::trades::TradesCollector;
use crate::event_bus::EventBus;
use crate::events::CandleInterval;
use crate::hyperliquid::HyperliquidClient;
use crate::rate_limit::RateLimitManager;

/// Inject `"coin": symbol` into `value` if it is a JSON object lacking the
/// field — REST responses for a single coin don't always echo it back the
/// way the WS channels do, but the collectors' `matches_symbol` check needs
/// it present.
fn with_coin(mut value: Value, symbol: &str) -> Value {
    if let Some(obj) = value.as_object_mut() {
        obj.entry("coin").or_insert_with(|| json!(symbol));
    }
    value
}

async fn publish_all(bus: &Arc<dyn EventBus>, events: Vec<crate::events::StandardEvent>) {
    for event in events {
        if !bus.publish(event).await {
            warn!("rest_fallback: bus saturated, event dropped");
        }
    }
}

/// `collect_orderbook` REST fallback (spec §4.6), grounded on
/// `btc_orderbook.py`.
pub struct OrderbookRestJob {
    client: HyperliquidClient,
    bus: Arc<dyn EventBus>,
    rate_limiter: Arc<RateLimitManager>,
    target_symbol: String,
    collector: OrderbookCollector,
}

impl OrderbookRestJob {
    pub fn new(client: HyperliquidClient, bus: Arc<dyn EventBus>, rate_limiter: Arc<RateLimitManager>, target_symbol: impl Into<String>, collector: OrderbookCollector) -> Self {
        Self { client, bus, rate_limiter, target_symbol: target_symbol.into(), collector }
    }

    pub async fn run(&self) {
        let book = match self.client.l2_book(&self.target_symbol).await {
            Ok(b) => {
                self.rate_limiter.report_success();
                b
            }
            Err(e) => {
                self.rate_limiter.report_error();
                warn!(error = %e, "collect_orderbook: l2Book fetch failed");
                return;
            }
        };

        let frame = json!({ "data": with_coin(book, &self.target_symbol) });
        publish_all(&self.bus, self.collector.handle_message(frame)).await;
    }
}

/// `collect_trades` REST fallback (spec §4.6), grounded on
/// `btc_trades.py`.
pub struct TradesRestJob {
    client: HyperliquidClient,
    bus: Arc<dyn EventBus>,
    rate_limiter: Arc<RateLimitManager>,
    target_symbol: String,
    collector: TradesCollector,
}

impl TradesRestJob {
    pub fn new(client: HyperliquidClient, bus: Arc<dyn EventBus>, rate_limiter: Arc<RateLimitManager>, target_symbol: impl Into<String>, collector: TradesCollector) -> Self {
        Self { client, bus, rate_limiter, target_symbol: target_symbol.into(), collector }
    }

    pub async fn run(&self) {
        let trades = match self.client.recent_trades(&self.target_symbol).await {
            Ok(t) => {
                self.rate_limiter.report_success();
                t
            }
            Err(e) => {
                self.rate_limiter.report_error();
                warn!(error = %e, "collect_trades: recentTrades fetch failed");
                return;
            }
        };

        let tagged: Vec<Value> = trades.into_iter().map(|t| with_coin(t, &self.target_symbol)).collect();
        let frame = json!({ "data": tagged });
        publish_all(&self.bus, self.collector.handle_message(frame)).await;
    }
}

/// `collect_candles` REST fallback (spec §4.6): one `candleSnapshot` call
/// per configured interval, each trimmed to its most recent bar.
pub struct CandlesRestJob {
    client: HyperliquidClient,
    bus: Arc<dyn EventBus>,
    rate_limiter: Arc<RateLimitManager>,
    target_symbol: String,
    intervals: Vec<CandleInterval>,
    collector: CandlesCollector,
}

impl CandlesRestJob {
    pub fn new(client: HyperliquidClient, bus: Arc<dyn EventBus>, rate_limiter: Arc<RateLimitManager>, target_symbol: impl Into<String>, intervals: Vec<CandleInterval>, collector: CandlesCollector) -> Self {
        Self { client, bus, rate_limiter, target_symbol: target_symbol.into(), intervals, collector }
    }

    pub async fn run(&self) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        for interval in &self.intervals {
            let start_ms = now_ms - interval.seconds() * 1000 * 2;
            let candles = match self.client.candle_snapshot(&self.target_symbol, interval.as_str(), start_ms, now_ms).await {
                Ok(c) => {
                    self.rate_limiter.report_success();
                    c
                }
                Err(e) => {
                    self.rate_limiter.report_error();
                    warn!(error = %e, interval = interval.as_str(), "collect_candles: candleSnapshot fetch failed");
                    continue;
                }
            };

            let Some(latest) = candles.into_iter().max_by_key(|c| c.get("t").and_then(Value::as_i64).unwrap_or(i64::MIN)) else { continue };
            let mut tagged = latest;
            if let Some(obj) = tagged.as_object_mut() {
                obj.insert("s".into(), json!(self.target_symbol));
                obj.insert("i".into(), json!(interval.as_str()));
            }

            let frame = json!({ "data": tagged });
            publish_all(&self.bus, self.collector.handle_message(frame)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::InProcessBus;
    use std::time::Duration;

    fn bus() -> Arc<dyn EventBus> {
        Arc::new(InProcessBus::default())
    }

    #[test]
    fn with_coin_preserves_existing_field() {
        let v = with_coin(json!({ "coin": "ETH", "levels": [] }), "BTC");
        assert_eq!(v["coin"], "ETH");
    }

    #[test]
    fn with_coin_injects_missing_field() {
        let v = with_coin(json!({ "levels": [] }), "BTC");
        assert_eq!(v["coin"], "BTC");
    }

    #[tokio::test]
    async fn orderbook_fetch_failure_publishes_nothing() {
        let b = bus();
        let job = OrderbookRestJob::new(HyperliquidClient::new("http://127.0.0.1:0"), b.clone(), Arc::new(RateLimitManager::default()), "BTC", OrderbookCollector::new("BTC", 0.01, Duration::from_secs(600)));
        job.run().await;
        assert_eq!(b.metrics().published, 0);
    }

    #[tokio::test]
    async fn trades_fetch_failure_publishes_nothing() {
        let b = bus();
        let job = TradesRestJob::new(HyperliquidClient::new("http://127.0.0.1:0"), b.clone(), Arc::new(RateLimitManager::default()), "BTC", TradesCollector::new("BTC", 1000.0));
        job.run().await;
        assert_eq!(b.metrics().published, 0);
    }

    #[tokio::test]
    async fn candles_fetch_failure_publishes_nothing() {
        let b = bus();
        let job = CandlesRestJob::new(HyperliquidClient::new("http://127.0.0.1:0"), b.clone(), Arc::new(RateLimitManager::default()), "BTC", vec![CandleInterval::M1], CandlesCollector::new("BTC"));
        job.run().await;
        assert_eq!(b.metrics().published, 0);
    }
}
