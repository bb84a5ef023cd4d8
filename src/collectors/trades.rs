// =============================================================================
// TradesCollector — trades frames -> Trade events, min-value filter + dedup
// =============================================================================
//
// Grounded on base.py's buffering contract and spec §4.2: only trades with
// `usd_value >= trade_min_value_usd` (default $1000) are kept, and a
// bounded recent-id set suppresses the exchange's occasional duplicate
// redelivery of the same trade on reconnect.
// =============================================================================

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde_json::Value;

use crate::events::{EventPayload, EventType, MarketTrade, StandardEvent, TradeSide};

use super::matches_symbol;

const DEDUP_WINDOW: usize = 4096;

struct Dedup {
    seen: std::collections::HashSet<u64>,
    order: VecDeque<u64>,
}

impl Dedup {
    fn new() -> Self {
        Self { seen: std::collections::HashSet::new(), order: VecDeque::new() }
    }

    fn insert_if_new(&mut self, id: u64) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > DEDUP_WINDOW {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

pub struct TradesCollector {
    target_symbol: String,
    source: &'static str,
    min_value_usd: f64,
    dedup: Mutex<Dedup>,
}

impl TradesCollector {
    pub fn new(target_symbol: impl Into<String>, min_value_usd: f64) -> Self {
        Self {
            target_symbol: target_symbol.into(),
            source: "hyperliquid_trades_ws",
            min_value_usd,
            dedup: Mutex::new(Dedup::new()),
        }
    }

    pub fn handle_message(&self, data: Value) -> Vec<StandardEvent> {
        let trades = match data.get("data").and_then(Value::as_array) {
            Some(t) => t,
            None => return Vec::new(),
        };

        let mut events = Vec::new();
        for trade in trades {
            let coin = trade.get("coin").and_then(Value::as_str).unwrap_or_default();
            if !matches_symbol(coin, &self.target_symbol) {
                continue;
            }

            let Some(trade_id) = trade.get("tid").and_then(Value::as_u64) else { continue };
            let price: f64 = trade.get("px").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or(0.0);
            let size: f64 = trade.get("sz").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or(0.0);
            if price <= 0.0 || size <= 0.0 {
                continue;
            }

            let usd_value = price * size;
            if usd_value < self.min_value_usd {
                continue;
            }

            if !self.dedup.lock().insert_if_new(trade_id) {
                continue;
            }

            let side = match trade.get("side").and_then(Value::as_str) {
                Some("B") => TradeSide::Buy,
                _ => TradeSide::Sell,
            };

            let market_trade = MarketTrade::new(self.target_symbol.clone(), side, price, size, trade_id);
            events.push(StandardEvent::create(EventType::Trade, self.source, EventPayload::Trade(market_trade), None, None));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(symbol: &str, tid: u64, px: &str, sz: &str, side: &str) -> Value {
        json!({ "channel": "trades", "data": [{ "coin": symbol, "tid": tid, "px": px, "sz": sz, "side": side }] })
    }

    #[test]
    fn keeps_trade_at_or_above_min_value() {
        let collector = TradesCollector::new("BTC", 1000.0);
        let events = collector.handle_message(frame("BTC", 1, "50000", "0.1", "B"));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn filters_trade_below_min_value() {
        let collector = TradesCollector::new("BTC", 1000.0);
        let events = collector.handle_message(frame("BTC", 1, "50000", "0.001", "B"));
        assert!(events.is_empty());
    }

    #[test]
    fn dedups_repeated_trade_id() {
        let collector = TradesCollector::new("BTC", 1000.0);
        let first = collector.handle_message(frame("BTC", 7, "50000", "1.0", "A"));
        let second = collector.handle_message(frame("BTC", 7, "50000", "1.0", "A"));
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn filters_non_target_symbol() {
        let collector = TradesCollector::new("BTC", 1000.0);
        assert!(collector.handle_message(frame("ETH", 1, "50000", "1.0", "B")).is_empty());
    }
}
