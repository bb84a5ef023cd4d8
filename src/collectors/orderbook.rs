// =============================================================================
// OrderbookCollector — l2Book frames -> OrderBook events, save-on-change
// =============================================================================
//
// Grounded on base.py's buffering contract plus spec §4.2's orderbook
// policy: only emit when the mid price has moved by more than
// `orderbook_price_change_pct` since the last emitted snapshot, or when
// `orderbook_max_save_interval_s` has elapsed since the last emission —
// whichever comes first (heartbeat floor so a perfectly flat book still
// produces periodic snapshots).
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use crate::events::{BookLevel, EventPayload, EventType, OrderBookSnapshot, StandardEvent};

use super::matches_symbol;

struct LastEmit {
    mid: f64,
    at: Instant,
}

pub struct OrderbookCollector {
    target_symbol: String,
    source: &'static str,
    price_change_pct: f64,
    max_save_interval: Duration,
    last: Mutex<Option<LastEmit>>,
}

impl OrderbookCollector {
    pub fn new(target_symbol: impl Into<String>, price_change_pct: f64, max_save_interval: Duration) -> Self {
        Self {
            target_symbol: target_symbol.into(),
            source: "hyperliquid_l2book_ws",
            price_change_pct,
            max_save_interval,
            last: Mutex::new(None),
        }
    }

    fn parse_levels(raw: &Value) -> Vec<BookLevel> {
        raw.as_array()
            .map(|levels| {
                levels
                    .iter()
                    .filter_map(|lvl| {
                        let price = lvl.get("px").and_then(Value::as_str)?.parse().ok()?;
                        let size = lvl.get("sz").and_then(Value::as_str)?.parse().ok()?;
                        let order_count = lvl.get("n").and_then(Value::as_u64).unwrap_or(1) as u32;
                        Some(BookLevel { price, size, order_count })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn handle_message(&self, data: Value) -> Vec<StandardEvent> {
        let book = match data.get("data") {
            Some(b) if !b.is_null() => b,
            _ => return Vec::new(),
        };

        let symbol = book.get("coin").and_then(Value::as_str).unwrap_or_default();
        if !matches_symbol(symbol, &self.target_symbol) {
            return Vec::new();
        }

        let levels = book.get("levels").and_then(Value::as_array);
        let Some(levels) = levels else { return Vec::new() };
        if levels.len() < 2 {
            return Vec::new();
        }

        let bids = Self::parse_levels(&levels[0]);
        let asks = Self::parse_levels(&levels[1]);
        if bids.is_empty() || asks.is_empty() {
            return Vec::new();
        }

        let snapshot = OrderBookSnapshot::from_levels(self.target_symbol.clone(), bids, asks);

        let mut last = self.last.lock();
        let should_emit = match last.as_ref() {
            None => true,
            Some(prev) => {
                let moved = prev.mid != 0.0 && ((snapshot.mid - prev.mid).abs() / prev.mid) >= self.price_change_pct;
                let stale = prev.at.elapsed() >= self.max_save_interval;
                moved || stale
            }
        };

        if !should_emit {
            return Vec::new();
        }

        *last = Some(LastEmit { mid: snapshot.mid, at: Instant::now() });
        drop(last);

        vec![StandardEvent::create(EventType::OrderBook, self.source, EventPayload::OrderBook(snapshot), None, None)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(symbol: &str, bid_px: &str, ask_px: &str) -> Value {
        json!({
            "channel": "l2Book",
            "data": {
                "coin": symbol,
                "levels": [
                    [{ "px": bid_px, "sz": "1.5", "n": 3 }],
                    [{ "px": ask_px, "sz": "2.0", "n": 4 }],
                ],
            }
        })
    }

    #[test]
    fn first_snapshot_always_emits() {
        let collector = OrderbookCollector::new("BTC", 0.01, Duration::from_secs(600));
        let events = collector.handle_message(frame("BTC", "100.0", "101.0"));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn unchanged_mid_within_interval_is_suppressed() {
        let collector = OrderbookCollector::new("BTC", 0.01, Duration::from_secs(600));
        collector.handle_message(frame("BTC", "100.0", "101.0"));
        let events = collector.handle_message(frame("BTC", "100.0", "101.0"));
        assert!(events.is_empty());
    }

    #[test]
    fn large_mid_move_forces_emit() {
        let collector = OrderbookCollector::new("BTC", 0.01, Duration::from_secs(600));
        collector.handle_message(frame("BTC", "100.0", "101.0"));
        let events = collector.handle_message(frame("BTC", "200.0", "201.0"));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn filters_non_target_symbol() {
        let collector = OrderbookCollector::new("BTC", 0.01, Duration::from_secs(600));
        assert!(collector.handle_message(frame("ETH", "100.0", "101.0")).is_empty());
    }
}
