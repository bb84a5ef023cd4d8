// =============================================================================
// CandlesCollector — OHLCV frames -> Ohlcv events
// =============================================================================
//
// Grounded on examples/original_source/market-scraper/.../collectors/
// candles.py: Hyperliquid's candle channel tags each frame with `s`
// (symbol) and `i` (interval); only the configured target symbol is kept.
// =============================================================================

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::events::{Candle, CandleInterval, EventPayload, EventType, StandardEvent};

use super::matches_symbol;

pub struct CandlesCollector {
    target_symbol: String,
    source: &'static str,
}

impl CandlesCollector {
    pub fn new(target_symbol: impl Into<String>) -> Self {
        Self { target_symbol: target_symbol.into(), source: "hyperliquid_candles_ws" }
    }

    fn parse_interval(raw: &str) -> Option<CandleInterval> {
        CandleInterval::ALL.iter().copied().find(|i| i.as_str() == raw)
    }

    /// Parse one `candle` channel frame. Returns zero or one `Ohlcv` event.
    pub fn handle_message(&self, data: Value) -> Vec<StandardEvent> {
        let candle = match data.get("data") {
            Some(c) if !c.is_null() => c,
            _ => return Vec::new(),
        };

        let symbol = candle.get("s").and_then(Value::as_str).unwrap_or_default();
        if !matches_symbol(symbol, &self.target_symbol) {
            return Vec::new();
        }

        let interval_raw = candle.get("i").and_then(Value::as_str).unwrap_or_default();
        let Some(interval) = Self::parse_interval(interval_raw) else {
            warn!(interval = interval_raw, "unrecognized candle interval, dropping frame");
            return Vec::new();
        };

        let open_time = candle.get("t").and_then(Value::as_i64).unwrap_or(0);
        let parse_f64 = |key: &str| -> f64 {
            candle.get(key).and_then(Value::as_f64).or_else(|| candle.get(key).and_then(Value::as_str).and_then(|s| s.parse().ok())).unwrap_or(0.0)
        };

        let parsed = Candle {
            symbol: self.target_symbol.clone(),
            interval,
            open_time,
            o: parse_f64("o"),
            h: parse_f64("h"),
            l: parse_f64("l"),
            c: parse_f64("c"),
            v: parse_f64("v"),
            trade_count: candle.get("n").and_then(Value::as_u64).unwrap_or(0),
        };

        if !parsed.is_valid() {
            warn!(?parsed, "candle failed OHLC invariant check, dropping");
            return Vec::new();
        }

        vec![StandardEvent::create(EventType::Ohlcv, self.source, EventPayload::Candle(parsed), None, None)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(symbol: &str, interval: &str) -> Value {
        json!({
            "channel": "candle",
            "data": { "s": symbol, "i": interval, "t": 1_700_000_000_000i64, "o": "100.0", "h": "105.0", "l": "99.0", "c": "103.0", "v": "42.5", "n": 12 }
        })
    }

    #[test]
    fn parses_matching_symbol_candle() {
        let collector = CandlesCollector::new("BTC");
        let events = collector.handle_message(frame("BTC", "1m"));
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            EventPayload::Candle(c) => {
                assert_eq!(c.interval, CandleInterval::M1);
                assert_eq!(c.o, 100.0);
                assert_eq!(c.v, 42.5);
            }
            _ => panic!("expected candle payload"),
        }
    }

    #[test]
    fn filters_non_target_symbol() {
        let collector = CandlesCollector::new("BTC");
        assert!(collector.handle_message(frame("ETH", "1m")).is_empty());
    }

    #[test]
    fn drops_invalid_ohlc_invariant() {
        let collector = CandlesCollector::new("BTC");
        let mut bad = frame("BTC", "1m");
        bad["data"]["h"] = json!("50.0"); // high below open/close
        assert!(collector.handle_message(bad).is_empty());
    }
}
