// =============================================================================
// AllMidsCollector — allMids frames -> Ticker events on price change only
// =============================================================================
//
// allMids pushes the full mid-price table on every tick even when the
// target symbol's price hasn't moved. Grounded on base.py's filtering
// contract: only emit when the price has actually changed since the last
// observation, keeping `Raw` as the ticker payload since there is no
// dedicated semantic ticker type (spec §3/§4.2, EventPayload::Raw escape
// hatch).
// =============================================================================

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::events::{EventPayload, EventType, StandardEvent};

pub struct AllMidsCollector {
    target_symbol: String,
    source: &'static str,
    last_price: Mutex<Option<f64>>,
}

impl AllMidsCollector {
    pub fn new(target_symbol: impl Into<String>) -> Self {
        Self { target_symbol: target_symbol.into(), source: "hyperliquid_all_mids_ws", last_price: Mutex::new(None) }
    }

    pub fn handle_message(&self, data: Value) -> Vec<StandardEvent> {
        let mids = match data.get("data").and_then(|d| d.get("mids")) {
            Some(m) => m,
            None => return Vec::new(),
        };

        let Some(price_str) = mids.get(&self.target_symbol).and_then(Value::as_str) else { return Vec::new() };
        let Ok(price) = price_str.parse::<f64>() else { return Vec::new() };

        let mut last = self.last_price.lock();
        let changed = last.map(|p| p != price).unwrap_or(true);
        if !changed {
            return Vec::new();
        }
        *last = Some(price);
        drop(last);

        let payload = json!({ "symbol": self.target_symbol, "price": price });
        vec![StandardEvent::create(EventType::Ticker, self.source, EventPayload::Raw(payload), None, None)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(btc_px: &str) -> Value {
        json!({ "channel": "allMids", "data": { "mids": { "BTC": btc_px, "ETH": "3000.0" } } })
    }

    #[test]
    fn first_observation_emits() {
        let collector = AllMidsCollector::new("BTC");
        assert_eq!(collector.handle_message(frame("50000.0")).len(), 1);
    }

    #[test]
    fn unchanged_price_is_suppressed() {
        let collector = AllMidsCollector::new("BTC");
        collector.handle_message(frame("50000.0"));
        assert!(collector.handle_message(frame("50000.0")).is_empty());
    }

    #[test]
    fn changed_price_emits_again() {
        let collector = AllMidsCollector::new("BTC");
        collector.handle_message(frame("50000.0"));
        assert_eq!(collector.handle_message(frame("50001.0")).len(), 1);
    }
}
