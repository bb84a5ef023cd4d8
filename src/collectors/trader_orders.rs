// =============================================================================
// TraderOrdersCollector — webData2 frames -> TraderOrder events, diffed
// =============================================================================
//
// Grounded verbatim on examples/original_source/market-scraper/.../
// collectors/trader_orders.py (`TraderOrdersCollector`): orders arrive
// bundled in the same `webData2` frame as positions. Each trader's previous
// order-id -> order map is diffed against the current one: new ids emit
// "new", status changes emit the new status, and ids that disappear emit
// "closed".
//
// `reconcile_subscriptions` mirrors the trader-positions collector's (spec
// §4.2): it registers its own `webData2` receiver per tracked address so it
// can diff independently, even though both collectors read the same
// underlying stream — the Python source's own comment notes orders "come
// from webData2 subscription (same as positions)".
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::events::{EventPayload, EventType, StandardEvent};
use crate::hyperliquid::{SubscriptionFrame, SubscriptionSpec};
use crate::ws_manager::WsManager;

fn channel_for(address: &str) -> String {
    format!("webData2:{address}")
}

#[derive(Clone)]
struct OrderRecord {
    raw: Value,
    status: String,
}

pub struct TraderOrdersCollector {
    target_symbol: String,
    source: &'static str,
    ws: Arc<WsManager>,
    tracked: Mutex<HashSet<String>>,
    states: Mutex<HashMap<String, HashMap<i64, OrderRecord>>>,
}

impl TraderOrdersCollector {
    pub fn new(target_symbol: impl Into<String>, ws: Arc<WsManager>) -> Self {
        Self {
            target_symbol: target_symbol.into(),
            source: "hyperliquid_webdata2_orders_ws",
            ws,
            tracked: Mutex::new(HashSet::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe `add`'s order streams and unsubscribe `remove`'s; also
    /// drops per-address diff state for removed traders so a later re-add
    /// starts clean rather than emitting spurious "closed" events.
    pub fn reconcile_subscriptions(&self, add: &[String], remove: &[String]) -> Vec<(String, tokio::sync::mpsc::Receiver<Value>)> {
        let mut tracked = self.tracked.lock();
        let mut new_receivers = Vec::new();

        for address in add {
            if !tracked.insert(address.clone()) {
                continue;
            }
            let frame = SubscriptionFrame::subscribe(SubscriptionSpec::web_data2(address.clone()));
            let rx = self.ws.subscribe(&channel_for(address), frame);
            new_receivers.push((address.clone(), rx));
        }

        for address in remove {
            if tracked.remove(address) {
                self.ws.unsubscribe(&channel_for(address));
                self.clear_trader(address);
            }
        }

        new_receivers
    }

    fn status_of(order: &Value) -> String {
        order
            .get("orderStatus")
            .or_else(|| order.get("status"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn order_event(&self, address: &str, order: &Value, action: &str) -> Option<StandardEvent> {
        let order_id = order.get("oid").and_then(Value::as_i64)?;
        let payload = serde_json::json!({
            "address": address,
            "symbol": order.get("coin").and_then(Value::as_str).unwrap_or(&self.target_symbol),
            "order_id": order_id,
            "side": order.get("side").and_then(Value::as_str).unwrap_or(""),
            "price": order.get("limitPx").and_then(Value::as_str).and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0),
            "size": order.get("origSz").and_then(Value::as_str).and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0),
            "remaining_size": order.get("sz").and_then(Value::as_str).and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0),
            "action": action,
            "order_type": order.get("orderType").and_then(Value::as_str).unwrap_or(""),
            "reduce_only": order.get("reduceOnly").and_then(Value::as_bool).unwrap_or(false),
        });
        Some(StandardEvent::create(EventType::TraderOrder, self.source, EventPayload::Raw(payload), None, None))
    }

    /// Process one trader's order list from a `webData2` frame, diffing
    /// against the previously observed order-id set for that address.
    pub fn handle_message(&self, address: &str, data: Value) -> Vec<StandardEvent> {
        let orders = match data.get("data").and_then(|d| d.get("openOrders")).and_then(Value::as_array) {
            Some(o) => o.clone(),
            None => return Vec::new(),
        };

        let mut states = self.states.lock();
        let prev = states.remove(address).unwrap_or_default();
        let mut curr: HashMap<i64, OrderRecord> = HashMap::new();
        let mut events = Vec::new();

        for order in &orders {
            let coin = order.get("coin").and_then(Value::as_str).unwrap_or_default();
            if coin != self.target_symbol {
                continue;
            }
            let Some(oid) = order.get("oid").and_then(Value::as_i64) else { continue };
            let status = Self::status_of(order);

            match prev.get(&oid) {
                None => {
                    if let Some(ev) = self.order_event(address, order, "new") {
                        events.push(ev);
                    }
                }
                Some(prev_record) if prev_record.status != status => {
                    if let Some(ev) = self.order_event(address, order, &status) {
                        events.push(ev);
                    }
                }
                Some(_) => {}
            }

            curr.insert(oid, OrderRecord { raw: order.clone(), status });
        }

        for (oid, prev_record) in prev.iter() {
            if !curr.contains_key(oid) {
                if let Some(ev) = self.order_event(address, &prev_record.raw, "closed") {
                    events.push(ev);
                }
            }
        }

        states.insert(address.to_string(), curr);
        events
    }

    pub fn clear_trader(&self, address: &str) {
        self.states.lock().remove(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn test_ws() -> Arc<WsManager> {
        Arc::new(WsManager::new("wss://example", 5, Duration::from_secs(1), Duration::from_secs(30), Duration::from_secs(30)))
    }

    fn frame(orders: Value) -> Value {
        json!({ "channel": "webData2", "data": { "openOrders": orders } })
    }

    fn order(oid: i64, status: &str) -> Value {
        json!({ "coin": "BTC", "oid": oid, "orderStatus": status, "side": "B", "limitPx": "50000", "origSz": "1.0", "sz": "1.0" })
    }

    #[test]
    fn new_order_emits_new_action() {
        let collector = TraderOrdersCollector::new("BTC", test_ws());
        let events = collector.handle_message("0xabc", frame(json!([order(1, "open")])));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn status_change_emits_new_status_action() {
        let collector = TraderOrdersCollector::new("BTC", test_ws());
        collector.handle_message("0xabc", frame(json!([order(1, "open")])));
        let events = collector.handle_message("0xabc", frame(json!([order(1, "filled")])));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn disappeared_order_emits_closed() {
        let collector = TraderOrdersCollector::new("BTC", test_ws());
        collector.handle_message("0xabc", frame(json!([order(1, "open")])));
        let events = collector.handle_message("0xabc", frame(json!([])));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn unchanged_order_emits_nothing() {
        let collector = TraderOrdersCollector::new("BTC", test_ws());
        collector.handle_message("0xabc", frame(json!([order(1, "open")])));
        let events = collector.handle_message("0xabc", frame(json!([order(1, "open")])));
        assert!(events.is_empty());
    }

    #[test]
    fn reconcile_subscriptions_clears_state_on_remove() {
        let collector = TraderOrdersCollector::new("BTC", test_ws());
        collector.reconcile_subscriptions(&["0xabc".to_string()], &[]);
        collector.handle_message("0xabc", frame(json!([order(1, "open")])));
        assert!(collector.states.lock().contains_key("0xabc"));

        collector.reconcile_subscriptions(&[], &["0xabc".to_string()]);
        assert!(!collector.states.lock().contains_key("0xabc"));
    }
}
