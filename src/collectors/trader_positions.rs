// =============================================================================
// TraderPositionsCollector — webData2 frames -> TraderPositions events
// =============================================================================
//
// Grounded on examples/original_source/hyperliquid/hyperliquid-system/src/
// jobs/trader_positions.py (`_collect_single_trader_position`): Hyperliquid's
// `clearinghouseState`/`webData2` shape nests each position under
// `assetPositions[].position` with `szi`/`entryPx`/`positionValue`/
// `unrealizedPnl`/`leverage`/`liquidationPx`/`marginUsed`, and account value
// under `marginSummary.accountValue`. This collector only turns the wire
// shape into a `TraderPositionsSnapshot`; change detection against the
// previous snapshot is the Position-Detection processor's job (spec §4.4),
// not the collector's — mirroring the Python split between the WS collector
// and `strategies/position_detection.py`.
//
// `reconcile_subscriptions` is the scoped mutation interface spec §4.2/§4.6
// step 5 requires: the leaderboard job is the only caller, and it is the
// only thing allowed to add or drop a tracked trader's `webData2` stream.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::events::{EventPayload, EventType, Position, StandardEvent, TraderPositionsSnapshot};
use crate::hyperliquid::{SubscriptionFrame, SubscriptionSpec};
use crate::ws_manager::WsManager;

fn channel_for(address: &str) -> String {
    format!("webData2:{address}")
}

pub struct TraderPositionsCollector {
    source: &'static str,
    ws: Arc<WsManager>,
    tracked: Mutex<HashSet<String>>,
}

impl TraderPositionsCollector {
    pub fn new(ws: Arc<WsManager>) -> Self {
        Self { source: "hyperliquid_webdata2_ws", ws, tracked: Mutex::new(HashSet::new()) }
    }

    /// Subscribe `add`'s `webData2` streams and unsubscribe `remove`'s,
    /// matching the active set kept by the leaderboard job's diff (spec
    /// §4.6 step 5). Returns a receiver per newly-added address so the
    /// caller can wire it into its read loop; idempotent for addresses
    /// already tracked.
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
            }
        }

        new_receivers
    }

    fn leverage_value(position: &Value) -> f64 {
        match position.get("leverage") {
            Some(Value::Object(obj)) => obj.get("value").and_then(Value::as_f64).unwrap_or(0.0),
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    fn parse_f64(v: &Value, key: &str) -> f64 {
        v.get(key).and_then(Value::as_f64).or_else(|| v.get(key).and_then(Value::as_str).and_then(|s| s.parse().ok())).unwrap_or(0.0)
    }

    /// Parse one `webData2` frame for `address` into a positions snapshot.
    /// Returns no event if the frame carries no `clearinghouseState`.
    pub fn handle_message(&self, address: &str, data: Value) -> Vec<StandardEvent> {
        let state = match data.get("data").and_then(|d| d.get("clearinghouseState")) {
            Some(s) => s,
            None => return Vec::new(),
        };

        let account_value = state.get("marginSummary").map(|m| Self::parse_f64(m, "accountValue")).unwrap_or(0.0);
        let margin_used = state.get("marginSummary").map(|m| Self::parse_f64(m, "totalMarginUsed")).unwrap_or(0.0);

        let positions: Vec<Position> = state
            .get("assetPositions")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|entry| entry.get("position"))
                    .map(|p| Position {
                        coin: p.get("coin").and_then(Value::as_str).unwrap_or_default().to_string(),
                        size: Self::parse_f64(p, "szi"),
                        entry_price: Self::parse_f64(p, "entryPx"),
                        position_value: Self::parse_f64(p, "positionValue"),
                        unrealized_pnl: Self::parse_f64(p, "unrealizedPnl"),
                        leverage: Self::leverage_value(p),
                        liquidation_price: Self::parse_f64(p, "liquidationPx"),
                        margin_used: Self::parse_f64(p, "marginUsed"),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let snapshot = TraderPositionsSnapshot::new(address, account_value, margin_used, positions);
        vec![StandardEvent::create(EventType::TraderPositions, self.source, EventPayload::TraderPositions(snapshot), None, None)]
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

    fn frame() -> Value {
        json!({
            "channel": "webData2",
            "data": {
                "clearinghouseState": {
                    "marginSummary": { "accountValue": "1000000", "totalMarginUsed": "50000" },
                    "assetPositions": [
                        { "position": { "coin": "BTC", "szi": "1.5", "entryPx": "75000", "positionValue": "112500", "unrealizedPnl": "5000", "leverage": { "type": "cross", "value": 10 }, "liquidationPx": "60000", "marginUsed": "11250" } }
                    ],
                },
            }
        })
    }

    #[test]
    fn parses_positions_and_account_value() {
        let collector = TraderPositionsCollector::new(test_ws());
        let events = collector.handle_message("0xabc", frame());
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            EventPayload::TraderPositions(snap) => {
                assert_eq!(snap.trader_address, "0xabc");
                assert_eq!(snap.account_value, 1_000_000.0);
                assert_eq!(snap.positions.len(), 1);
                assert_eq!(snap.positions[0].leverage, 10.0);
                assert!((snap.btc_exposure - 1.5).abs() < 1e-9);
            }
            _ => panic!("expected trader positions payload"),
        }
    }

    #[test]
    fn frame_without_clearinghouse_state_is_ignored() {
        let collector = TraderPositionsCollector::new(test_ws());
        assert!(collector.handle_message("0xabc", json!({ "data": {} })).is_empty());
    }

    #[test]
    fn reconcile_subscriptions_is_idempotent_and_tracks_state() {
        let collector = TraderPositionsCollector::new(test_ws());

        let added = collector.reconcile_subscriptions(&["0xabc".to_string(), "0xdef".to_string()], &[]);
        assert_eq!(added.len(), 2);

        // Re-adding an already-tracked address yields no new receiver.
        let added_again = collector.reconcile_subscriptions(&["0xabc".to_string()], &[]);
        assert!(added_again.is_empty());

        collector.reconcile_subscriptions(&[], &["0xabc".to_string()]);
        assert_eq!(collector.tracked.lock().len(), 1);
        assert!(collector.tracked.lock().contains("0xdef"));
    }
}
