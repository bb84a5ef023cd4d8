// =============================================================================
// Hyperliquid WebSocket wire shapes
// =============================================================================
//
// Grounded on examples/original_source/market-scraper/.../connectors/
// hyperliquid/collectors/manager.py (`_subscribe` / `_handle_message`):
// subscribe/unsubscribe frames addressed by a `{type, coin?, interval?,
// user?}` subscription spec, and inbound frames tagged with `channel` +
// `data` (spec §6).
// =============================================================================

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl SubscriptionSpec {
    pub fn candle(coin: impl Into<String>, interval: impl Into<String>) -> Self {
        Self { kind: "candle".into(), coin: Some(coin.into()), interval: Some(interval.into()), user: None }
    }

    pub fn trades(coin: impl Into<String>) -> Self {
        Self { kind: "trades".into(), coin: Some(coin.into()), interval: None, user: None }
    }

    pub fn l2_book(coin: impl Into<String>) -> Self {
        Self { kind: "l2Book".into(), coin: Some(coin.into()), interval: None, user: None }
    }

    pub fn all_mids() -> Self {
        Self { kind: "allMids".into(), coin: None, interval: None, user: None }
    }

    pub fn user_events(user: impl Into<String>) -> Self {
        Self { kind: "userEvents".into(), coin: None, interval: None, user: Some(user.into()) }
    }

    /// Positions + open orders snapshot stream for one tracked trader
    /// (spec §4.2's `reconcile_subscriptions`).
    pub fn web_data2(user: impl Into<String>) -> Self {
        Self { kind: "webData2".into(), coin: None, interval: None, user: Some(user.into()) }
    }
}

/// `{"method": "subscribe"|"unsubscribe", "subscription": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionFrame {
    pub method: String,
    pub subscription: SubscriptionSpec,
}

impl SubscriptionFrame {
    pub fn subscribe(spec: SubscriptionSpec) -> Self {
        Self { method: "subscribe".into(), subscription: spec }
    }

    pub fn unsubscribe(spec: SubscriptionSpec) -> Self {
        Self { method: "unsubscribe".into(), subscription: spec }
    }
}

/// Inbound server frame: `{"channel": "...", "data": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WsEnvelope {
    pub channel: String,
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_serializes_candle_spec() {
        let frame = SubscriptionFrame::subscribe(SubscriptionSpec::candle("BTC", "1m"));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["method"], "subscribe");
        assert_eq!(json["subscription"]["type"], "candle");
        assert_eq!(json["subscription"]["coin"], "BTC");
        assert_eq!(json["subscription"]["interval"], "1m");
    }

    #[test]
    fn web_data2_spec_carries_user_and_no_coin() {
        let spec = SubscriptionSpec::web_data2("0xabc");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "webData2");
        assert_eq!(json["user"], "0xabc");
        assert!(json.get("coin").is_none());
    }

    #[test]
    fn envelope_parses_channel_and_data() {
        let raw = r#"{"channel": "trades", "data": [{"coin": "BTC"}]}"#;
        let env: WsEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.channel, "trades");
        assert!(env.data.is_array());
    }
}
