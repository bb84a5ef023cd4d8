// =============================================================================
// MarketDataProcessor — validation pass over trade/ticker/ohlcv events
// =============================================================================
//
// Grounded on examples/original_source/market-scraper/.../processors/
// market_processor.py (`MarketDataProcessor._validate_payload`): price must
// be `> 0` and `< 1e12`, volume `>= 0`, and OHLC high/low must not invert.
// The original both validates and republishes a normalized copy of the
// event; this processor only validates and logs, since every concrete
// collector in this crate already emits fully-typed, already-normalized
// payloads (no raw-symbol normalization step is needed downstream) — wiring
// it as a republishing passthrough here would just double-publish every
// trade/ticker/ohlcv event. It never returns a derived event, so it's safe
// to subscribe at any priority without risk of a republish loop.
// =============================================================================

use async_trait::async_trait;
use tracing::warn;

use crate::events::{EventPayload, EventType, StandardEvent};

use super::Processor;

fn validate(event: &StandardEvent) -> Result<(), String> {
    match &event.payload {
        EventPayload::Trade(t) => {
            if t.price <= 0.0 || t.price > 1e12 {
                return Err(format!("trade price out of range: {}", t.price));
            }
            if t.size < 0.0 {
                return Err(format!("trade size negative: {}", t.size));
            }
            Ok(())
        }
        EventPayload::Candle(c) => {
            if c.h < c.l {
                return Err(format!("candle high < low: h={} l={}", c.h, c.l));
            }
            if c.v < 0.0 {
                return Err(format!("candle volume negative: {}", c.v));
            }
            Ok(())
        }
        EventPayload::OrderBook(b) => {
            if b.mid <= 0.0 || b.mid > 1e12 {
                return Err(format!("order book mid out of range: {}", b.mid));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

pub struct MarketDataProcessor;

#[async_trait]
impl Processor for MarketDataProcessor {
    fn name(&self) -> &'static str {
        "market_data"
    }

    async fn process(&self, event: &StandardEvent) -> anyhow::Result<Option<StandardEvent>> {
        if !matches!(event.event_type, EventType::Trade | EventType::Ticker | EventType::Ohlcv | EventType::OrderBook) {
            return Ok(None);
        }

        if let Err(reason) = validate(event) {
            warn!(event_id = %event.event_id, event_type = %event.event_type, reason, "dropping invalid market data event");
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MarketTrade, TradeSide};

    #[tokio::test]
    async fn never_produces_a_derived_event() {
        let proc = MarketDataProcessor;
        let trade = MarketTrade::new("BTC", TradeSide::Buy, 50_000.0, 1.0, 1);
        let event = StandardEvent::create(EventType::Trade, "test", EventPayload::Trade(trade), None, None);
        assert!(proc.process(&event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_market_event_types_are_ignored() {
        let proc = MarketDataProcessor;
        let event = StandardEvent::create(EventType::Heartbeat, "test", EventPayload::Raw(serde_json::json!({})), None, None);
        assert!(proc.process(&event).await.unwrap().is_none());
    }
}
