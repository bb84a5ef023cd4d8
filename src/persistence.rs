// =============================================================================
// PersistenceHandler — event bus -> Repository writer
// =============================================================================
//
// Grounded on examples/original_source/market-scraper/src/market_scraper/
// event_bus/base.py's wildcard-subscription contract (`subscribe(event_type
// = "*", handler)`): the original collectors only ever publish to the event
// bus (connectors/hyperliquid/collectors/base.py never imports a storage
// module), so durable persistence is itself a bus subscriber rather than
// something collectors call directly. This mirrors that shape as one
// `Handler` registered wildcard on the bus, mapping each event type to the
// collection names in spec §4.5.
//
// Event types with no spec §4.5 collection counterpart (whale_alert,
// heartbeat, connector_status, error) are deliberately not persisted —
// they're control-plane signals, not entities §4.5 lists a table for.
// `position_change` is the one derived event type that does have a table
// (`trader_signals`).
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::event_bus::Handler;
use crate::events::{EventPayload, EventType, StandardEvent};
use crate::repository::Repository;

pub struct PersistenceHandler {
    repository: Arc<dyn Repository>,
}

impl PersistenceHandler {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    async fn insert_one(&self, collection: &str, doc: serde_json::Value) {
        if let Err(e) = self.repository.insert_many(collection, vec![doc]).await {
            warn!(collection, error = %e, "failed to persist event");
        }
    }
}

#[async_trait]
impl Handler for PersistenceHandler {
    async fn handle(&self, event: &StandardEvent) -> anyhow::Result<()> {
        match &event.payload {
            EventPayload::Trade(trade) => {
                let collection = format!("trades_{}", trade.symbol);
                let doc = json!({
                    "source": event.source,
                    "symbol": trade.symbol,
                    "trade_id": trade.trade_id,
                    "side": trade.side,
                    "price": trade.price,
                    "size": trade.size,
                    "usd_value": trade.usd_value,
                    "timestamp": event.timestamp,
                });
                self.insert_one(&collection, doc).await;
            }
            EventPayload::OrderBook(book) => {
                let collection = format!("orderbook_{}", book.symbol);
                self.insert_one(&collection, serde_json::to_value(book).unwrap_or_default()).await;
            }
            EventPayload::Candle(candle) => {
                let collection = format!("candles_{}_{}", candle.symbol, candle.interval.as_str());
                self.insert_one(&collection, serde_json::to_value(candle).unwrap_or_default()).await;
            }
            EventPayload::TraderPositions(snapshot) => {
                if let Err(e) = self.repository.insert_many("trader_positions", vec![serde_json::to_value(snapshot).unwrap_or_default()]).await {
                    warn!(error = %e, "failed to persist trader_positions snapshot");
                }
                let key = json!({ "trader_address": snapshot.trader_address });
                if let Err(e) = self.repository.upsert("trader_current_state", &key, serde_json::to_value(snapshot).unwrap_or_default()).await {
                    warn!(error = %e, "failed to upsert trader_current_state");
                }
            }
            EventPayload::ScoredTraders(traders) => {
                let docs: Vec<serde_json::Value> = traders.iter().map(|t| serde_json::to_value(t).unwrap_or_default()).collect();
                if let Err(e) = self.repository.insert_many("trader_scores", docs).await {
                    warn!(error = %e, "failed to persist trader_scores");
                }
            }
            EventPayload::Signal(signal) => {
                self.insert_one("signals", serde_json::to_value(signal).unwrap_or_default()).await;
            }
            EventPayload::Raw(raw) => match event.event_type {
                EventType::Ticker => {
                    let Some(symbol) = raw.get("symbol").and_then(|s| s.as_str()) else { return Ok(()) };
                    self.insert_one(&format!("ticker_{symbol}"), raw.clone()).await;
                    self.insert_one("mark_prices", raw.clone()).await;
                }
                EventType::TraderOrder => {
                    self.insert_one("trader_orders", raw.clone()).await;
                }
                EventType::Leaderboard => {
                    let rows = raw.get("rows").or_else(|| raw.get("traders")).and_then(|v| v.as_array()).cloned().unwrap_or_default();
                    if rows.is_empty() {
                        return Ok(());
                    }
                    if let Err(e) = self.repository.insert_many("leaderboard_history", rows).await {
                        warn!(error = %e, "failed to persist leaderboard_history");
                    }
                }
                EventType::OnchainMetric => {
                    self.insert_one("onchain_metrics", raw.clone()).await;
                }
                // Funding/open-interest/liquidity/liquidations jobs tag
                // their otherwise-untyped payload with a "metric" field and
                // a "symbol" field (spec §4.5's `funding_{symbol}` etc.);
                // there is no dedicated EventType for each since spec.md
                // treats them as "extension strings" on top of the closed
                // EventType enum.
                EventType::Custom => {
                    let (Some(metric), Some(symbol)) =
                        (raw.get("metric").and_then(|v| v.as_str()), raw.get("symbol").and_then(|v| v.as_str()))
                    else {
                        return Ok(());
                    };
                    self.insert_one(&format!("{metric}_{symbol}"), raw.clone()).await;
                }
                _ => {}
            },
            // `trader_signals` (spec §4.5) records the directional signal
            // derived from each position change; `conf` is left out here —
            // computing it would require threading `scored_traders` state
            // into the position-detection processor, which spec §4.4 does
            // not call for.
            EventPayload::PositionChange(change) => {
                let doc = json!({
                    "trader_address": change.trader_address,
                    "symbol": change.coin,
                    "action": change.action,
                    "dir": change.direction,
                    "sz": change.curr_size,
                    "t": event.timestamp,
                });
                self.insert_one("trader_signals", doc).await;
            }
            EventPayload::WhaleAlert(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MarketTrade, TradeSide};
    use crate::repository::{MemoryRepository, QueryFilter};

    #[tokio::test]
    async fn trade_event_persists_into_symbol_scoped_collection() {
        let repo = Arc::new(MemoryRepository::new());
        let handler = PersistenceHandler::new(repo.clone());

        let trade = MarketTrade::new("BTC", TradeSide::Buy, 50_000.0, 1.0, 42);
        let event = StandardEvent::create(EventType::Trade, "hyperliquid_trades_ws", EventPayload::Trade(trade), None, None);
        handler.handle(&event).await.unwrap();

        let count = repo.count_documents("trades_BTC", &QueryFilter::new()).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn trader_positions_also_upserts_current_state() {
        let repo = Arc::new(MemoryRepository::new());
        let handler = PersistenceHandler::new(repo.clone());

        let snapshot = crate::events::TraderPositionsSnapshot::new("0xabc", 1_000_000.0, 0.0, vec![]);
        let event = StandardEvent::create(EventType::TraderPositions, "test", EventPayload::TraderPositions(snapshot), None, None);
        handler.handle(&event).await.unwrap();

        assert_eq!(repo.count_documents("trader_positions", &QueryFilter::new()).await.unwrap(), 1);
        assert_eq!(repo.count_documents("trader_current_state", &QueryFilter::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn whale_alert_is_not_persisted() {
        let repo = Arc::new(MemoryRepository::new());
        let handler = PersistenceHandler::new(repo.clone());

        let now = chrono::Utc::now();
        let alert = crate::events::WhaleAlert {
            priority: crate::events::AlertPriority::High,
            title: "Large BTC open".into(),
            description: "0xabc opened 1.5 BTC".into(),
            detected_at: now,
            expires_at: now + chrono::Duration::hours(1),
            changes: vec![],
            signal_impact: None,
        };
        let event = StandardEvent::create(EventType::WhaleAlert, "test", EventPayload::WhaleAlert(alert), None, None);
        handler.handle(&event).await.unwrap();

        assert!(repo.collection_names().await.is_empty());
    }

    #[tokio::test]
    async fn position_change_persists_into_trader_signals() {
        let repo = Arc::new(MemoryRepository::new());
        let handler = PersistenceHandler::new(repo.clone());

        let change = crate::events::PositionChange {
            trader_address: "0xabc".into(),
            coin: "BTC".into(),
            prev_size: 0.0,
            curr_size: 1.0,
            delta: 1.0,
            direction: crate::events::Direction::Long,
            action: crate::events::PositionAction::Open,
        };
        let event = StandardEvent::create(EventType::PositionChange, "test", EventPayload::PositionChange(change), None, None);
        handler.handle(&event).await.unwrap();

        assert_eq!(repo.count_documents("trader_signals", &QueryFilter::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ticker_persists_into_both_symbol_ticker_and_mark_prices() {
        let repo = Arc::new(MemoryRepository::new());
        let handler = PersistenceHandler::new(repo.clone());

        let payload = json!({ "symbol": "BTC", "price": 50_000.0 });
        let event = StandardEvent::create(EventType::Ticker, "test", EventPayload::Raw(payload), None, None);
        handler.handle(&event).await.unwrap();

        assert_eq!(repo.count_documents("ticker_BTC", &QueryFilter::new()).await.unwrap(), 1);
        assert_eq!(repo.count_documents("mark_prices", &QueryFilter::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn custom_metric_event_persists_into_metric_symbol_collection() {
        let repo = Arc::new(MemoryRepository::new());
        let handler = PersistenceHandler::new(repo.clone());

        let payload = json!({ "metric": "funding", "symbol": "BTC", "funding_rate": 0.0001 });
        let event = StandardEvent::create(EventType::Custom, "test", EventPayload::Raw(payload), None, None);
        handler.handle(&event).await.unwrap();

        assert_eq!(repo.count_documents("funding_BTC", &QueryFilter::new()).await.unwrap(), 1);
    }
}
