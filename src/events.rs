// =============================================================================
// StandardEvent — the sole inter-component message
// =============================================================================
//
// Every collector, processor, and HTTP fetcher in this crate speaks only in
// StandardEvents. Payloads arrive from the exchange as untyped JSON; rather
// than carry that dynamism through the whole pipeline we parse eagerly into
// one variant per event_type and keep a `Raw` escape hatch for anything the
// exchange sends that we don't have a typed payload for yet.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Trade,
    Ticker,
    OrderBook,
    Ohlcv,
    TraderPositions,
    TraderOrder,
    PositionChange,
    ScoredTraders,
    Signal,
    WhaleAlert,
    OnchainMetric,
    Leaderboard,
    ConnectorStatus,
    Heartbeat,
    Error,
    Custom,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::Trade => "trade",
            EventType::Ticker => "ticker",
            EventType::OrderBook => "order_book",
            EventType::Ohlcv => "ohlcv",
            EventType::TraderPositions => "trader_positions",
            EventType::TraderOrder => "trader_order",
            EventType::PositionChange => "position_change",
            EventType::ScoredTraders => "scored_traders",
            EventType::Signal => "signal",
            EventType::WhaleAlert => "whale_alert",
            EventType::OnchainMetric => "onchain_metric",
            EventType::Leaderboard => "leaderboard",
            EventType::ConnectorStatus => "connector_status",
            EventType::Heartbeat => "heartbeat",
            EventType::Error => "error",
            EventType::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

/// Default event priority: 1..10, lower is higher priority.
pub const DEFAULT_PRIORITY: u8 = 5;

// ---------------------------------------------------------------------------
// Payload variants (semantic types, not wire types)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTrade {
    pub symbol: String,
    pub side: TradeSide,
    pub price: f64,
    pub size: f64,
    pub usd_value: f64,
    /// Unique per (source, symbol).
    pub trade_id: u64,
}

impl MarketTrade {
    pub fn new(symbol: impl Into<String>, side: TradeSide, price: f64, size: f64, trade_id: u64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            price,
            size,
            usd_value: price * size,
            trade_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
    pub order_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub mid: f64,
    pub spread: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub imbalance: f64,
}

impl OrderBookSnapshot {
    /// Build a snapshot from top-N levels, computing all derived fields.
    /// `bids`/`asks` must already be sorted best-first and truncated to N.
    pub fn from_levels(symbol: impl Into<String>, bids: Vec<BookLevel>, asks: Vec<BookLevel>) -> Self {
        let best_bid = bids.first().map(|l| l.price).unwrap_or(0.0);
        let best_ask = asks.first().map(|l| l.price).unwrap_or(0.0);
        let mid = (best_bid + best_ask) / 2.0;
        let spread = best_ask - best_bid;
        let bid_depth: f64 = bids.iter().map(|l| l.size).sum();
        let ask_depth: f64 = asks.iter().map(|l| l.size).sum();
        let total = bid_depth + ask_depth;
        let imbalance = if total > 0.0 {
            (bid_depth - ask_depth) / total
        } else {
            0.0
        };

        Self {
            symbol: symbol.into(),
            bids,
            asks,
            mid,
            spread,
            bid_depth,
            ask_depth,
            imbalance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl CandleInterval {
    pub const ALL: [CandleInterval; 6] = [
        CandleInterval::M1,
        CandleInterval::M5,
        CandleInterval::M15,
        CandleInterval::H1,
        CandleInterval::H4,
        CandleInterval::D1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CandleInterval::M1 => "1m",
            CandleInterval::M5 => "5m",
            CandleInterval::M15 => "15m",
            CandleInterval::H1 => "1h",
            CandleInterval::H4 => "4h",
            CandleInterval::D1 => "1d",
        }
    }

    pub fn seconds(self) -> i64 {
        match self {
            CandleInterval::M1 => 60,
            CandleInterval::M5 => 300,
            CandleInterval::M15 => 900,
            CandleInterval::H1 => 3600,
            CandleInterval::H4 => 14_400,
            CandleInterval::D1 => 86_400,
        }
    }
}

impl std::fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub interval: CandleInterval,
    pub open_time: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
    pub trade_count: u64,
}

impl Candle {
    /// Validate the invariants from spec §3/§8: `l <= min(o,c) <= max(o,c) <= h`, `v >= 0`.
    pub fn is_valid(&self) -> bool {
        let lo = self.o.min(self.c);
        let hi = self.o.max(self.c);
        self.l <= lo && hi <= self.h && self.v >= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub coin: String,
    /// Signed: positive = long, negative = short.
    pub size: f64,
    pub entry_price: f64,
    pub position_value: f64,
    pub unrealized_pnl: f64,
    pub leverage: f64,
    pub liquidation_price: f64,
    pub margin_used: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderPositionsSnapshot {
    pub trader_address: String,
    pub account_value: f64,
    pub total_notional: f64,
    pub margin_used: f64,
    pub positions: Vec<Position>,
    pub btc_exposure: f64,
}

impl TraderPositionsSnapshot {
    pub fn new(
        trader_address: impl Into<String>,
        account_value: f64,
        margin_used: f64,
        positions: Vec<Position>,
    ) -> Self {
        let total_notional: f64 = positions.iter().map(|p| p.position_value.abs()).sum();
        let btc_exposure: f64 = positions
            .iter()
            .filter(|p| p.coin.eq_ignore_ascii_case("BTC"))
            .map(|p| p.size)
            .sum();

        Self {
            trader_address: trader_address.into(),
            account_value,
            total_notional,
            margin_used,
            positions,
            btc_exposure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    pub fn from_size(size: f64) -> Self {
        if size > 0.0 {
            Direction::Long
        } else if size < 0.0 {
            Direction::Short
        } else {
            Direction::Flat
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionAction {
    Open,
    Close,
    Increase,
    Decrease,
    Modify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionChange {
    pub trader_address: String,
    pub coin: String,
    pub prev_size: f64,
    pub curr_size: f64,
    pub delta: f64,
    pub direction: Direction,
    pub action: PositionAction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowPerformance {
    pub pnl: f64,
    pub roi: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowPerformances {
    pub day: WindowPerformance,
    pub week: WindowPerformance,
    pub month: WindowPerformance,
    pub all_time: WindowPerformance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredTrader {
    pub trader_address: String,
    pub score: f64,
    pub tags: Vec<String>,
    pub account_value: f64,
    pub window_performances: WindowPerformances,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Buy,
    Sell,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedSignal {
    pub symbol: String,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub long_bias: f64,
    pub short_bias: f64,
    pub net_bias: f64,
    pub traders_long: u32,
    pub traders_short: u32,
    pub traders_flat: u32,
    pub net_exposure: f64,
    /// Last known price at the time of signal computation, if fresh
    /// (see DESIGN.md Open Question 4 — stale prices are omitted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_at_signal: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WhaleTier {
    Mid,
    Large,
    Mega,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleChange {
    pub address: String,
    pub tier: WhaleTier,
    pub coin: String,
    pub prev_size: f64,
    pub curr_size: f64,
    pub change_pct: f64,
    pub account_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleAlert {
    pub priority: AlertPriority,
    pub title: String,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub changes: Vec<WhaleChange>,
    pub signal_impact: Option<f64>,
}

impl WhaleAlert {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Typed event payload, one variant per `EventType`. `Raw` is the escape
/// hatch for extension event types the exchange sends that this crate
/// doesn't parse into a semantic struct (e.g. aux on-chain providers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Trade(MarketTrade),
    OrderBook(OrderBookSnapshot),
    Candle(Candle),
    TraderPositions(TraderPositionsSnapshot),
    PositionChange(PositionChange),
    ScoredTraders(Vec<ScoredTrader>),
    Signal(AggregatedSignal),
    WhaleAlert(WhaleAlert),
    Raw(serde_json::Value),
}

// ---------------------------------------------------------------------------
// StandardEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub payload: EventPayload,
    pub correlation_id: String,
    pub parent_event_id: Option<String>,
    pub priority: u8,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<f64>,
}

impl StandardEvent {
    /// Factory matching `StandardEvent.create` in the original Python
    /// implementation: a fresh UUID for `correlation_id` unless the caller
    /// supplies one, `priority` defaults to 5.
    pub fn create(
        event_type: EventType,
        source: impl Into<String>,
        payload: EventPayload,
        correlation_id: Option<String>,
        priority: Option<u8>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            source: source.into(),
            payload,
            correlation_id: correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            parent_event_id: None,
            priority: priority.unwrap_or(DEFAULT_PRIORITY),
            processed_at: None,
            processing_time_ms: None,
        }
    }

    /// Derive a new event from `self`, carrying `correlation_id` forward and
    /// pointing `parent_event_id` at `self.event_id` — the invariant that
    /// every non-source event has a correlation_id inherited from its
    /// origin.
    pub fn derive(&self, event_type: EventType, source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            source: source.into(),
            payload,
            correlation_id: self.correlation_id.clone(),
            parent_event_id: Some(self.event_id.clone()),
            priority: DEFAULT_PRIORITY,
            processed_at: None,
            processing_time_ms: None,
        }
    }

    /// Mark this event processed and compute `processing_time_ms`. Call
    /// right before re-publishing a derived event so `timestamp <=
    /// processed_at` holds (spec §3 invariant).
    pub fn mark_processed(&mut self) {
        let now = Utc::now();
        self.processed_at = Some(now);
        self.processing_time_ms = Some((now - self.timestamp).num_microseconds().unwrap_or(0) as f64 / 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_sets_fresh_correlation_id_when_absent() {
        let ev = StandardEvent::create(
            EventType::Heartbeat,
            "ws_manager",
            EventPayload::Raw(serde_json::json!({})),
            None,
            None,
        );
        assert!(!ev.correlation_id.is_empty());
        assert_eq!(ev.priority, DEFAULT_PRIORITY);
        assert!(ev.parent_event_id.is_none());
    }

    #[test]
    fn derive_carries_correlation_id_and_sets_parent() {
        let parent = StandardEvent::create(
            EventType::Trade,
            "trades_collector",
            EventPayload::Raw(serde_json::json!({})),
            Some("corr-1".into()),
            None,
        );
        let child = parent.derive(
            EventType::PositionChange,
            "position_detection",
            EventPayload::Raw(serde_json::json!({})),
        );
        assert_eq!(child.correlation_id, "corr-1");
        assert_eq!(child.parent_event_id.as_deref(), Some(parent.event_id.as_str()));
    }

    #[test]
    fn mark_processed_sets_timestamp_order() {
        let mut ev = StandardEvent::create(
            EventType::Ohlcv,
            "candles_collector",
            EventPayload::Raw(serde_json::json!({})),
            None,
            None,
        );
        ev.mark_processed();
        assert!(ev.processed_at.unwrap() >= ev.timestamp);
        assert!(ev.processing_time_ms.unwrap() >= 0.0);
    }

    #[test]
    fn candle_validity() {
        let good = Candle {
            symbol: "BTC".into(),
            interval: CandleInterval::M1,
            open_time: 0,
            o: 100.0,
            h: 105.0,
            l: 95.0,
            c: 102.0,
            v: 10.0,
            trade_count: 5,
        };
        assert!(good.is_valid());

        let bad = Candle { h: 90.0, ..good };
        assert!(!bad.is_valid());
    }

    #[test]
    fn orderbook_derived_fields() {
        let bids = vec![BookLevel { price: 100.0, size: 2.0, order_count: 1 }];
        let asks = vec![BookLevel { price: 101.0, size: 1.0, order_count: 1 }];
        let snap = OrderBookSnapshot::from_levels("BTC", bids, asks);
        assert!((snap.mid - 100.5).abs() < 1e-9);
        assert!((snap.spread - 1.0).abs() < 1e-9);
        assert!(snap.imbalance > 0.0 && snap.imbalance <= 1.0);
    }

    #[test]
    fn direction_from_size() {
        assert_eq!(Direction::from_size(1.5), Direction::Long);
        assert_eq!(Direction::from_size(-1.5), Direction::Short);
        assert_eq!(Direction::from_size(0.0), Direction::Flat);
    }
}
