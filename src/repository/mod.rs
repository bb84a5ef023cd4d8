// =============================================================================
// Repository — durable persistence abstraction (spec §4.5)
// =============================================================================
//
// Grounded on examples/original_source/market-scraper/src/market_scraper/
// storage/models.py (collection shape) and tests/unit/storage/test_base.py
// (`QueryFilter`'s field/default/limit-bound shape: symbol, event_type,
// start_time, end_time, source, limit default 1000 clamped to 1..=10000,
// offset default 0). Per spec.md's Non-goals no concrete database driver is
// implemented — `memory_store.rs` is the reference implementation used by
// this crate's own tests, archival, and backfill code.
// =============================================================================

pub mod memory_store;

pub use memory_store::MemoryRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// One stored row. `key` is the precomputed composite unique-key string for
/// collections that have one (see `unique_key_fields`), used to support
/// idempotent re-insertion and O(1) upsert lookups.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub data: Value,
    pub key: Option<String>,
}

impl Document {
    fn new(data: Value, key: Option<String>) -> Self {
        Self { id: Uuid::new_v4().to_string(), created_at: Utc::now(), data, key }
    }
}

/// Query predicate for `RangeQuery`/`CountDocuments`, matching the shape
/// `storage/base.py`'s `QueryFilter` exposes: time range, symbol, and
/// trader_address, plus a bounded `limit`/`offset`.
#[derive(Debug, Clone)]
pub struct QueryFilter {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub symbol: Option<String>,
    pub trader_address: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self { start_time: None, end_time: None, symbol: None, trader_address: None, limit: 1000, offset: 0 }
    }
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_trader_address(mut self, address: impl Into<String>) -> Self {
        self.trader_address = Some(address.into());
        self
    }

    pub fn with_time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Clamped to `storage/base.py`'s documented bounds (1..=10000).
    fn effective_limit(&self) -> usize {
        self.limit.clamp(1, 10_000)
    }

    fn matches(&self, doc: &Document) -> bool {
        if let Some(start) = self.start_time {
            if doc.created_at < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if doc.created_at > end {
                return false;
            }
        }
        if let Some(symbol) = &self.symbol {
            if doc.data.get("symbol").and_then(Value::as_str) != Some(symbol.as_str()) {
                return false;
            }
        }
        if let Some(address) = &self.trader_address {
            if doc.data.get("trader_address").and_then(Value::as_str) != Some(address.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Per-collection unique-key fields, enforcing the indexing obligations in
/// spec §4.5: `candles` unique on `(symbol, interval, open_time)`, `trades`
/// unique on `(symbol, trade_id)` (extended here with `source` since this
/// crate persists one exchange but a real deployment may mix sources),
/// `tracked_traders` unique on `address`. Everything else is append-only.
pub fn unique_key_fields(collection: &str) -> Option<&'static [&'static str]> {
    if collection.starts_with("trades_") {
        Some(&["source", "symbol", "trade_id"])
    } else if collection.starts_with("candles_") {
        Some(&["symbol", "interval", "open_time"])
    } else if collection.starts_with("funding_") || collection.starts_with("open_interest_") || collection.starts_with("liquidity_") || collection.starts_with("liquidations_") {
        Some(&["symbol", "time"])
    } else if collection == "tracked_traders" {
        Some(&["address"])
    } else if collection == "trader_current_state" {
        Some(&["trader_address"])
    } else {
        None
    }
}

fn composite_key(data: &Value, fields: &[&str]) -> Option<String> {
    let mut parts = Vec::with_capacity(fields.len());
    for field in fields {
        let v = data.get(field)?;
        parts.push(format!("{field}={v}"));
    }
    Some(parts.join("|"))
}

/// Durable persistence and bounded-latency queries for every persisted
/// entity (spec §4.5). No concrete database driver is implemented per
/// spec.md's Non-goals; `MemoryRepository` is the reference implementation.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert zero or more documents unordered; duplicate-key errors (per
    /// `unique_key_fields`) are absorbed silently — this is the retry-safety
    /// mechanism backfill and collectors rely on. Returns the count of rows
    /// actually inserted (duplicates are not counted, but are not errors).
    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> anyhow::Result<usize>;

    /// Idempotent upsert keyed by an explicit key document (field subset of
    /// `doc`, e.g. `{"address": "0x..."}`).
    async fn upsert(&self, collection: &str, key: &Value, doc: Value) -> anyhow::Result<()>;

    /// Most recent candle for `symbol`/`interval`, used by backfill to
    /// resume incrementally.
    async fn latest_candle(&self, symbol: &str, interval: &str) -> anyhow::Result<Option<Value>>;

    async fn range_query(&self, collection: &str, filter: &QueryFilter) -> anyhow::Result<Vec<Document>>;

    async fn count_documents(&self, collection: &str, filter: &QueryFilter) -> anyhow::Result<usize>;

    async fn ping(&self) -> anyhow::Result<()>;

    /// Rows with `created_at < cutoff`, oldest first, capped at
    /// `batch_size` — the archival sweep's read side (spec §4.7 step 2).
    async fn scan_older_than(&self, collection: &str, cutoff: DateTime<Utc>, batch_size: usize) -> anyhow::Result<Vec<Document>>;

    /// Delete rows by primary key (`Document::id`) set, the archival
    /// sweep's delete side (spec §4.7 step 4, only called after a
    /// successful flush-to-disk).
    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> anyhow::Result<usize>;

    /// All collection names currently holding at least one row, used by the
    /// archival sweep to iterate without a hardcoded collection list.
    async fn collection_names(&self) -> Vec<String>;
}
