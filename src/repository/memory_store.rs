// =============================================================================
// MemoryRepository — in-memory reference implementation of `Repository`
// =============================================================================
//
// Grounded on the `storage/{base,models}.py` contract shape (see mod.rs
// header); no concrete database driver is implemented per spec.md's
// Non-goals. Enforces the unique-key and single-valued-current-state
// invariants described in spec §3/§4.5 so they're testable without a real
// store. Uses `parking_lot::RwLock` (the teacher's lock of choice for
// shared mutable maps) rather than `tokio::sync::RwLock` since every
// operation here is synchronous in-memory work with no `.await` inside the
// critical section.
// =============================================================================

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use super::{composite_key, unique_key_fields, Document, QueryFilter, Repository};

struct CollectionStore {
    docs: Vec<Document>,
    by_key: HashMap<String, usize>,
}

impl CollectionStore {
    fn new() -> Self {
        Self { docs: Vec::new(), by_key: HashMap::new() }
    }

    fn rebuild_index(&mut self) {
        self.by_key.clear();
        for (idx, doc) in self.docs.iter().enumerate() {
            if let Some(key) = &doc.key {
                self.by_key.insert(key.clone(), idx);
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryRepository {
    collections: RwLock<HashMap<String, CollectionStore>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> anyhow::Result<usize> {
        let schema = unique_key_fields(collection);
        let mut collections = self.collections.write();
        let store = collections.entry(collection.to_string()).or_insert_with(CollectionStore::new);

        let mut inserted = 0;
        for data in docs {
            let key = schema.and_then(|fields| composite_key(&data, fields));
            if let Some(key) = &key {
                if store.by_key.contains_key(key) {
                    continue; // duplicate-key error, absorbed silently (spec §4.5)
                }
            }
            let idx = store.docs.len();
            if let Some(key) = &key {
                store.by_key.insert(key.clone(), idx);
            }
            store.docs.push(Document::new(data, key));
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn upsert(&self, collection: &str, key: &Value, doc: Value) -> anyhow::Result<()> {
        let fields: Vec<&str> = key.as_object().map(|o| o.keys().map(String::as_str).collect()).unwrap_or_default();
        let key_str = composite_key(key, &fields).unwrap_or_else(|| key.to_string());

        let mut collections = self.collections.write();
        let store = collections.entry(collection.to_string()).or_insert_with(CollectionStore::new);

        if let Some(&idx) = store.by_key.get(&key_str) {
            store.docs[idx].data = doc;
            store.docs[idx].created_at = Utc::now();
        } else {
            let idx = store.docs.len();
            store.by_key.insert(key_str.clone(), idx);
            store.docs.push(Document::new(doc, Some(key_str)));
        }
        Ok(())
    }

    async fn latest_candle(&self, symbol: &str, interval: &str) -> anyhow::Result<Option<Value>> {
        let collection = format!("candles_{symbol}_{interval}");
        let collections = self.collections.read();
        let Some(store) = collections.get(&collection) else { return Ok(None) };

        let latest = store.docs.iter().max_by_key(|d| d.data.get("open_time").and_then(Value::as_i64).unwrap_or(i64::MIN));
        Ok(latest.map(|d| d.data.clone()))
    }

    async fn range_query(&self, collection: &str, filter: &QueryFilter) -> anyhow::Result<Vec<Document>> {
        let collections = self.collections.read();
        let Some(store) = collections.get(collection) else { return Ok(Vec::new()) };

        let mut matched: Vec<Document> = store.docs.iter().filter(|d| filter.matches(d)).cloned().collect();
        matched.sort_by_key(|d| d.created_at);
        Ok(matched.into_iter().skip(filter.offset).take(filter.effective_limit()).collect())
    }

    async fn count_documents(&self, collection: &str, filter: &QueryFilter) -> anyhow::Result<usize> {
        let collections = self.collections.read();
        let Some(store) = collections.get(collection) else { return Ok(0) };
        Ok(store.docs.iter().filter(|d| filter.matches(d)).count())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn scan_older_than(&self, collection: &str, cutoff: DateTime<Utc>, batch_size: usize) -> anyhow::Result<Vec<Document>> {
        let collections = self.collections.read();
        let Some(store) = collections.get(collection) else { return Ok(Vec::new()) };

        let mut aged: Vec<Document> = store.docs.iter().filter(|d| d.created_at < cutoff).cloned().collect();
        aged.sort_by_key(|d| d.created_at);
        aged.truncate(batch_size);
        Ok(aged)
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> anyhow::Result<usize> {
        let id_set: HashSet<&String> = ids.iter().collect();
        let mut collections = self.collections.write();
        let Some(store) = collections.get_mut(collection) else { return Ok(0) };

        let before = store.docs.len();
        store.docs.retain(|d| !id_set.contains(&d.id));
        store.rebuild_index();
        Ok(before - store.docs.len())
    }

    async fn collection_names(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn duplicate_trade_key_is_absorbed_not_errored() {
        let repo = MemoryRepository::new();
        let docs = vec![
            json!({ "source": "hyperliquid", "symbol": "BTC", "trade_id": 1, "price": 50_000.0 }),
            json!({ "source": "hyperliquid", "symbol": "BTC", "trade_id": 1, "price": 50_001.0 }),
            json!({ "source": "hyperliquid", "symbol": "BTC", "trade_id": 2, "price": 50_002.0 }),
        ];
        let inserted = repo.insert_many("trades_BTC", docs).await.unwrap();
        assert_eq!(inserted, 2);

        let count = repo.count_documents("trades_BTC", &QueryFilter::new().with_limit(10)).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn candle_unique_key_prevents_duplicate_open_time() {
        let repo = MemoryRepository::new();
        let docs = vec![
            json!({ "symbol": "BTC", "interval": "1m", "open_time": 1000, "c": 1.0 }),
            json!({ "symbol": "BTC", "interval": "1m", "open_time": 1000, "c": 2.0 }),
            json!({ "symbol": "BTC", "interval": "1m", "open_time": 2000, "c": 3.0 }),
        ];
        let inserted = repo.insert_many("candles_BTC_1m", docs).await.unwrap();
        assert_eq!(inserted, 2);
    }

    #[tokio::test]
    async fn latest_candle_returns_max_open_time() {
        let repo = MemoryRepository::new();
        repo.insert_many(
            "candles_BTC_1m",
            vec![json!({ "symbol": "BTC", "interval": "1m", "open_time": 1000 }), json!({ "symbol": "BTC", "interval": "1m", "open_time": 5000 })],
        )
        .await
        .unwrap();

        let latest = repo.latest_candle("BTC", "1m").await.unwrap().unwrap();
        assert_eq!(latest["open_time"], 5000);
    }

    #[tokio::test]
    async fn latest_candle_on_empty_collection_is_none() {
        let repo = MemoryRepository::new();
        assert!(repo.latest_candle("ETH", "1h").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_row_for_same_key() {
        let repo = MemoryRepository::new();
        let key = json!({ "address": "0xabc" });
        repo.upsert("tracked_traders", &key, json!({ "address": "0xabc", "active": true, "score": 10.0 })).await.unwrap();
        repo.upsert("tracked_traders", &key, json!({ "address": "0xabc", "active": false, "score": 20.0 })).await.unwrap();

        let rows = repo.range_query("tracked_traders", &QueryFilter::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data["score"], 20.0);
        assert_eq!(rows[0].data["active"], false);
    }

    #[tokio::test]
    async fn range_query_filters_by_symbol_and_time() {
        let repo = MemoryRepository::new();
        repo.insert_many("events_misc", vec![json!({ "symbol": "BTC" }), json!({ "symbol": "ETH" })]).await.unwrap();

        let rows = repo.range_query("events_misc", &QueryFilter::new().with_symbol("BTC")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data["symbol"], "BTC");
    }

    #[tokio::test]
    async fn range_query_limit_is_clamped_to_10000() {
        let repo = MemoryRepository::new();
        let rows = repo.range_query("empty", &QueryFilter::new().with_limit(50_000)).await.unwrap();
        assert_eq!(rows.len(), 0); // clamp doesn't panic on an empty collection
    }

    #[tokio::test]
    async fn scan_older_than_then_delete_round_trip() {
        let repo = MemoryRepository::new();
        repo.insert_many("signals", vec![json!({ "symbol": "BTC" })]).await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let aged = repo.scan_older_than("signals", cutoff, 10_000).await.unwrap();
        assert_eq!(aged.len(), 1);

        let ids: Vec<String> = aged.iter().map(|d| d.id.clone()).collect();
        let deleted = repo.delete_by_ids("signals", &ids).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(repo.count_documents("signals", &QueryFilter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ping_always_succeeds() {
        let repo = MemoryRepository::new();
        assert!(repo.ping().await.is_ok());
    }

    #[tokio::test]
    async fn collection_names_reflects_writes() {
        let repo = MemoryRepository::new();
        repo.insert_many("trades_BTC", vec![json!({ "source": "hyperliquid", "symbol": "BTC", "trade_id": 1 })]).await.unwrap();
        let names = repo.collection_names().await;
        assert_eq!(names, vec!["trades_BTC".to_string()]);
    }
}
