// =============================================================================
// Archiver — age-scan -> batch -> compress -> write -> delete (spec §4.7)
// =============================================================================
//
// Grounded on examples/original_source/market-scraper/.../archival/
// archiver.py (`archive_collection`/`archive_all_collections`: per-collection
// try/except isolation, metadata envelope, empty-batch short circuit) and
// examples/original_source/hyperliquid/hyperliquid-system/src/jobs/archive.py
// + src/utils/archive.py (`archive_orderbook_with_compression`'s nested
// 7-day-early grouped-by-day pass, `get_archive_path`'s
// `{base}/{collection}/{YYYY-MM}.ext` naming scheme keyed by the archive
// run's own month rather than the data's age, and `cleanup_old_archives`'s
// filename-encoded-date-with-mtime-fallback removal policy).
//
// Each flushed batch is framed with a big-endian u32 length prefix before
// its zstd block, mirroring `utils/archive.py`'s length-prefixed
// orderbook-compression file format — generalized here to every collection
// instead of only the orderbook nested path, so one reader routine covers
// both.
// =============================================================================

mod compressor;

pub use compressor::Compressor;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::RetentionConfig;
use crate::repository::{Document, Repository};

/// Outcome of one collection's archival sweep.
#[derive(Debug, Clone)]
pub struct ArchiveResult {
    pub collection: String,
    pub documents: usize,
    pub size_bytes: u64,
    pub error: Option<String>,
}

/// Collections holding a single current-state row per key rather than
/// append-only history; archiving by age would delete the live row instead
/// of a historical one, so the sweep skips them entirely.
fn is_current_state(collection: &str) -> bool {
    collection == "tracked_traders" || collection == "trader_current_state"
}

/// Maps a collection name to its configured retention window, mirroring
/// `unique_key_fields`'s prefix-matching shape in `repository/mod.rs`.
/// Returns `None` for collections the archival sweep should not touch.
fn retention_days_for(collection: &str, retention: &RetentionConfig) -> Option<i64> {
    if is_current_state(collection) {
        return None;
    }
    let days = if collection.starts_with("trades_") {
        retention.trades_days
    } else if collection.starts_with("orderbook_") {
        retention.orderbook_days
    } else if collection.starts_with("candles_") {
        retention.candles_days
    } else if collection.starts_with("ticker_") || collection == "mark_prices" {
        retention.mark_prices_days
    } else if collection == "trader_positions" {
        retention.trader_positions_days
    } else if collection == "trader_scores" {
        retention.trader_scores_days
    } else if collection == "signals" {
        retention.signals_days
    } else if collection == "trader_signals" {
        retention.trader_signals_days
    } else if collection == "leaderboard_history" {
        retention.leaderboard_history_days
    } else {
        // trader_orders, onchain_metrics, funding_*/open_interest_*/
        // liquidity_*/liquidations_* and any other HTTP-job collection fall
        // back to the general events retention.
        retention.events_days
    };
    Some(days)
}

fn serialize_document(doc: &Document) -> Value {
    let mut data = doc.data.clone();
    if let Some(obj) = data.as_object_mut() {
        obj.insert("_id".into(), json!(doc.id));
        obj.insert("created_at".into(), json!(doc.created_at.to_rfc3339()));
    }
    data
}

fn parse_archive_date(stem: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
        return Some(date);
    }
    let (year, month) = stem.split_once('-')?;
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, 1)
}

pub struct Archiver {
    repository: std::sync::Arc<dyn Repository>,
    base_path: PathBuf,
    batch_size: usize,
    compressor: Compressor,
}

impl Archiver {
    pub fn new(repository: std::sync::Arc<dyn Repository>, base_path: impl Into<PathBuf>, batch_size: usize, compression_level: i32) -> Self {
        Self { repository, base_path: base_path.into(), batch_size, compressor: Compressor::new(compression_level) }
    }

    /// One full sweep over every collection currently holding data (spec
    /// §4.7's per-run algorithm). Per-collection errors are caught and
    /// reported as part of that collection's `ArchiveResult` rather than
    /// aborting the rest of the run.
    pub async fn run(&self, retention: &RetentionConfig) -> Vec<ArchiveResult> {
        let mut results = Vec::new();

        for collection in self.repository.collection_names().await {
            if collection.starts_with("orderbook_") {
                match self.archive_orderbook_early(&collection).await {
                    Ok(early) if early.documents > 0 => {
                        info!(collection = %collection, documents = early.documents, "archival: orderbook nested 7-day pass complete");
                        results.push(early);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(collection = %collection, error = %e, "archival: orderbook nested pass failed");
                        results.push(ArchiveResult { collection: collection.clone(), documents: 0, size_bytes: 0, error: Some(e.to_string()) });
                    }
                }
            }

            let Some(days) = retention_days_for(&collection, retention) else { continue };
            match self.archive_collection(&collection, days).await {
                Ok(result) => {
                    if result.documents > 0 {
                        info!(collection = %collection, documents = result.documents, bytes = result.size_bytes, "archival: swept collection");
                    }
                    results.push(result);
                }
                Err(e) => {
                    warn!(collection = %collection, error = %e, "archival: sweep failed");
                    results.push(ArchiveResult { collection, documents: 0, size_bytes: 0, error: Some(e.to_string()) });
                }
            }
        }

        results
    }

    /// Archive and delete rows in `collection` older than `retention_days`,
    /// batch by batch, until a batch comes back short of `batch_size`
    /// (meaning the scan is exhausted).
    async fn archive_collection(&self, collection: &str, retention_days: i64) -> anyhow::Result<ArchiveResult> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let mut total_docs = 0usize;
        let mut total_bytes = 0u64;

        loop {
            let batch = self.repository.scan_older_than(collection, cutoff, self.batch_size).await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();

            let path = self.base_path.join(collection).join(format!("{}.zst", Utc::now().format("%Y-%m")));
            let documents: Vec<Value> = batch.iter().map(serialize_document).collect();
            let payload = json!({
                "metadata": {
                    "collection": collection,
                    "archived_at": Utc::now().to_rfc3339(),
                    "document_count": documents.len(),
                },
                "documents": documents,
            });

            // Only the delete below runs once this write has fully
            // succeeded — spec §4.7 step 4's "only on successful flush"
            // rule. A failure here propagates and this batch's rows are
            // left untouched in the store.
            let size = self.write_frame(&path, &payload).await?;

            let ids: Vec<String> = batch.into_iter().map(|d| d.id).collect();
            self.repository.delete_by_ids(collection, &ids).await?;

            total_docs += batch_len;
            total_bytes += size;

            if batch_len < self.batch_size {
                break;
            }
        }

        if total_docs > 0 {
            self.write_metadata(collection, total_docs, total_bytes).await;
        }

        Ok(ArchiveResult { collection: collection.to_string(), documents: total_docs, size_bytes: total_bytes, error: None })
    }

    /// Nested early pass for orderbook collections (spec §4.7 step 5):
    /// rows older than a fixed 7 days are compressed and removed grouped by
    /// calendar day, independent of the collection's configured retention
    /// (which may well also be 7 days, in which case this pass does the
    /// collection's entire job and the normal sweep finds nothing left).
    async fn archive_orderbook_early(&self, collection: &str) -> anyhow::Result<ArchiveResult> {
        const NESTED_COMPRESS_AFTER_DAYS: i64 = 7;
        let cutoff = Utc::now() - Duration::days(NESTED_COMPRESS_AFTER_DAYS);
        let mut total_docs = 0usize;
        let mut total_bytes = 0u64;

        loop {
            let batch = self.repository.scan_older_than(collection, cutoff, self.batch_size).await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();

            let mut by_day: BTreeMap<String, Vec<&Document>> = BTreeMap::new();
            for doc in &batch {
                by_day.entry(doc.created_at.format("%Y-%m-%d").to_string()).or_default().push(doc);
            }

            for (day, docs) in &by_day {
                let path = self.base_path.join(collection).join("daily").join(format!("{day}.zst"));
                let documents: Vec<Value> = docs.iter().map(|d| serialize_document(d)).collect();
                let payload = json!({
                    "metadata": { "collection": collection, "day": day, "document_count": documents.len() },
                    "documents": documents,
                });
                total_bytes += self.write_frame(&path, &payload).await?;
                debug!(collection, day, count = docs.len(), "archival: orderbook day group compressed");
            }

            let ids: Vec<String> = batch.into_iter().map(|d| d.id).collect();
            self.repository.delete_by_ids(collection, &ids).await?;
            total_docs += batch_len;

            if batch_len < self.batch_size {
                break;
            }
        }

        Ok(ArchiveResult { collection: collection.to_string(), documents: total_docs, size_bytes: total_bytes, error: None })
    }

    /// Compress `payload` and append it to `path` as a length-prefixed
    /// frame, creating parent directories and the file itself as needed.
    async fn write_frame(&self, path: &Path, payload: &Value) -> anyhow::Result<u64> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let compressed = self.compressor.compress(payload)?;

        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
        file.write_all(&(compressed.len() as u32).to_be_bytes()).await?;
        file.write_all(&compressed).await?;
        file.flush().await?;

        Ok(compressed.len() as u64)
    }

    async fn write_metadata(&self, collection: &str, documents: usize, bytes: u64) {
        let dir = self.base_path.join(collection);
        if tokio::fs::create_dir_all(&dir).await.is_err() {
            return;
        }
        let meta_path = dir.join("_meta.json");

        let mut cumulative_documents = documents as u64;
        let mut cumulative_bytes = bytes;
        if let Ok(existing) = tokio::fs::read(&meta_path).await {
            if let Ok(prev) = serde_json::from_slice::<Value>(&existing) {
                cumulative_documents += prev.get("cumulative_documents").and_then(Value::as_u64).unwrap_or(0);
                cumulative_bytes += prev.get("cumulative_bytes").and_then(Value::as_u64).unwrap_or(0);
            }
        }

        let meta = json!({
            "collection": collection,
            "last_archived": Utc::now().to_rfc3339(),
            "cumulative_documents": cumulative_documents,
            "cumulative_bytes": cumulative_bytes,
        });
        if let Ok(bytes) = serde_json::to_vec_pretty(&meta) {
            if let Err(e) = tokio::fs::write(&meta_path, bytes).await {
                warn!(collection, error = %e, "archival: failed to write _meta.json");
            }
        }
    }

    /// Remove archive files (by filename-encoded date, falling back to
    /// mtime when the name doesn't parse) older than `max_age_days`.
    pub async fn cleanup(&self, max_age_days: i64) -> anyhow::Result<usize> {
        let cutoff_date = (Utc::now() - Duration::days(max_age_days)).date_naive();
        let mut removed = 0usize;
        let mut dirs = vec![self.base_path.clone()];

        while let Some(dir) = dirs.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(_) => continue,
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let Ok(file_type) = entry.file_type().await else { continue };
                if file_type.is_dir() {
                    dirs.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("zst") {
                    continue;
                }

                let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
                let file_date = parse_archive_date(stem).or_else(|| {
                    entry.metadata().ok().and_then(|m| m.modified().ok()).map(|t| DateTime::<Utc>::from(t).date_naive())
                });

                if let Some(date) = file_date {
                    if date < cutoff_date {
                        if tokio::fs::remove_file(&path).await.is_ok() {
                            removed += 1;
                            debug!(path = %path.display(), "archival: removed expired archive file");
                        }
                    }
                }
            }
        }

        if removed > 0 {
            info!(removed, max_age_days, "archival: cleanup removed expired archive files");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use std::sync::Arc;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("hl_pulse_archival_test_{}", uuid::Uuid::new_v4()))
    }

    fn retention_all(days: i64) -> RetentionConfig {
        RetentionConfig {
            events_days: days,
            leaderboard_history_days: days,
            trader_positions_days: days,
            trader_scores_days: days,
            signals_days: days,
            trader_signals_days: days,
            mark_prices_days: days,
            trades_days: days,
            orderbook_days: days,
            candles_days: days,
        }
    }

    #[test]
    fn current_state_collections_are_excluded_from_retention_mapping() {
        let retention = retention_all(7);
        assert_eq!(retention_days_for("tracked_traders", &retention), None);
        assert_eq!(retention_days_for("trader_current_state", &retention), None);
        assert_eq!(retention_days_for("trades_BTC", &retention), Some(7));
        assert_eq!(retention_days_for("funding_BTC", &retention), Some(7));
    }

    #[test]
    fn parses_month_and_day_granularity_filenames() {
        assert_eq!(parse_archive_date("2024-03"), NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(parse_archive_date("2024-03-17"), NaiveDate::from_ymd_opt(2024, 3, 17));
        assert_eq!(parse_archive_date("not-a-date"), None);
    }

    #[tokio::test]
    async fn sweeps_old_rows_into_a_compressed_file_and_deletes_them() {
        let repo = Arc::new(MemoryRepository::new());
        for i in 0..5 {
            repo.insert_many("trades_BTC", vec![json!({ "source": "hyperliquid", "symbol": "BTC", "trade_id": i })]).await.unwrap();
        }

        let dir = temp_dir();
        let archiver = Archiver::new(repo.clone(), &dir, 1000, 3);
        // A negative retention pulls the cutoff into the future, so rows
        // inserted "now" still count as older than it.
        let result = archiver.archive_collection("trades_BTC", -1).await.unwrap();

        assert_eq!(result.documents, 5);
        assert!(result.size_bytes > 0);
        assert_eq!(repo.count_documents("trades_BTC", &crate::repository::QueryFilter::new()).await.unwrap(), 0);

        let archive_file = dir.join("trades_BTC").join(format!("{}.zst", Utc::now().format("%Y-%m")));
        assert!(archive_file.exists());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn recent_rows_are_left_alone() {
        let repo = Arc::new(MemoryRepository::new());
        repo.insert_many("trades_BTC", vec![json!({ "source": "hyperliquid", "symbol": "BTC", "trade_id": 1 })]).await.unwrap();

        let dir = temp_dir();
        let archiver = Archiver::new(repo.clone(), &dir, 1000, 3);
        let result = archiver.archive_collection("trades_BTC", 7).await.unwrap();

        assert_eq!(result.documents, 0);
        assert_eq!(repo.count_documents("trades_BTC", &crate::repository::QueryFilter::new()).await.unwrap(), 1);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn cleanup_removes_only_files_past_max_age() {
        let dir = temp_dir();
        let collection_dir = dir.join("trades_BTC");
        tokio::fs::create_dir_all(&collection_dir).await.unwrap();

        let old_stale = chrono::Utc::now() - Duration::days(400);
        let old_name = format!("{}.zst", old_stale.format("%Y-%m"));
        tokio::fs::write(collection_dir.join(&old_name), b"stale").await.unwrap();
        tokio::fs::write(collection_dir.join(format!("{}.zst", Utc::now().format("%Y-%m"))), b"fresh").await.unwrap();

        let repo = Arc::new(MemoryRepository::new());
        let archiver = Archiver::new(repo, &dir, 1000, 3);
        let removed = archiver.cleanup(365).await.unwrap();

        assert_eq!(removed, 1);
        assert!(!collection_dir.join(&old_name).exists());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
