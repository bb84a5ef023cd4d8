// =============================================================================
// Backfiller — incremental historical candle gap-fill on startup (spec §4.8)
// =============================================================================
//
// Grounded on examples/original_source/hyperliquid/hyperliquid-system/src/
// services/candle_backfill.py: resume from `latest_candle.open_time +
// interval` when incremental mode is on, otherwise start from
// `HYPERLIQUID_EARLIEST` (here `LAUNCH_DATE`, the same 2023-03-01 constant),
// fetch `candleSnapshot` in `batch_size`-candle windows with a fixed delay
// between requests, and advance by `max(open_time) + interval` until caught
// up to now. Candle field parsing mirrors `collectors/candles.rs` so both
// paths produce an identical `Candle` shape.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::BackfillConfig;
use crate::events::{Candle, CandleInterval};
use crate::hyperliquid::HyperliquidClient;
use crate::repository::Repository;

/// Earliest candle data Hyperliquid serves; the absolute fallback start when
/// incremental resume has nothing to resume from.
const LAUNCH_DATE: &str = "2023-03-01T00:00:00Z";

fn launch_date_ms() -> i64 {
    DateTime::parse_from_rfc3339(LAUNCH_DATE).expect("LAUNCH_DATE is a valid RFC3339 timestamp").timestamp_millis()
}

fn parse_f64(raw: &Value, key: &str) -> f64 {
    raw.get(key).and_then(Value::as_f64).or_else(|| raw.get(key).and_then(Value::as_str).and_then(|s| s.parse().ok())).unwrap_or(0.0)
}

fn normalize_candle(symbol: &str, interval: CandleInterval, raw: &Value) -> Option<Candle> {
    let open_time = raw.get("t").and_then(Value::as_i64)?;
    let candle = Candle {
        symbol: symbol.to_string(),
        interval,
        open_time,
        o: parse_f64(raw, "o"),
        h: parse_f64(raw, "h"),
        l: parse_f64(raw, "l"),
        c: parse_f64(raw, "c"),
        v: parse_f64(raw, "v"),
        trade_count: raw.get("n").and_then(Value::as_u64).unwrap_or(0),
    };
    candle.is_valid().then_some(candle)
}

pub struct Backfiller {
    client: HyperliquidClient,
    repository: Arc<dyn Repository>,
}

impl Backfiller {
    pub fn new(client: HyperliquidClient, repository: Arc<dyn Repository>) -> Self {
        Self { client, repository }
    }

    /// Backfill every configured timeframe for `symbol`, one after another.
    /// A failure on one timeframe is logged and does not prevent the rest
    /// from running.
    pub async fn run(&self, symbol: &str, config: &BackfillConfig) {
        if !config.enabled {
            debug!("backfill: disabled, skipping");
            return;
        }

        for raw_interval in &config.timeframes {
            let Some(interval) = CandleInterval::ALL.iter().copied().find(|i| i.as_str() == raw_interval) else {
                warn!(interval = raw_interval, "backfill: unrecognized interval, skipping");
                continue;
            };

            match self.backfill_interval(symbol, interval, config).await {
                Ok(count) => {
                    if count > 0 {
                        info!(symbol, interval = interval.as_str(), candles = count, "backfill: caught up");
                    }
                }
                Err(e) => warn!(symbol, interval = interval.as_str(), error = %e, "backfill: interval failed"),
            }
        }
    }

    async fn backfill_interval(&self, symbol: &str, interval: CandleInterval, config: &BackfillConfig) -> anyhow::Result<usize> {
        let interval_ms = interval.seconds() * 1000;
        let mut start_ms = self.resume_point(symbol, interval, config).await?;
        let now_ms = Utc::now().timestamp_millis();
        let collection = format!("candles_{symbol}_{}", interval.as_str());
        let mut total_inserted = 0usize;

        while start_ms < now_ms {
            let end_ms = (start_ms + interval_ms * config.batch_size as i64).min(now_ms);
            let raw_candles = self.client.candle_snapshot(symbol, interval.as_str(), start_ms, end_ms).await?;
            if raw_candles.is_empty() {
                break;
            }

            let max_open_time = raw_candles.iter().filter_map(|c| c.get("t").and_then(Value::as_i64)).max();
            let docs: Vec<Value> = raw_candles.iter().filter_map(|c| normalize_candle(symbol, interval, c)).filter_map(|c| serde_json::to_value(c).ok()).collect();

            let inserted = self.repository.insert_many(&collection, docs).await?;
            total_inserted += inserted;
            debug!(symbol, interval = interval.as_str(), start_ms, end_ms, inserted, "backfill: batch written");

            let Some(max_open_time) = max_open_time else { break };
            let next_start = max_open_time + interval_ms;
            if next_start <= start_ms {
                // the exchange returned no forward progress; stop rather
                // than loop forever on the same window.
                break;
            }
            start_ms = next_start;

            if config.rate_limit_delay_s > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(config.rate_limit_delay_s)).await;
            }
        }

        Ok(total_inserted)
    }

    async fn resume_point(&self, symbol: &str, interval: CandleInterval, config: &BackfillConfig) -> anyhow::Result<i64> {
        if config.incremental {
            if let Some(latest) = self.repository.latest_candle(symbol, interval.as_str()).await? {
                if let Some(open_time) = latest.get("open_time").and_then(Value::as_i64) {
                    return Ok(open_time + interval.seconds() * 1000);
                }
            }
        }
        Ok(launch_date_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use serde_json::json;

    fn backfiller() -> Backfiller {
        Backfiller::new(HyperliquidClient::new("http://127.0.0.1:0"), Arc::new(MemoryRepository::new()))
    }

    #[test]
    fn normalizes_string_and_numeric_ohlc_fields() {
        let raw = json!({ "t": 1_700_000_000_000i64, "o": "100.0", "h": "105.0", "l": "99.0", "c": "103.0", "v": "42.5", "n": 12 });
        let candle = normalize_candle("BTC", CandleInterval::M1, &raw).unwrap();
        assert_eq!(candle.o, 100.0);
        assert_eq!(candle.trade_count, 12);
    }

    #[test]
    fn rejects_candle_violating_ohlc_invariant() {
        let raw = json!({ "t": 1, "o": "100.0", "h": "50.0", "l": "99.0", "c": "103.0", "v": "1.0", "n": 1 });
        assert!(normalize_candle("BTC", CandleInterval::M1, &raw).is_none());
    }

    #[tokio::test]
    async fn resume_point_falls_back_to_launch_date_with_no_prior_candles() {
        let job = backfiller();
        let config = BackfillConfig::default();
        let start = job.resume_point("BTC", CandleInterval::M1, &config).await.unwrap();
        assert_eq!(start, launch_date_ms());
    }

    #[tokio::test]
    async fn resume_point_advances_past_the_latest_stored_candle() {
        let job = backfiller();
        job.repository.insert_many("candles_BTC_1m", vec![json!({ "symbol": "BTC", "interval": "1m", "open_time": 1_000_000i64 })]).await.unwrap();

        let config = BackfillConfig::default();
        let start = job.resume_point("BTC", CandleInterval::M1, &config).await.unwrap();
        assert_eq!(start, 1_000_000 + CandleInterval::M1.seconds() * 1000);
    }

    #[tokio::test]
    async fn disabled_backfill_does_not_resume_anything() {
        let job = backfiller();
        let mut config = BackfillConfig::default();
        config.enabled = false;
        job.run("BTC", &config).await;
        assert!(job.repository.collection_names().await.is_empty());
    }

    #[tokio::test]
    async fn non_incremental_mode_ignores_stored_candles() {
        let job = backfiller();
        job.repository.insert_many("candles_BTC_1m", vec![json!({ "symbol": "BTC", "interval": "1m", "open_time": 1_000_000i64 })]).await.unwrap();

        let mut config = BackfillConfig::default();
        config.incremental = false;
        let start = job.resume_point("BTC", CandleInterval::M1, &config).await.unwrap();
        assert_eq!(start, launch_date_ms());
    }
}
