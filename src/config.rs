// =============================================================================
// Runtime Configuration — hot-reloadable pipeline settings with atomic save
// =============================================================================
//
// Every tunable parameter in spec §6's configuration surface lives here.
// Persistence uses the teacher's atomic tmp + rename pattern to prevent
// corruption on crash. All fields carry `#[serde(default = "...")]` so that
// adding new fields never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Default-value helpers (required by serde `default = "..."`)
// ---------------------------------------------------------------------------

fn default_exchange_http_url() -> String {
    "https://api.hyperliquid.xyz".to_string()
}
fn default_exchange_ws_url() -> String {
    "wss://api.hyperliquid.xyz/ws".to_string()
}
fn default_heartbeat_interval_s() -> u64 {
    30
}
fn default_reconnect_base_delay_s() -> f64 {
    1.0
}
fn default_reconnect_max_delay_s() -> f64 {
    30.0
}
fn default_reconnect_max_attempts() -> u32 {
    10
}
fn default_target_symbol() -> String {
    "BTC".to_string()
}
fn default_candle_intervals() -> Vec<String> {
    vec!["1m", "5m", "15m", "1h", "4h", "1d"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_orderbook_price_change_pct() -> f64 {
    0.01
}
fn default_orderbook_max_save_interval_s() -> u64 {
    600
}
fn default_trade_min_value_usd() -> f64 {
    1000.0
}
fn default_buffer_flush_interval_s() -> u64 {
    5
}
fn default_buffer_max_size() -> usize {
    100
}
fn default_min_score() -> f64 {
    50.0
}
fn default_max_tracked_count() -> usize {
    500
}
fn default_min_account_value() -> f64 {
    10_000.0
}
fn default_trader_selection_interval_s() -> u64 {
    3600
}
fn default_archive_base_path() -> String {
    "./archive".to_string()
}
fn default_archive_interval_s() -> u64 {
    86_400
}
fn default_max_archive_age_days() -> i64 {
    365
}
fn default_compression_level() -> i32 {
    3
}
fn default_batch_size() -> usize {
    10_000
}
fn default_backfill_batch_size() -> usize {
    500
}
fn default_rate_limit_delay_s() -> f64 {
    0.5
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_pool_size() -> usize {
    10
}
fn default_drain_timeout_s() -> u64 {
    5
}
fn default_shutdown_grace_s() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// RetentionConfig
// ---------------------------------------------------------------------------

/// Per-collection retention in days, enforced by the archival sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_events")]
    pub events_days: i64,
    #[serde(default = "default_retention_leaderboard_history")]
    pub leaderboard_history_days: i64,
    #[serde(default = "default_retention_trader_positions")]
    pub trader_positions_days: i64,
    #[serde(default = "default_retention_trader_scores")]
    pub trader_scores_days: i64,
    #[serde(default = "default_retention_signals")]
    pub signals_days: i64,
    #[serde(default = "default_retention_trader_signals")]
    pub trader_signals_days: i64,
    #[serde(default = "default_retention_mark_prices")]
    pub mark_prices_days: i64,
    #[serde(default = "default_retention_trades")]
    pub trades_days: i64,
    #[serde(default = "default_retention_orderbook")]
    pub orderbook_days: i64,
    #[serde(default = "default_retention_candles")]
    pub candles_days: i64,
}

fn default_retention_events() -> i64 {
    7
}
fn default_retention_leaderboard_history() -> i64 {
    90
}
fn default_retention_trader_positions() -> i64 {
    30
}
fn default_retention_trader_scores() -> i64 {
    90
}
fn default_retention_signals() -> i64 {
    30
}
fn default_retention_trader_signals() -> i64 {
    30
}
fn default_retention_mark_prices() -> i64 {
    30
}
fn default_retention_trades() -> i64 {
    7
}
fn default_retention_orderbook() -> i64 {
    7
}
fn default_retention_candles() -> i64 {
    30
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            events_days: default_retention_events(),
            leaderboard_history_days: default_retention_leaderboard_history(),
            trader_positions_days: default_retention_trader_positions(),
            trader_scores_days: default_retention_trader_scores(),
            signals_days: default_retention_signals(),
            trader_signals_days: default_retention_trader_signals(),
            mark_prices_days: default_retention_mark_prices(),
            trades_days: default_retention_trades(),
            orderbook_days: default_retention_orderbook(),
            candles_days: default_retention_candles(),
        }
    }
}

// ---------------------------------------------------------------------------
// BackfillConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_candle_intervals")]
    pub timeframes: Vec<String>,
    #[serde(default = "default_backfill_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_rate_limit_delay_s")]
    pub rate_limit_delay_s: f64,
    #[serde(default = "default_true")]
    pub incremental: bool,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeframes: default_candle_intervals(),
            batch_size: default_backfill_batch_size(),
            rate_limit_delay_s: default_rate_limit_delay_s(),
            incremental: true,
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for the pipeline. Every field has a serde
/// default so older JSON files missing new fields still deserialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Connection ----------------------------------------------------
    #[serde(default = "default_exchange_http_url")]
    pub exchange_http_url: String,
    #[serde(default = "default_exchange_ws_url")]
    pub exchange_ws_url: String,
    #[serde(default = "default_heartbeat_interval_s")]
    pub heartbeat_interval_s: u64,
    #[serde(default = "default_reconnect_base_delay_s")]
    pub reconnect_base_delay_s: f64,
    #[serde(default = "default_reconnect_max_delay_s")]
    pub reconnect_max_delay_s: f64,
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
    /// When false, REST-fallback collection jobs are scheduled instead of
    /// relying on the WS collectors for the same data (see DESIGN.md Open
    /// Question 2).
    #[serde(default = "default_true")]
    pub ws_available: bool,

    // --- Symbol filter ---------------------------------------------------
    #[serde(default = "default_target_symbol")]
    pub target_symbol: String,

    // --- Collectors -------------------------------------------------------
    #[serde(default = "default_candle_intervals")]
    pub candle_intervals: Vec<String>,
    #[serde(default = "default_orderbook_price_change_pct")]
    pub orderbook_price_change_pct: f64,
    #[serde(default = "default_orderbook_max_save_interval_s")]
    pub orderbook_max_save_interval_s: u64,
    #[serde(default = "default_trade_min_value_usd")]
    pub trade_min_value_usd: f64,
    #[serde(default = "default_buffer_flush_interval_s")]
    pub buffer_flush_interval_s: u64,
    #[serde(default = "default_buffer_max_size")]
    pub buffer_max_size: usize,

    // --- Scoring / filters --------------------------------------------
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_max_tracked_count")]
    pub max_tracked_count: usize,
    #[serde(default = "default_min_account_value")]
    pub min_account_value: f64,
    #[serde(default = "default_trader_selection_interval_s")]
    pub trader_selection_interval_s: u64,

    // --- Archival ---------------------------------------------------------
    #[serde(default = "default_archive_base_path")]
    pub archive_base_path: String,
    #[serde(default = "default_archive_interval_s")]
    pub archive_interval_s: u64,
    #[serde(default = "default_max_archive_age_days")]
    pub max_archive_age_days: i64,
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
    #[serde(default = "default_batch_size")]
    pub archive_batch_size: usize,

    // --- Retention ----------------------------------------------------
    #[serde(default)]
    pub retention: RetentionConfig,

    // --- Backfill -----------------------------------------------------
    #[serde(default)]
    pub backfill: BackfillConfig,

    // --- Concurrency / timeouts -----------------------------------------
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    #[serde(default = "default_drain_timeout_s")]
    pub drain_timeout_s: u64,
    #[serde(default = "default_shutdown_grace_s")]
    pub shutdown_grace_s: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            exchange_http_url: default_exchange_http_url(),
            exchange_ws_url: default_exchange_ws_url(),
            heartbeat_interval_s: default_heartbeat_interval_s(),
            reconnect_base_delay_s: default_reconnect_base_delay_s(),
            reconnect_max_delay_s: default_reconnect_max_delay_s(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            ws_available: true,

            target_symbol: default_target_symbol(),

            candle_intervals: default_candle_intervals(),
            orderbook_price_change_pct: default_orderbook_price_change_pct(),
            orderbook_max_save_interval_s: default_orderbook_max_save_interval_s(),
            trade_min_value_usd: default_trade_min_value_usd(),
            buffer_flush_interval_s: default_buffer_flush_interval_s(),
            buffer_max_size: default_buffer_max_size(),

            min_score: default_min_score(),
            max_tracked_count: default_max_tracked_count(),
            min_account_value: default_min_account_value(),
            trader_selection_interval_s: default_trader_selection_interval_s(),

            archive_base_path: default_archive_base_path(),
            archive_interval_s: default_archive_interval_s(),
            max_archive_age_days: default_max_archive_age_days(),
            compression_level: default_compression_level(),
            archive_batch_size: default_batch_size(),

            retention: RetentionConfig::default(),
            backfill: BackfillConfig::default(),

            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            max_pool_size: default_max_pool_size(),
            drain_timeout_s: default_drain_timeout_s(),
            shutdown_grace_s: default_shutdown_grace_s(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning (matches the teacher's
    /// `runtime_config.rs::load` convention).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            target_symbol = %config.target_symbol,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self).context("failed to serialize runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply environment-variable overrides on top of a loaded/default
    /// config (e.g. `HL_TARGET_SYMBOL`), matching the teacher's `main.rs`
    /// env-override-after-load pattern.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(sym) = std::env::var("HL_TARGET_SYMBOL") {
            if !sym.trim().is_empty() {
                self.target_symbol = sym.trim().to_uppercase();
            }
        }
        if let Ok(url) = std::env::var("HL_WS_URL") {
            if !url.trim().is_empty() {
                self.exchange_ws_url = url;
            }
        }
        if let Ok(url) = std::env::var("HL_HTTP_URL") {
            if !url.trim().is_empty() {
                self.exchange_http_url = url;
            }
        }
    }
}

/// Load config from `path`, falling back to defaults with a warning (the
/// shape used directly by `main.rs`).
pub fn load_or_default(path: impl AsRef<Path>) -> RuntimeConfig {
    let mut config = RuntimeConfig::load(&path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.target_symbol, "BTC");
        assert_eq!(cfg.candle_intervals.len(), 6);
        assert!((cfg.orderbook_price_change_pct - 0.01).abs() < f64::EPSILON);
        assert_eq!(cfg.retention.trades_days, 7);
        assert_eq!(cfg.backfill.batch_size, 500);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.target_symbol, "BTC");
        assert_eq!(cfg.max_tracked_count, 500);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "target_symbol": "ETH" }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.target_symbol, "ETH");
        assert_eq!(cfg.min_score, 50.0);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.target_symbol, cfg2.target_symbol);
        assert_eq!(cfg.max_tracked_count, cfg2.max_tracked_count);
    }
}
