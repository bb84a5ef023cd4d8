// =============================================================================
// Hyperliquid HTTP client — single `info` endpoint
// =============================================================================
//
// All requests are unauthenticated POSTs to one endpoint with a `{"type":
// ...}` body (spec §6). Grounded on the teacher's binance/client.rs for
// request-construction and error-reporting idiom (reqwest client builder,
// #[instrument], anyhow::bail! on non-2xx), and on
// examples/original_source/market-scraper/.../connectors/hyperliquid/
// client.py for the endpoint/body shapes.
// =============================================================================

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{debug, instrument};

/// Hyperliquid `/info` HTTP client.
#[derive(Clone)]
pub struct HyperliquidClient {
    base_url: String,
    client: reqwest::Client,
}

impl HyperliquidClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");

        Self { base_url: base_url.into(), client }
    }

    #[instrument(skip(self, body), name = "hyperliquid::post_info")]
    async fn post_info(&self, body: Value) -> Result<Value> {
        let url = format!("{}/info", self.base_url);

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("POST /info request failed")?;

        let status = resp.status();
        let body: Value = resp.json().await.context("failed to parse /info response")?;

        if !status.is_success() {
            anyhow::bail!("Hyperliquid POST /info returned {}: {}", status, body);
        }

        Ok(body)
    }

    /// `candleSnapshot` — historical OHLCV for `coin`/`interval` in
    /// `[start_ms, end_ms]`.
    pub async fn candle_snapshot(&self, coin: &str, interval: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Value>> {
        let body = json!({
            "type": "candleSnapshot",
            "req": { "coin": coin, "interval": interval, "startTime": start_ms, "endTime": end_ms },
        });
        let resp = self.post_info(body).await?;
        let arr = resp.as_array().cloned().unwrap_or_default();
        debug!(coin, interval, count = arr.len(), "candle snapshot fetched");
        Ok(arr)
    }

    /// `l2Book` — current order book snapshot for `coin`, consumed by the
    /// `collect_orderbook` REST-fallback job when no WS connection is
    /// available.
    pub async fn l2_book(&self, coin: &str) -> Result<Value> {
        self.post_info(json!({ "type": "l2Book", "coin": coin })).await
    }

    /// `meta` — exchange metadata (asset list, decimals, etc.).
    pub async fn meta(&self) -> Result<Value> {
        self.post_info(json!({ "type": "meta" })).await
    }

    /// `allMids` — per-coin mid prices.
    pub async fn all_mids(&self) -> Result<Value> {
        self.post_info(json!({ "type": "allMids" })).await
    }

    /// `clearinghouseState` — a trader's positions/account value/margin.
    pub async fn clearinghouse_state(&self, user: &str) -> Result<Value> {
        self.post_info(json!({ "type": "clearinghouseState", "user": user })).await
    }

    /// `openOrders` — a trader's resting orders.
    pub async fn open_orders(&self, user: &str) -> Result<Vec<Value>> {
        let resp = self.post_info(json!({ "type": "openOrders", "user": user })).await?;
        Ok(resp.as_array().cloned().unwrap_or_default())
    }

    /// `leaderboard` — ranked trader accounts by performance.
    pub async fn leaderboard(&self) -> Result<Vec<Value>> {
        let resp = self.post_info(json!({ "type": "leaderboard" })).await?;
        Ok(resp.as_array().cloned().unwrap_or_default())
    }

    /// `fundingHistory` — historical funding rate for `coin` in
    /// `[start_ms, end_ms]`, consumed by the `collect_funding` job.
    pub async fn funding_history(&self, coin: &str, start_ms: i64, end_ms: Option<i64>) -> Result<Vec<Value>> {
        let mut req = json!({ "type": "fundingHistory", "coin": coin, "startTime": start_ms });
        if let Some(end_ms) = end_ms {
            req["endTime"] = json!(end_ms);
        }
        let resp = self.post_info(req).await?;
        Ok(resp.as_array().cloned().unwrap_or_default())
    }

    /// `metaAndAssetCtxs` — `[meta, assetCtxs]` pair; `assetCtxs` carries
    /// per-asset open interest, day notional volume and funding, consumed
    /// by the `collect_daily_stats` job.
    pub async fn meta_and_asset_ctxs(&self) -> Result<Vec<Value>> {
        let resp = self.post_info(json!({ "type": "metaAndAssetCtxs" })).await?;
        Ok(resp.as_array().cloned().unwrap_or_default())
    }

    /// `recentTrades` — the most recent public fills for `coin`, consumed by
    /// the `collect_trades` REST-fallback job in place of the `trades` WS
    /// channel. Mirrors `client.get_trades(coin)` in
    /// `hyperliquid-system/src/jobs/btc_trades.py`; each row carries
    /// `tid`/`px`/`sz`/`side`/`time`/`hash`.
    pub async fn recent_trades(&self, coin: &str) -> Result<Vec<Value>> {
        let resp = self.post_info(json!({ "type": "recentTrades", "coin": coin })).await?;
        Ok(resp.as_array().cloned().unwrap_or_default())
    }
}

impl std::fmt::Debug for HyperliquidClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperliquidClient").field("base_url", &self.base_url).finish()
    }
}
