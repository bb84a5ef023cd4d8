// =============================================================================
// FearGreedProvider — the illustrative `AuxHttpProvider` (spec §4.6:
// `collect_onchain_metrics`, daily)
// =============================================================================
//
// Grounded on examples/original_source/market-scraper/.../connectors/
// fear_greed/{client,parsers}.py: GET the Alternative.me Fear & Greed API
// with `limit=2` (current + previous value, enough to compute `change`),
// bucket the value into `_get_sentiment`'s five bands, and emit one
// `EventType::OnchainMetric` event shaped like `parse_fear_greed_response`'s
// payload.
// =============================================================================

use anyhow::Context;
use serde_json::Value;
use tracing::debug;

use super::AuxHttpProvider;
use crate::events::{EventPayload, EventType, StandardEvent};

const FEAR_GREED_URL: &str = "https://api.alternative.me/fng/";

fn sentiment(value: i64) -> &'static str {
    match value {
        v if v <= 20 => "extreme_fear",
        v if v <= 40 => "fear",
        v if v <= 60 => "neutral",
        v if v <= 80 => "greed",
        _ => "extreme_greed",
    }
}

pub struct FearGreedProvider {
    client: reqwest::Client,
}

impl FearGreedProvider {
    pub fn new() -> Self {
        Self { client: reqwest::Client::builder().timeout(std::time::Duration::from_secs(30)).build().expect("failed to build reqwest client") }
    }
}

impl Default for FearGreedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AuxHttpProvider for FearGreedProvider {
    fn name(&self) -> &'static str {
        "fear_greed"
    }

    async fn fetch(&self) -> anyhow::Result<StandardEvent> {
        let resp: Value = self.client.get(FEAR_GREED_URL).query(&[("limit", "2")]).send().await.context("fear & greed request failed")?.json().await.context("failed to parse fear & greed response")?;

        let entries = resp.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
        let latest = entries.first().context("fear & greed response carried no data entries")?;

        let value = latest.get("value").and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok()).context("fear & greed entry missing a parseable value")?;
        let classification = latest.get("value_classification").and_then(Value::as_str).unwrap_or("Unknown").to_string();
        let time_until_update = latest.get("time_until_update").and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok());

        let previous_value = entries.get(1).and_then(|e| e.get("value")).and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok());
        let change = previous_value.map(|prev| value - prev);

        debug!(value, %classification, "collect_onchain_metrics: fear & greed index fetched");

        let payload = serde_json::json!({
            "metric": "fear_greed_index",
            "value": value,
            "classification": classification,
            "sentiment": sentiment(value),
            "previous_value": previous_value,
            "change": change,
            "time_until_update": time_until_update,
        });

        Ok(StandardEvent::create(EventType::OnchainMetric, "fear_greed", EventPayload::Raw(payload), None, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_buckets_match_alternative_me_bands() {
        assert_eq!(sentiment(0), "extreme_fear");
        assert_eq!(sentiment(20), "extreme_fear");
        assert_eq!(sentiment(21), "fear");
        assert_eq!(sentiment(50), "neutral");
        assert_eq!(sentiment(61), "greed");
        assert_eq!(sentiment(100), "extreme_greed");
    }
}
