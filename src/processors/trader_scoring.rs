// =============================================================================
// TraderScoringProcessor — Leaderboard -> ScoredTraders
// =============================================================================
//
// Grounded verbatim on examples/original_source/market-scraper/.../
// processors/trader_scoring.py (`calculate_trader_score`/`get_trader_tags`)
// and its `utils/hyperliquid.py` helpers for the windowPerformances
// parsing. Weights: all-time ROI 30%, month ROI 25%, week ROI 20% (capped
// at -10..20), account value 15%, volume 10%, +5 consistency bonus.
// =============================================================================

use async_trait::async_trait;
use serde_json::Value;

use crate::events::{EventPayload, EventType, ScoredTrader, StandardEvent, WindowPerformance, WindowPerformances};

use super::Processor;

fn parse_window(raw: &Value, key: &str) -> WindowPerformance {
    let w = raw.get(key);
    WindowPerformance {
        pnl: w.and_then(|w| w.get("pnl")).and_then(Value::as_f64).unwrap_or(0.0),
        roi: w.and_then(|w| w.get("roi")).and_then(Value::as_f64).unwrap_or(0.0),
        volume: w.and_then(|w| w.get("vlm")).and_then(Value::as_f64).unwrap_or(0.0),
    }
}

/// `windowPerformances` arrives either as a dict keyed by window name or as
/// a list of `[window_name, metrics]` pairs (Hyperliquid sends the latter).
fn normalize_window_performances(raw: &Value) -> Value {
    if raw.is_object() {
        return raw.clone();
    }
    if let Some(arr) = raw.as_array() {
        let mut obj = serde_json::Map::new();
        for pair in arr {
            if let Some(pair) = pair.as_array() {
                if pair.len() >= 2 {
                    if let Some(window) = pair[0].as_str() {
                        obj.insert(window.to_string(), pair[1].clone());
                    }
                }
            }
        }
        return Value::Object(obj);
    }
    Value::Null
}

fn calculate_trader_score(perf: &WindowPerformances, account_value: f64) -> f64 {
    let mut score = 0.0;

    score += (perf.all_time.roi * 30.0).min(30.0);
    score += (perf.month.roi * 50.0).min(25.0);
    score += (perf.week.roi * 100.0).min(20.0).max(-10.0);

    score += if account_value >= 10_000_000.0 {
        15.0
    } else if account_value >= 5_000_000.0 {
        12.0
    } else if account_value >= 1_000_000.0 {
        8.0
    } else if account_value >= 100_000.0 {
        4.0
    } else {
        0.0
    };

    score += if perf.month.volume >= 100_000_000.0 {
        10.0
    } else if perf.month.volume >= 50_000_000.0 {
        7.0
    } else if perf.month.volume >= 10_000_000.0 {
        4.0
    } else if perf.month.volume >= 1_000_000.0 {
        2.0
    } else {
        0.0
    };

    if perf.day.roi > 0.0 && perf.week.roi > 0.0 && perf.month.roi > 0.0 {
        score += 5.0;
    }

    (score * 100.0).round() / 100.0
}

fn trader_tags(perf: &WindowPerformances, account_value: f64, score: f64) -> Vec<String> {
    let mut tags = Vec::new();
    if score >= 80.0 {
        tags.push("top_performer".to_string());
    }
    if score >= 90.0 {
        tags.push("elite".to_string());
    }
    if account_value >= 10_000_000.0 {
        tags.push("whale".to_string());
    } else if account_value >= 1_000_000.0 {
        tags.push("large".to_string());
    }
    if perf.all_time.roi > 0.0 && perf.month.roi > 0.0 && perf.week.roi > 0.0 {
        tags.push("consistent".to_string());
    }
    if perf.all_time.roi > 1.0 {
        tags.push("high_performer".to_string());
    }
    if perf.month.volume >= 100_000_000.0 {
        tags.push("high_volume".to_string());
    } else if perf.month.volume >= 10_000_000.0 {
        tags.push("medium_volume".to_string());
    }
    tags
}

pub struct TraderScoringProcessor {
    min_score: f64,
    max_count: usize,
    min_account_value: f64,
}

impl TraderScoringProcessor {
    pub fn new(min_score: f64, max_count: usize, min_account_value: f64) -> Self {
        Self { min_score, max_count, min_account_value }
    }
}

#[async_trait]
impl Processor for TraderScoringProcessor {
    fn name(&self) -> &'static str {
        "trader_scoring"
    }

    async fn process(&self, event: &StandardEvent) -> anyhow::Result<Option<StandardEvent>> {
        if event.event_type != EventType::Leaderboard {
            return Ok(None);
        }
        let EventPayload::Raw(payload) = &event.payload else { return Ok(None) };

        let rows = payload.get("rows").or_else(|| payload.get("traders")).and_then(Value::as_array);
        let Some(rows) = rows else { return Ok(None) };

        let mut scored: Vec<ScoredTrader> = Vec::new();
        for trader in rows {
            let account_value = trader.get("accountValue").and_then(Value::as_f64).unwrap_or(0.0);
            if account_value < self.min_account_value {
                continue;
            }
            let normalized = normalize_window_performances(trader.get("windowPerformances").unwrap_or(&Value::Null));
            let perf = WindowPerformances {
                day: parse_window(&normalized, "day"),
                week: parse_window(&normalized, "week"),
                month: parse_window(&normalized, "month"),
                all_time: parse_window(&normalized, "allTime"),
            };

            let score = calculate_trader_score(&perf, account_value);
            if score < self.min_score {
                continue;
            }

            let address = trader.get("ethAddress").and_then(Value::as_str).unwrap_or_default().to_string();
            scored.push(ScoredTrader { trader_address: address, score, tags: trader_tags(&perf, account_value, score), account_value, window_performances: perf });
        }

        if scored.is_empty() {
            return Ok(None);
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.max_count);

        Ok(Some(event.derive(EventType::ScoredTraders, "trader_scoring", EventPayload::ScoredTraders(scored))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaderboard_event(rows: Value) -> StandardEvent {
        StandardEvent::create(EventType::Leaderboard, "test", EventPayload::Raw(json!({ "rows": rows })), None, None)
    }

    #[tokio::test]
    async fn scores_and_filters_below_min_score() {
        let proc = TraderScoringProcessor::new(50.0, 500, 0.0);
        let rows = json!([
            { "ethAddress": "0xhigh", "accountValue": 12_000_000.0, "windowPerformances": { "allTime": { "roi": 1.5 }, "month": { "roi": 0.3, "vlm": 200_000_000.0 }, "week": { "roi": 0.1 }, "day": { "roi": 0.02 } } },
            { "ethAddress": "0xlow", "accountValue": 1000.0, "windowPerformances": { "allTime": { "roi": 0.0 }, "month": { "roi": 0.0 }, "week": { "roi": 0.0 }, "day": { "roi": 0.0 } } },
        ]);
        let out = proc.process(&leaderboard_event(rows)).await.unwrap().unwrap();
        match out.payload {
            EventPayload::ScoredTraders(traders) => {
                assert_eq!(traders.len(), 1);
                assert_eq!(traders[0].trader_address, "0xhigh");
                assert!(traders[0].tags.contains(&"whale".to_string()));
            }
            _ => panic!("expected scored traders"),
        }
    }

    #[tokio::test]
    async fn no_qualifying_traders_emits_nothing() {
        let proc = TraderScoringProcessor::new(50.0, 500, 0.0);
        let rows = json!([{ "ethAddress": "0xlow", "accountValue": 0.0, "windowPerformances": {} }]);
        assert!(proc.process(&leaderboard_event(rows)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn below_min_account_value_is_excluded_even_with_high_score() {
        let proc = TraderScoringProcessor::new(0.0, 500, 50_000.0);
        let rows = json!([
            { "ethAddress": "0xsmall", "accountValue": 1000.0, "windowPerformances": { "allTime": { "roi": 1.5 }, "month": { "roi": 0.3, "vlm": 200_000_000.0 }, "week": { "roi": 0.1 }, "day": { "roi": 0.02 } } },
        ]);
        assert!(proc.process(&leaderboard_event(rows)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_shaped_window_performances_parse_correctly() {
        let proc = TraderScoringProcessor::new(0.0, 500, 0.0);
        let rows = json!([{ "ethAddress": "0xabc", "accountValue": 0.0, "windowPerformances": [["allTime", {"roi": 0.5}], ["month", {"roi": 0.1, "vlm": 0}], ["week", {"roi": 0.05}], ["day", {"roi": 0.01}]] }]);
        let out = proc.process(&leaderboard_event(rows)).await.unwrap().unwrap();
        match out.payload {
            EventPayload::ScoredTraders(traders) => assert!(traders[0].score > 0.0),
            _ => panic!(),
        }
    }
}
