// =============================================================================
// WhaleAlertProcessor — PositionChange (+ TraderPositions) -> WhaleAlert
// =============================================================================
//
// Grounded on spec §4.4's tier/priority rules and on the trader-scoring
// processor's account-value bucketing idiom (`trader_scoring.rs`) for the
// tier thresholds (MEGA ≥10M, LARGE ≥1M, MID ≥100k). The MEGA→CRITICAL
// escalation fraction and alert TTL are this crate's own defaults — the
// original implementation doesn't expose either as a tunable distinctly
// from the rest of `RuntimeConfig` — recorded as DESIGN.md Open Question
// decisions 3 and a sibling default here.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::events::{AlertPriority, EventPayload, EventType, PositionAction, StandardEvent, WhaleChange, WhaleTier};

use super::Processor;

const MEGA_THRESHOLD: f64 = 10_000_000.0;
const LARGE_THRESHOLD: f64 = 1_000_000.0;
const MID_THRESHOLD: f64 = 100_000.0;
const MEGA_CRITICAL_FRACTION: f64 = 0.25;
const ALERT_TTL: Duration = Duration::from_secs(3600);
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Coarse size bucket used for de-duplication only — not exposed on the
/// alert itself. Keeps repeated small adjustments within the same bucket
/// from re-firing identical alerts inside the dedup window.
fn size_bucket(size: f64) -> i64 {
    (size.abs().log10().max(0.0) * 10.0).round() as i64
}

fn tier_for(account_value: f64) -> Option<WhaleTier> {
    if account_value >= MEGA_THRESHOLD {
        Some(WhaleTier::Mega)
    } else if account_value >= LARGE_THRESHOLD {
        Some(WhaleTier::Large)
    } else if account_value >= MID_THRESHOLD {
        Some(WhaleTier::Mid)
    } else {
        None
    }
}

fn priority_for(tier: WhaleTier, delta: f64, account_value: f64) -> AlertPriority {
    match tier {
        WhaleTier::Mid => AlertPriority::Low,
        WhaleTier::Large => AlertPriority::Medium,
        WhaleTier::Mega => {
            if account_value > 0.0 && (delta.abs() / account_value) > MEGA_CRITICAL_FRACTION {
                AlertPriority::Critical
            } else {
                AlertPriority::High
            }
        }
    }
}

pub struct WhaleAlertProcessor {
    target_symbol: String,
    account_values: Mutex<HashMap<String, f64>>,
    recent_alerts: Mutex<HashMap<(String, String, PositionAction, i64), Instant>>,
}

impl WhaleAlertProcessor {
    pub fn new(target_symbol: impl Into<String>) -> Self {
        Self {
            target_symbol: target_symbol.into(),
            account_values: Mutex::new(HashMap::new()),
            recent_alerts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` and records the key if this (address, coin, action,
    /// size_bucket) hasn't fired an alert in the last `DEDUP_WINDOW`.
    fn should_alert(&self, address: &str, coin: &str, action: PositionAction, size: f64) -> bool {
        let key = (address.to_string(), coin.to_string(), action, size_bucket(size));
        let mut recent = self.recent_alerts.lock();
        let now = Instant::now();
        recent.retain(|_, seen_at| now.duration_since(*seen_at) <= DEDUP_WINDOW);
        if recent.contains_key(&key) {
            return false;
        }
        recent.insert(key, now);
        true
    }
}

#[async_trait]
impl Processor for WhaleAlertProcessor {
    fn name(&self) -> &'static str {
        "whale_alert"
    }

    async fn process(&self, event: &StandardEvent) -> anyhow::Result<Option<StandardEvent>> {
        match &event.payload {
            EventPayload::TraderPositions(snapshot) => {
                self.account_values.lock().insert(snapshot.trader_address.clone(), snapshot.account_value);
                Ok(None)
            }
            EventPayload::PositionChange(change) => {
                if change.coin != self.target_symbol {
                    return Ok(None);
                }
                let account_value = self.account_values.lock().get(&change.trader_address).copied().unwrap_or(0.0);
                let Some(tier) = tier_for(account_value) else { return Ok(None) };

                if !self.should_alert(&change.trader_address, &change.coin, change.action, change.curr_size) {
                    return Ok(None);
                }

                let change_pct = if change.prev_size.abs() > f64::EPSILON { change.delta / change.prev_size } else { 0.0 };
                let priority = priority_for(tier, change.delta, account_value);

                let whale_change = WhaleChange {
                    address: change.trader_address.clone(),
                    tier,
                    coin: change.coin.clone(),
                    prev_size: change.prev_size,
                    curr_size: change.curr_size,
                    change_pct,
                    account_value,
                };

                let detected_at = Utc::now();
                let alert = crate::events::WhaleAlert {
                    priority,
                    title: format!("{:?} whale {:?} on {}", tier, change.action, change.coin),
                    description: format!(
                        "{} moved {} position from {:.4} to {:.4} (Δ {:.4}), account value ${:.0}",
                        change.trader_address, change.coin, change.prev_size, change.curr_size, change.delta, account_value
                    ),
                    detected_at,
                    expires_at: detected_at + chrono::Duration::from_std(ALERT_TTL).unwrap(),
                    changes: vec![whale_change],
                    signal_impact: None,
                };

                Ok(Some(event.derive(EventType::WhaleAlert, "whale_alert", EventPayload::WhaleAlert(alert))))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Direction, Position, PositionAction, PositionChange, TraderPositionsSnapshot};

    fn positions_event(address: &str, account_value: f64) -> StandardEvent {
        let snapshot = TraderPositionsSnapshot::new(address, account_value, 0.0, vec![]);
        StandardEvent::create(EventType::TraderPositions, "test", EventPayload::TraderPositions(snapshot), None, None)
    }

    fn change_event(address: &str, prev: f64, curr: f64) -> StandardEvent {
        let change = PositionChange { trader_address: address.into(), coin: "BTC".into(), prev_size: prev, curr_size: curr, delta: curr - prev, direction: Direction::from_size(curr), action: PositionAction::Increase };
        StandardEvent::create(EventType::PositionChange, "test", EventPayload::PositionChange(change), None, None)
    }

    #[tokio::test]
    async fn mega_whale_large_move_is_critical() {
        let proc = WhaleAlertProcessor::new("BTC");
        proc.process(&positions_event("0xabc", 20_000_000.0)).await.unwrap();
        let out = proc.process(&change_event("0xabc", 0.0, 100.0)).await.unwrap().unwrap();
        match out.payload {
            EventPayload::WhaleAlert(alert) => assert_eq!(alert.priority, AlertPriority::Critical),
            _ => panic!(),
        }
    }

    #[tokio::test]
    async fn large_tier_is_always_medium() {
        let proc = WhaleAlertProcessor::new("BTC");
        proc.process(&positions_event("0xabc", 2_000_000.0)).await.unwrap();
        let out = proc.process(&change_event("0xabc", 0.0, 100.0)).await.unwrap().unwrap();
        match out.payload {
            EventPayload::WhaleAlert(alert) => assert_eq!(alert.priority, AlertPriority::Medium),
            _ => panic!(),
        }
    }

    #[tokio::test]
    async fn identical_change_within_dedup_window_is_suppressed() {
        let proc = WhaleAlertProcessor::new("BTC");
        proc.process(&positions_event("0xabc", 20_000_000.0)).await.unwrap();
        let first = proc.process(&change_event("0xabc", 0.0, 100.0)).await.unwrap();
        assert!(first.is_some());
        let second = proc.process(&change_event("0xabc", 0.0, 100.0)).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn below_mid_threshold_emits_nothing() {
        let proc = WhaleAlertProcessor::new("BTC");
        proc.process(&positions_event("0xabc", 50_000.0)).await.unwrap();
        assert!(proc.process(&change_event("0xabc", 0.0, 100.0)).await.unwrap().is_none());
    }
}
