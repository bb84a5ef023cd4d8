// =============================================================================
// SignalAggregationProcessor — TraderPositions + ScoredTraders -> Signal
// =============================================================================
//
// Grounded on examples/original_source/hyperliquid/hyperliquid-system/src/
// strategies/signal_generation.py (`generate_aggregated_signal`): each
// tracked trader contributes `weight = score/100` to a long or short
// bucket depending on their target-symbol position sign; `long_bias`/
// `short_bias` are the score-weighted shares, `net_bias = long_bias -
// short_bias` drives the recommendation (spec §4.4). The Python version
// recomputes on a fixed timer over the full trader/score maps; this
// processor recomputes reactively whenever a position or score update
// arrives, since the event-driven architecture has no timer loop of its
// own at this layer (scheduling lives in `scheduler.rs`).
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::events::{AggregatedSignal, EventPayload, EventType, Recommendation, StandardEvent};

use super::Processor;

const DEFAULT_TRADER_SCORE: f64 = 50.0;
const STALE_PRICE_SECS: u64 = 300;
const NET_BIAS_EMIT_DELTA: f64 = 0.1;
const POSITION_TTL: Duration = Duration::from_secs(24 * 3600);
const MAX_TRACKED_POSITIONS: usize = 10_000;

struct State {
    positions: HashMap<String, f64>,
    position_seen_at: HashMap<String, Instant>,
    scores: HashMap<String, f64>,
    last_price: Option<(f64, Instant)>,
    last_emitted: Option<(Recommendation, f64)>,
}

impl State {
    /// Drops positions untouched for 24h, then — if still over the cap —
    /// evicts the least-recently-updated entries until back under it.
    fn evict_stale_and_overflow(&mut self) {
        let now = Instant::now();
        self.position_seen_at.retain(|address, seen_at| {
            let fresh = now.duration_since(*seen_at) <= POSITION_TTL;
            if !fresh {
                self.positions.remove(address);
            }
            fresh
        });

        if self.positions.len() <= MAX_TRACKED_POSITIONS {
            return;
        }
        let mut by_age: Vec<(String, Instant)> =
            self.position_seen_at.iter().map(|(a, t)| (a.clone(), *t)).collect();
        by_age.sort_by_key(|(_, t)| *t);
        let overflow = self.positions.len() - MAX_TRACKED_POSITIONS;
        for (address, _) in by_age.into_iter().take(overflow) {
            self.positions.remove(&address);
            self.position_seen_at.remove(&address);
        }
    }
}

pub struct SignalAggregationProcessor {
    target_symbol: String,
    state: Mutex<State>,
}

impl SignalAggregationProcessor {
    pub fn new(target_symbol: impl Into<String>) -> Self {
        Self {
            target_symbol: target_symbol.into(),
            state: Mutex::new(State {
                positions: HashMap::new(),
                position_seen_at: HashMap::new(),
                scores: HashMap::new(),
                last_price: None,
                last_emitted: None,
            }),
        }
    }

    fn recommendation(net_bias: f64) -> Recommendation {
        if net_bias > 0.2 {
            Recommendation::Buy
        } else if net_bias < -0.2 {
            Recommendation::Sell
        } else {
            Recommendation::Neutral
        }
    }

    fn compute(&self, state: &State) -> AggregatedSignal {
        let mut long_score = 0.0;
        let mut short_score = 0.0;
        let mut total_weight = 0.0;
        let mut traders_long = 0u32;
        let mut traders_short = 0u32;
        let mut traders_flat = 0u32;
        let mut net_exposure = 0.0;

        for (address, size) in &state.positions {
            let score = state.scores.get(address).copied().unwrap_or(DEFAULT_TRADER_SCORE);
            let weight = score / 100.0;
            total_weight += weight;
            net_exposure += size * weight;

            if *size > 0.0 {
                long_score += weight;
                traders_long += 1;
            } else if *size < 0.0 {
                short_score += weight;
                traders_short += 1;
            } else {
                traders_flat += 1;
            }
        }

        let long_bias = if total_weight > 0.0 { long_score / total_weight } else { 0.0 };
        let short_bias = if total_weight > 0.0 { short_score / total_weight } else { 0.0 };
        let net_bias = long_bias - short_bias;

        let price_at_signal = state.last_price.and_then(|(price, at)| {
            if at.elapsed() <= Duration::from_secs(STALE_PRICE_SECS) {
                Some(price)
            } else {
                None
            }
        });

        AggregatedSignal {
            symbol: self.target_symbol.clone(),
            recommendation: Self::recommendation(net_bias),
            confidence: (net_bias.abs() * 2.0).min(1.0),
            long_bias,
            short_bias,
            net_bias,
            traders_long,
            traders_short,
            traders_flat,
            net_exposure,
            price_at_signal,
        }
    }

    fn should_emit(last: Option<(Recommendation, f64)>, signal: &AggregatedSignal) -> bool {
        match last {
            None => true,
            Some((rec, net_bias)) => rec != signal.recommendation || (signal.net_bias - net_bias).abs() >= NET_BIAS_EMIT_DELTA,
        }
    }
}

#[async_trait]
impl Processor for SignalAggregationProcessor {
    fn name(&self) -> &'static str {
        "signal_aggregation"
    }

    async fn process(&self, event: &StandardEvent) -> anyhow::Result<Option<StandardEvent>> {
        let mut state = self.state.lock();

        match &event.payload {
            EventPayload::TraderPositions(snapshot) => {
                let size = snapshot.positions.iter().find(|p| p.coin == self.target_symbol).map(|p| p.size).unwrap_or(0.0);
                state.positions.insert(snapshot.trader_address.clone(), size);
                state.position_seen_at.insert(snapshot.trader_address.clone(), Instant::now());
                state.evict_stale_and_overflow();
            }
            EventPayload::ScoredTraders(traders) => {
                state.scores = traders.iter().map(|t| (t.trader_address.clone(), t.score)).collect();
            }
            EventPayload::Raw(raw) if event.event_type == EventType::Ticker => {
                if raw.get("symbol").and_then(|s| s.as_str()) == Some(self.target_symbol.as_str()) {
                    if let Some(price) = raw.get("price").and_then(|p| p.as_f64()) {
                        state.last_price = Some((price, Instant::now()));
                    }
                }
                return Ok(None);
            }
            _ => return Ok(None),
        }

        if state.positions.is_empty() {
            return Ok(None);
        }

        let signal = self.compute(&state);
        if !Self::should_emit(state.last_emitted, &signal) {
            return Ok(None);
        }
        state.last_emitted = Some((signal.recommendation, signal.net_bias));
        drop(state);

        Ok(Some(event.derive(EventType::Signal, "signal_aggregation", EventPayload::Signal(signal))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventPayload, Position, ScoredTrader, TraderPositionsSnapshot, WindowPerformances};

    fn position_event(address: &str, size: f64) -> StandardEvent {
        let positions = vec![Position { coin: "BTC".into(), size, entry_price: 50_000.0, position_value: size * 50_000.0, unrealized_pnl: 0.0, leverage: 5.0, liquidation_price: 40_000.0, margin_used: 1000.0 }];
        let snapshot = TraderPositionsSnapshot::new(address, 1_000_000.0, 1000.0, positions);
        StandardEvent::create(EventType::TraderPositions, "test", EventPayload::TraderPositions(snapshot), None, None)
    }

    fn scores_event(scores: Vec<(&str, f64)>) -> StandardEvent {
        let traders = scores
            .into_iter()
            .map(|(addr, score)| ScoredTrader { trader_address: addr.into(), score, tags: vec![], account_value: 1_000_000.0, window_performances: WindowPerformances::default() })
            .collect();
        StandardEvent::create(EventType::ScoredTraders, "test", EventPayload::ScoredTraders(traders), None, None)
    }

    #[tokio::test]
    async fn first_signal_always_emits() {
        let proc = SignalAggregationProcessor::new("BTC");
        proc.process(&scores_event(vec![("0xabc", 100.0)])).await.unwrap();
        let out = proc.process(&position_event("0xabc", 1.0)).await.unwrap();
        assert!(out.is_some());
    }

    #[tokio::test]
    async fn small_net_bias_change_is_suppressed() {
        let proc = SignalAggregationProcessor::new("BTC");
        proc.process(&scores_event(vec![("0xabc", 100.0), ("0xdef", 100.0)])).await.unwrap();
        proc.process(&position_event("0xabc", 1.0)).await.unwrap();
        proc.process(&position_event("0xdef", -1.0)).await.unwrap();
        // net_bias is now 0 (one long, one short, equal weight). A tiny
        // nudge that keeps recommendation NEUTRAL and |delta| < 0.1 should
        // not re-emit.
        let out = proc.process(&position_event("0xdef", -1.0)).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn stale_positions_are_evicted_after_ttl() {
        let proc = SignalAggregationProcessor::new("BTC");
        proc.process(&position_event("0xabc", 1.0)).await.unwrap();
        {
            let mut state = proc.state.lock();
            let stale = Instant::now() - Duration::from_secs(25 * 3600);
            state.position_seen_at.insert("0xabc".to_string(), stale);
        }
        proc.process(&position_event("0xdef", -1.0)).await.unwrap();
        let state = proc.state.lock();
        assert!(!state.positions.contains_key("0xabc"));
        assert!(state.positions.contains_key("0xdef"));
    }

    #[tokio::test]
    async fn recommendation_flip_forces_emit() {
        let proc = SignalAggregationProcessor::new("BTC");
        proc.process(&scores_event(vec![("0xabc", 100.0)])).await.unwrap();
        proc.process(&position_event("0xabc", -1.0)).await.unwrap(); // SELL, emits
        let out = proc.process(&position_event("0xabc", 1.0)).await.unwrap(); // flips to BUY
        assert!(out.is_some());
    }
}
