// =============================================================================
// PositionDetectionProcessor — TraderPositions -> PositionChange
// =============================================================================
//
// Grounded on examples/original_source/market-scraper/.../processors/
// position_detection.py (`detect_position_changes`/`_get_direction`/
// `_get_action`): diffs the current snapshot's target-symbol position
// against the previously observed one for that trader and classifies the
// change. A trader absent from `positions` is treated as flat (size 0) —
// the "absence=flat" resolution from SPEC_FULL.md's original_source
// supplement, since Hyperliquid's `assetPositions` omits closed positions
// entirely rather than sending a zero-size entry.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::events::{Direction, EventPayload, EventType, Position, PositionAction, PositionChange, StandardEvent};

use super::Processor;

const SIZE_TOLERANCE: f64 = 1e-12;

fn classify_action(prev_size: f64, curr_size: f64) -> PositionAction {
    let prev_zero = prev_size.abs() < SIZE_TOLERANCE;
    let curr_zero = curr_size.abs() < SIZE_TOLERANCE;
    if prev_zero && !curr_zero {
        PositionAction::Open
    } else if !prev_zero && curr_zero {
        PositionAction::Close
    } else if curr_size.abs() > prev_size.abs() {
        PositionAction::Increase
    } else if curr_size.abs() < prev_size.abs() {
        PositionAction::Decrease
    } else {
        PositionAction::Modify
    }
}

pub struct PositionDetectionProcessor {
    target_symbol: String,
    prev_size: Mutex<HashMap<String, f64>>,
}

impl PositionDetectionProcessor {
    pub fn new(target_symbol: impl Into<String>) -> Self {
        Self { target_symbol: target_symbol.into(), prev_size: Mutex::new(HashMap::new()) }
    }

    fn find_target(positions: &[Position], target: &str) -> Option<&Position> {
        positions.iter().find(|p| p.coin == target)
    }
}

#[async_trait]
impl Processor for PositionDetectionProcessor {
    fn name(&self) -> &'static str {
        "position_detection"
    }

    async fn process(&self, event: &StandardEvent) -> anyhow::Result<Option<StandardEvent>> {
        let EventPayload::TraderPositions(snapshot) = &event.payload else { return Ok(None) };

        let curr_pos = Self::find_target(&snapshot.positions, &self.target_symbol);
        let curr_size = curr_pos.map(|p| p.size).unwrap_or(0.0);

        let mut prev_map = self.prev_size.lock();
        let prev_size = prev_map.get(&snapshot.trader_address).copied().unwrap_or(0.0);
        prev_map.insert(snapshot.trader_address.clone(), curr_size);
        drop(prev_map);

        if (curr_size - prev_size).abs() < SIZE_TOLERANCE {
            return Ok(None);
        }

        let change = PositionChange {
            trader_address: snapshot.trader_address.clone(),
            coin: self.target_symbol.clone(),
            prev_size,
            curr_size,
            delta: curr_size - prev_size,
            direction: Direction::from_size(curr_size),
            action: classify_action(prev_size, curr_size),
        };

        Ok(Some(event.derive(EventType::PositionChange, "position_detection", EventPayload::PositionChange(change))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TraderPositionsSnapshot;

    fn positions_event(address: &str, size: f64) -> StandardEvent {
        let positions = if size == 0.0 {
            vec![]
        } else {
            vec![Position { coin: "BTC".into(), size, entry_price: 50_000.0, position_value: size * 50_000.0, unrealized_pnl: 0.0, leverage: 5.0, liquidation_price: 40_000.0, margin_used: 1000.0 }]
        };
        let snapshot = TraderPositionsSnapshot::new(address, 1_000_000.0, 1000.0, positions);
        StandardEvent::create(EventType::TraderPositions, "test", EventPayload::TraderPositions(snapshot), None, None)
    }

    #[tokio::test]
    async fn first_nonzero_position_is_open() {
        let proc = PositionDetectionProcessor::new("BTC");
        let out = proc.process(&positions_event("0xabc", 1.5)).await.unwrap().unwrap();
        match out.payload {
            EventPayload::PositionChange(c) => assert_eq!(c.action, PositionAction::Open),
            _ => panic!("expected position change"),
        }
    }

    #[tokio::test]
    async fn increase_then_decrease_classified_correctly() {
        let proc = PositionDetectionProcessor::new("BTC");
        proc.process(&positions_event("0xabc", 1.0)).await.unwrap();
        let inc = proc.process(&positions_event("0xabc", 2.0)).await.unwrap().unwrap();
        match inc.payload {
            EventPayload::PositionChange(c) => assert_eq!(c.action, PositionAction::Increase),
            _ => panic!(),
        }
        let dec = proc.process(&positions_event("0xabc", 0.5)).await.unwrap().unwrap();
        match dec.payload {
            EventPayload::PositionChange(c) => assert_eq!(c.action, PositionAction::Decrease),
            _ => panic!(),
        }
    }

    #[tokio::test]
    async fn absence_of_position_is_treated_as_flat_close() {
        let proc = PositionDetectionProcessor::new("BTC");
        proc.process(&positions_event("0xabc", 1.0)).await.unwrap();
        let closed = proc.process(&positions_event("0xabc", 0.0)).await.unwrap().unwrap();
        match closed.payload {
            EventPayload::PositionChange(c) => assert_eq!(c.action, PositionAction::Close),
            _ => panic!(),
        }
    }

    #[tokio::test]
    async fn unchanged_size_emits_nothing() {
        let proc = PositionDetectionProcessor::new("BTC");
        proc.process(&positions_event("0xabc", 1.0)).await.unwrap();
        assert!(proc.process(&positions_event("0xabc", 1.0)).await.unwrap().is_none());
    }
}
