// =============================================================================
// Processors — stateful transforms over the event stream
// =============================================================================
//
// Grounded on examples/original_source/market-scraper/.../processors/base.py
// (`Processor`): each processor subscribes to one or more event types,
// transforms/aggregates, and emits at most one derived event per input
// event. Rendered as a `Processor` trait plus a blanket `Handler` impl that
// publishes whatever `process` returns back onto the bus — mirroring the
// Python base class's `self._event_bus.publish(...)` call at the call site,
// pulled up into one place instead of repeated in every subclass.
// =============================================================================

pub mod market_data;
pub mod position_detection;
pub mod signal_aggregation;
pub mod trader_scoring;
pub mod whale_alert;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::event_bus::{EventBus, Handler};
use crate::events::StandardEvent;

/// A stateful transform over one incoming event, producing zero or one
/// derived event (spec §4.4).
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;
    async fn process(&self, event: &StandardEvent) -> anyhow::Result<Option<StandardEvent>>;
}

/// Adapts any `Processor` into an event-bus `Handler`: runs `process`, and
/// if it yields an event, publishes it back onto `bus`.
pub struct ProcessorHandler<P: Processor> {
    processor: P,
    bus: Arc<dyn EventBus>,
}

impl<P: Processor> ProcessorHandler<P> {
    pub fn new(processor: P, bus: Arc<dyn EventBus>) -> Self {
        Self { processor, bus }
    }
}

#[async_trait]
impl<P: Processor> Handler for ProcessorHandler<P> {
    async fn handle(&self, event: &StandardEvent) -> anyhow::Result<()> {
        match self.processor.process(event).await? {
            Some(derived) => {
                if !self.bus.publish(derived).await {
                    warn!(processor = self.processor.name(), "derived event dropped, bus saturated");
                }
                Ok(())
            }
            None => Ok(()),
        }
    }
}
