pub mod memory_bus;

pub use memory_bus::InProcessBus;

use async_trait::async_trait;

use crate::events::{EventType, StandardEvent};

/// A subscribed handler's event_type key. `Wildcard` receives every event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subscription {
    Type(EventType),
    Wildcard,
}

/// Handler invoked by the bus worker for a matching event. Handlers run
/// sequentially in the worker task; long-running work must be scheduled
/// elsewhere (spec §4.3).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, event: &StandardEvent) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BusMetrics {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub errors: u64,
}

/// Pub/sub carrier for StandardEvents. At-most-once delivery, prioritized
/// handler ordering per event type (spec §4.3).
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Enqueue an event; returns false if the bus is saturated (increments
    /// `dropped`).
    async fn publish(&self, event: StandardEvent) -> bool;

    /// Efficient batch path; returns the count actually enqueued.
    async fn publish_bulk(&self, events: Vec<StandardEvent>) -> usize;

    /// Register `handler` for `subscription`; handlers for a given type run
    /// in ascending `priority` order (lower runs first).
    fn subscribe(&self, subscription: Subscription, handler: std::sync::Arc<dyn Handler>, priority: u8);

    /// Remove `handler` from `subscription`'s list, identified by pointer
    /// identity (spec §4.3's `Unsubscribe(event_type, handler)`). A no-op if
    /// `handler` was never subscribed to it.
    fn unsubscribe(&self, subscription: Subscription, handler: &std::sync::Arc<dyn Handler>);

    fn metrics(&self) -> BusMetrics;

    /// Idempotent connect/disconnect lifecycle (spec §4.3's scoped
    /// acquisition pattern).
    async fn connect(&self) -> anyhow::Result<()>;
    async fn disconnect(&self) -> anyhow::Result<()>;
}

/// RAII-ish helper that connects a bus on construction and disconnects on
/// drop via an explicit `close()` call — disconnect is idempotent so this
/// is a convenience, not a hard guarantee (async Drop doesn't exist).
pub struct BusGuard<'a> {
    bus: &'a dyn EventBus,
}

impl<'a> BusGuard<'a> {
    pub async fn connect(bus: &'a dyn EventBus) -> anyhow::Result<Self> {
        bus.connect().await?;
        Ok(Self { bus })
    }

    pub async fn close(self) -> anyhow::Result<()> {
        self.bus.disconnect().await
    }
}
