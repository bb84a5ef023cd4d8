// =============================================================================
// InProcessBus — bounded mpsc + single worker event bus
// =============================================================================
//
// Grounded on examples/original_source/market-scraper/.../event_bus/
// memory_bus.py: a single-process pub/sub carrier with priority-ordered
// handler lists and a bounded queue between publishers and one worker task.
// Rendered in the teacher's idiom: tokio::sync::mpsc + tokio::spawn,
// parking_lot::RwLock for the handler registry (the teacher's lock of
// choice for shared mutable maps).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::events::{EventType, StandardEvent};

use super::{BusMetrics, EventBus, Handler, Subscription};

const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
const PUBLISH_BLOCK_TIMEOUT: Duration = Duration::from_millis(50);

struct HandlerEntry {
    priority: u8,
    handler: Arc<dyn Handler>,
}

struct Registry {
    by_type: HashMap<EventType, Vec<HandlerEntry>>,
    wildcard: Vec<HandlerEntry>,
}

impl Registry {
    fn new() -> Self {
        Self {
            by_type: HashMap::new(),
            wildcard: Vec::new(),
        }
    }

    /// Combined handler list for `event_type`: direct subscribers + wildcard
    /// subscribers, each group sorted ascending by priority (spec §4.3).
    fn handlers_for(&self, event_type: EventType) -> Vec<Arc<dyn Handler>> {
        let mut direct: Vec<&HandlerEntry> = self.by_type.get(&event_type).map(|v| v.iter().collect()).unwrap_or_default();
        direct.sort_by_key(|e| e.priority);

        let mut wild: Vec<&HandlerEntry> = self.wildcard.iter().collect();
        wild.sort_by_key(|e| e.priority);

        direct.into_iter().chain(wild).map(|e| e.handler.clone()).collect()
    }
}

/// In-process, single-bus-instance event bus. One bounded mpsc channel
/// feeds one worker task that looks up and invokes handlers sequentially.
pub struct InProcessBus {
    registry: Arc<RwLock<Registry>>,
    sender: RwLock<Option<mpsc::Sender<StandardEvent>>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
    connected: AtomicBool,
    drain_timeout: Duration,

    published: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
}

impl InProcessBus {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::new())),
            sender: RwLock::new(None),
            worker: Mutex::new(None),
            connected: AtomicBool::new(false),
            drain_timeout,
            published: Arc::new(AtomicU64::new(0)),
            delivered: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            errors: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl EventBus for InProcessBus {
    async fn publish(&self, event: StandardEvent) -> bool {
        let sender = self.sender.read().clone();
        let Some(sender) = sender else {
            warn!("publish called on disconnected bus");
            return false;
        };

        match tokio::time::timeout(PUBLISH_BLOCK_TIMEOUT, sender.send(event)).await {
            Ok(Ok(())) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    async fn publish_bulk(&self, events: Vec<StandardEvent>) -> usize {
        let mut count = 0;
        for event in events {
            if self.publish(event).await {
                count += 1;
            }
        }
        count
    }

    fn subscribe(&self, subscription: Subscription, handler: Arc<dyn Handler>, priority: u8) {
        let mut reg = self.registry.write();
        let entry = HandlerEntry { priority, handler };
        match subscription {
            Subscription::Type(t) => reg.by_type.entry(t).or_default().push(entry),
            Subscription::Wildcard => reg.wildcard.push(entry),
        }
    }

    fn unsubscribe(&self, subscription: Subscription, handler: &Arc<dyn Handler>) {
        let mut reg = self.registry.write();
        match subscription {
            Subscription::Type(t) => {
                if let Some(entries) = reg.by_type.get_mut(&t) {
                    entries.retain(|e| !Arc::ptr_eq(&e.handler, handler));
                }
            }
            Subscription::Wildcard => reg.wildcard.retain(|e| !Arc::ptr_eq(&e.handler, handler)),
        }
    }

    fn metrics(&self) -> BusMetrics {
        BusMetrics {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    async fn connect(&self) -> anyhow::Result<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(()); // idempotent
        }

        let (tx, mut rx) = mpsc::channel::<StandardEvent>(DEFAULT_QUEUE_CAPACITY);
        *self.sender.write() = Some(tx);

        let registry = self.registry.clone();
        let delivered = self.delivered.clone();
        let errors = self.errors.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let handlers = registry.read().handlers_for(event.event_type);
                for h in handlers {
                    // Handler failures are caught, counted, and do not stop
                    // delivery to the remaining handlers (spec §4.3); the
                    // handler stays subscribed and the event is not
                    // redelivered.
                    match h.handle(&event).await {
                        Ok(()) => {
                            delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!(error = %e, "event bus handler returned an error");
                            errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
            debug!("event bus worker exiting (queue closed)");
        });

        *self.worker.lock().await = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(()); // idempotent
        }

        // Dropping the sender closes the channel; the worker drains
        // whatever is already queued, then exits.
        *self.sender.write() = None;

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            match tokio::time::timeout(self.drain_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "event bus worker task panicked"),
                Err(_) => warn!("event bus worker did not drain within drain_timeout"),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(&self, _event: &StandardEvent) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn sample_event(event_type: EventType) -> StandardEvent {
        StandardEvent::create(event_type, "test", EventPayload::Raw(serde_json::json!({})), None, None)
    }

    #[tokio::test]
    async fn publish_to_disconnected_bus_fails() {
        let bus = InProcessBus::default();
        let published = bus.publish(sample_event(EventType::Heartbeat)).await;
        assert!(!published);
        assert_eq!(bus.metrics().dropped, 1);
    }

    #[tokio::test]
    async fn subscribed_handler_receives_published_event() {
        let bus = InProcessBus::default();
        bus.connect().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            Subscription::Type(EventType::Trade),
            Arc::new(CountingHandler(count.clone())),
            5,
        );

        assert!(bus.publish(sample_event(EventType::Trade)).await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        bus.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn wildcard_handler_receives_every_event_type() {
        let bus = InProcessBus::default();
        bus.connect().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Subscription::Wildcard, Arc::new(CountingHandler(count.clone())), 5);

        bus.publish(sample_event(EventType::Trade)).await;
        bus.publish(sample_event(EventType::Heartbeat)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
        bus.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribed_handler_stops_receiving_events() {
        let bus = InProcessBus::default();
        bus.connect().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn Handler> = Arc::new(CountingHandler(count.clone()));
        bus.subscribe(Subscription::Type(EventType::Trade), handler.clone(), 5);

        assert!(bus.publish(sample_event(EventType::Trade)).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        bus.unsubscribe(Subscription::Type(EventType::Trade), &handler);

        assert!(bus.publish(sample_event(EventType::Trade)).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        bus.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let bus = InProcessBus::default();
        bus.connect().await.unwrap();
        bus.disconnect().await.unwrap();
        bus.disconnect().await.unwrap();
    }
}
