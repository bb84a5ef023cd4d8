// =============================================================================
// Collectors — buffered batch publication of parsed WebSocket frames
// =============================================================================
//
// Grounded on examples/original_source/market-scraper/.../connectors/
// hyperliquid/collectors/base.py (`BaseCollector`): every concrete collector
// receives raw frames, turns them into zero or more `StandardEvent`s, and
// buffers them for batched publication rather than publishing one event per
// message. Rendered in the teacher's idiom (tokio::spawn flush loop,
// parking_lot::Mutex for the buffer, AtomicU64 metrics counters — see
// market_data/candle_buffer.rs and binance/rate_limit.rs for the teacher's
// counter style).
// =============================================================================

pub mod all_mids;
pub mod candles;
pub mod orderbook;
pub mod trader_orders;
pub mod trader_positions;
pub mod trades;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event_bus::EventBus;
use crate::events::StandardEvent;

#[derive(Debug, Default, Clone, Copy)]
pub struct CollectorMetrics {
    pub messages_received: u64,
    pub messages_processed: u64,
    pub messages_filtered: u64,
    pub events_emitted: u64,
    pub buffer_size: u64,
}

/// Shared buffering + flush-on-timer-or-size behavior for every collector
/// (spec §4.2: `buffer_flush_interval_s` default 5, `buffer_max_size` default
/// 100). Concrete collectors own one of these and push events into it as
/// `handle_message` produces them.
pub struct BufferedFlusher {
    name: &'static str,
    bus: Arc<dyn EventBus>,
    buffer: Mutex<Vec<StandardEvent>>,
    flush_max_size: usize,

    messages_received: AtomicU64,
    messages_processed: AtomicU64,
    messages_filtered: AtomicU64,
    events_emitted: AtomicU64,
}

impl BufferedFlusher {
    pub fn new(name: &'static str, bus: Arc<dyn EventBus>, flush_max_size: usize) -> Self {
        Self {
            name,
            bus,
            buffer: Mutex::new(Vec::with_capacity(flush_max_size)),
            flush_max_size,
            messages_received: AtomicU64::new(0),
            messages_processed: AtomicU64::new(0),
            messages_filtered: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
        }
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.messages_filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// Push events produced from one message into the buffer, flushing
    /// immediately if the buffer has reached `flush_max_size`.
    pub async fn push(&self, events: Vec<StandardEvent>) {
        if events.is_empty() {
            self.record_filtered();
            return;
        }
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.events_emitted.fetch_add(events.len() as u64, Ordering::Relaxed);

        let should_flush = {
            let mut buf = self.buffer.lock();
            buf.extend(events);
            buf.len() >= self.flush_max_size
        };
        if should_flush {
            self.flush().await;
        }
    }

    pub async fn flush(&self) {
        let batch = {
            let mut buf = self.buffer.lock();
            if buf.is_empty() {
                return;
            }
            std::mem::take(&mut *buf)
        };
        let n = batch.len();
        let published = self.bus.publish_bulk(batch).await;
        if published != n {
            warn!(collector = self.name, dropped = n - published, "some buffered events were dropped on flush");
        } else {
            debug!(collector = self.name, count = published, "buffer flushed");
        }
    }

    pub fn metrics(&self) -> CollectorMetrics {
        CollectorMetrics {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_filtered: self.messages_filtered.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            buffer_size: self.buffer.lock().len() as u64,
        }
    }

    /// Spawn the periodic flush timer loop. Runs until `shutdown` fires,
    /// flushing any remaining buffered events first.
    pub fn spawn_flush_loop(self: Arc<Self>, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.flush().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            self.flush().await;
                            return;
                        }
                    }
                }
            }
        })
    }
}

/// Normalize a Hyperliquid coin tag by stripping the `@`-index prefix some
/// channels use, and compare against the configured target symbol (spec
/// §4.2 "universal symbol filter"; `base.py::_should_process_symbol`).
pub fn matches_symbol(coin: &str, target: &str) -> bool {
    coin.trim_start_matches('@') == target
}

/// Drive raw frames from a collector's `mpsc::Receiver` into `handler`,
/// recording receive/filter metrics uniformly across collectors.
pub async fn drive<F, Fut>(mut rx: mpsc::Receiver<serde_json::Value>, flusher: Arc<BufferedFlusher>, mut handler: F)
where
    F: FnMut(serde_json::Value) -> Fut,
    Fut: std::future::Future<Output = Vec<StandardEvent>>,
{
    while let Some(raw) = rx.recv().await {
        flusher.record_received();
        let events = handler(raw).await;
        flusher.push(events).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_symbol_strips_at_prefix() {
        assert!(matches_symbol("@BTC", "BTC"));
        assert!(matches_symbol("BTC", "BTC"));
        assert!(!matches_symbol("ETH", "BTC"));
    }
}
