// =============================================================================
// WebSocket Manager — one outbound connection, multiplexed subscriptions
// =============================================================================
//
// State machine: INIT -> CONNECTING -> CONNECTED -> (disconnect) ->
// RECONNECTING -> CONNECTED | FAILED (spec §4.1). Grounded on
// examples/original_source/market-scraper/.../connectors/hyperliquid/
// collectors/manager.py (HyperliquidWSManager) for the subscribe-replay-
// on-reconnect and heartbeat-timeout behavior, and on the teacher's
// market_data/candle_buffer.rs `run_kline_stream` for the connect_async +
// split + read-loop shape.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::hyperliquid::{SubscriptionFrame, WsEnvelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone)]
pub struct WsStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub last_heartbeat: Option<Instant>,
}

/// One registered channel handler: the raw frame's `channel` tag maps to a
/// sender that forwards the frame's `data` payload to the owning collector.
struct ChannelHandler {
    frame: SubscriptionFrame,
    tx: mpsc::Sender<serde_json::Value>,
}

/// Exponential backoff with jitter: `delay = min(base*2^attempt, max) *
/// jitter`, `jitter ∈ [0.5, 1.5]` (spec §4.1).
fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = 2_f64.powi(attempt as i32);
    let capped = (base.as_secs_f64() * exp).min(max.as_secs_f64());
    let jitter = rand::thread_rng().gen_range(0.5..=1.5);
    Duration::from_secs_f64((capped * jitter).max(0.0))
}

pub struct WsManager {
    url: String,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    heartbeat_interval: Duration,

    state: RwLock<ConnectionState>,
    reconnect_attempts: AtomicU32,
    last_heartbeat: RwLock<Option<Instant>>,
    handlers: RwLock<HashMap<String, Vec<ChannelHandler>>>,
    outbound: RwLock<Option<mpsc::UnboundedSender<Message>>>,
}

impl WsManager {
    pub fn new(url: impl Into<String>, max_attempts: u32, base_delay: Duration, max_delay: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            url: url.into(),
            max_attempts,
            base_delay,
            max_delay,
            heartbeat_interval,
            state: RwLock::new(ConnectionState::Init),
            reconnect_attempts: AtomicU32::new(0),
            last_heartbeat: RwLock::new(None),
            handlers: RwLock::new(HashMap::new()),
            outbound: RwLock::new(None),
        }
    }

    pub fn status(&self) -> WsStatus {
        WsStatus {
            state: *self.state.read(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            last_heartbeat: *self.last_heartbeat.read(),
        }
    }

    /// Register a collector's channel subscription. If already connected,
    /// the subscribe frame is sent immediately; otherwise it is replayed on
    /// the next (re)connect.
    pub fn subscribe(&self, channel: &str, frame: SubscriptionFrame) -> mpsc::Receiver<serde_json::Value> {
        let (tx, rx) = mpsc::channel(256);
        self.handlers.write().entry(channel.to_string()).or_default().push(ChannelHandler { frame: frame.clone(), tx });

        if *self.state.read() == ConnectionState::Connected {
            self.send_frame(&frame);
        }
        rx
    }

    /// Remove a tracked-trader subscription (used by the leaderboard job's
    /// reconcile step — spec §4.6 step 5). Sends an unsubscribe frame if
    /// connected.
    pub fn unsubscribe(&self, channel: &str) {
        if let Some(removed) = self.handlers.write().remove(channel) {
            for h in removed {
                let unsub = SubscriptionFrame::unsubscribe(h.frame.subscription.clone());
                self.send_frame(&unsub);
            }
        }
    }

    fn send_frame(&self, frame: &SubscriptionFrame) {
        if let Some(tx) = self.outbound.read().as_ref() {
            if let Ok(text) = serde_json::to_string(frame) {
                let _ = tx.send(Message::Text(text));
            }
        }
    }

    fn replay_subscriptions(&self) {
        let handlers = self.handlers.read();
        for hs in handlers.values() {
            for h in hs {
                self.send_frame(&h.frame);
            }
        }
    }

    /// Dispatch an inbound frame to the matching channel's collector(s).
    async fn dispatch(&self, envelope: WsEnvelope) {
        *self.last_heartbeat.write() = Some(Instant::now());

        let channel = envelope.channel.clone();
        let senders: Vec<mpsc::Sender<serde_json::Value>> = {
            let handlers = self.handlers.read();
            handlers.get(&channel).map(|hs| hs.iter().map(|h| h.tx.clone()).collect()).unwrap_or_default()
        };

        for tx in senders {
            if tx.send(envelope.data.clone()).await.is_err() {
                warn!(channel = %channel, "collector channel closed, dropping frame");
            }
        }
    }

    /// Run the manager until `shutdown` resolves: connect, read loop,
    /// reconnect with backoff on failure, replay subscriptions on every
    /// successful (re)connect. Runs as a single long-lived task per spec
    /// §9's "one task per thing that reads from the outside world".
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                *self.state.write() = ConnectionState::Init;
                return;
            }

            *self.state.write() = ConnectionState::Connecting;
            info!(url = %self.url, "connecting to exchange WebSocket");

            match connect_async(&self.url).await {
                Ok((ws_stream, _resp)) => {
                    *self.state.write() = ConnectionState::Connected;
                    self.reconnect_attempts.store(0, Ordering::Relaxed);
                    *self.last_heartbeat.write() = Some(Instant::now());
                    info!("WebSocket connected");

                    let (mut write, mut read) = ws_stream.split();
                    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
                    *self.outbound.write() = Some(out_tx);

                    self.replay_subscriptions();

                    let mut ping_interval = tokio::time::interval(self.heartbeat_interval);
                    let timeout_dur = self.heartbeat_interval * 2;

                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    let _ = write.close().await;
                                    *self.state.write() = ConnectionState::Init;
                                    return;
                                }
                            }
                            Some(msg) = out_rx.recv() => {
                                if write.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            _ = ping_interval.tick() => {
                                if write.send(Message::Ping(Vec::new())).await.is_err() {
                                    break;
                                }
                                let last = self.last_heartbeat.read().unwrap_or_else(Instant::now);
                                if last.elapsed() > timeout_dur {
                                    warn!("heartbeat timeout, forcing reconnect");
                                    break;
                                }
                            }
                            frame = read.next() => {
                                match frame {
                                    Some(Ok(Message::Text(text))) => {
                                        *self.last_heartbeat.write() = Some(Instant::now());
                                        match serde_json::from_str::<WsEnvelope>(&text) {
                                            Ok(envelope) => self.dispatch(envelope).await,
                                            Err(e) => warn!(error = %e, "malformed frame, dropping"),
                                        }
                                    }
                                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                                        *self.last_heartbeat.write() = Some(Instant::now());
                                    }
                                    Some(Ok(Message::Close(_))) | None => {
                                        warn!("WebSocket closed by peer");
                                        break;
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        error!(error = %e, "WebSocket read error");
                                        break;
                                    }
                                }
                            }
                        }
                    }

                    *self.outbound.write() = None;
                }
                Err(e) => {
                    error!(error = %e, "WebSocket connect failed");
                }
            }

            if *shutdown.borrow() {
                *self.state.write() = ConnectionState::Init;
                return;
            }

            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
            if attempt > self.max_attempts {
                error!(attempts = attempt, "max reconnect attempts exceeded");
                *self.state.write() = ConnectionState::Failed;
                return;
            }

            *self.state.write() = ConnectionState::Reconnecting;
            let delay = backoff_delay(attempt - 1, self.base_delay, self.max_delay);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
            tokio::time::sleep(delay).await;
        }
    }
}
