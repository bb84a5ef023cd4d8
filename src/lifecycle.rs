// =============================================================================
// Pipeline orchestrator — startup/shutdown ordering (spec §2 / §9)
// =============================================================================
//
// Grounded on examples/original_source/market-scraper/src/market_scraper/
// app.py's component wiring (`repository -> event_bus -> processors ->
// collectors -> scheduler`, torn down in reverse) and on the teacher's
// `main.rs`/`app_state.rs` split between "build everything" and "run until
// signalled". `Pipeline::start` is the dependency-ordered bring-up;
// `Pipeline::shutdown` drains buffers within `drain_timeout_s` and stops the
// scheduler within `shutdown_grace_s` before disconnecting the bus last.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::archival::Archiver;
use crate::backfill::Backfiller;
use crate::collectors::all_mids::AllMidsCollector;
use crate::collectors::candles::CandlesCollector;
use crate::collectors::orderbook::OrderbookCollector;
use crate::collectors::trader_orders::TraderOrdersCollector;
use crate::collectors::trader_positions::TraderPositionsCollector;
use crate::collectors::trades::TradesCollector;
use crate::collectors::{drive, BufferedFlusher};
use crate::config::RuntimeConfig;
use crate::event_bus::{EventBus, InProcessBus, Subscription};
use crate::events::{CandleInterval, EventType};
use crate::hyperliquid::{HyperliquidClient, SubscriptionFrame, SubscriptionSpec};
use crate::jobs::daily_stats::DailyStatsJob;
use crate::jobs::funding::FundingJob;
use crate::jobs::leaderboard::LeaderboardJob;
use crate::jobs::onchain::FearGreedProvider;
use crate::jobs::rest_fallback::{CandlesRestJob, OrderbookRestJob, TradesRestJob};
use crate::jobs::ticker::TickerJob;
use crate::jobs::AuxHttpProvider;
use crate::persistence::PersistenceHandler;
use crate::processors::market_data::MarketDataProcessor;
use crate::processors::position_detection::PositionDetectionProcessor;
use crate::processors::signal_aggregation::SignalAggregationProcessor;
use crate::processors::trader_scoring::TraderScoringProcessor;
use crate::processors::whale_alert::WhaleAlertProcessor;
use crate::processors::ProcessorHandler;
use crate::rate_limit::RateLimitManager;
use crate::repository::{MemoryRepository, Repository};
use crate::scheduler::Scheduler;
use crate::ws_manager::WsManager;

const ONCHAIN_POLL_INTERVAL: Duration = Duration::from_secs(86_400);

/// Every long-lived component the orchestrator brings up, held so
/// `shutdown` can tear them down in reverse order.
pub struct Pipeline {
    config: RuntimeConfig,
    repository: Arc<dyn Repository>,
    bus: Arc<dyn EventBus>,
    rate_limiter: Arc<RateLimitManager>,
    ws: Arc<WsManager>,
    ws_shutdown_tx: watch::Sender<bool>,
    ws_task: tokio::task::JoinHandle<()>,
    flush_shutdown_tx: watch::Sender<bool>,
    flush_handles: Vec<tokio::task::JoinHandle<()>>,
    scheduler: Scheduler,
}

impl Pipeline {
    /// Bring every component up in dependency order: repository, event bus,
    /// processors (registered as bus handlers before any collector can
    /// publish), collectors (subscribing the WS manager and starting their
    /// buffer flush loops), then the scheduled HTTP jobs. Runs the
    /// candle backfill once collectors are live but before returning.
    pub async fn start(config: RuntimeConfig) -> anyhow::Result<Self> {
        let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());

        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new(Duration::from_secs(config.drain_timeout_s)));
        bus.connect().await?;

        bus.subscribe(Subscription::Wildcard, Arc::new(PersistenceHandler::new(repository.clone())), 255);
        bus.subscribe(Subscription::Type(EventType::Trade), Arc::new(ProcessorHandler::new(MarketDataProcessor, bus.clone())), 0);
        bus.subscribe(Subscription::Type(EventType::OrderBook), Arc::new(ProcessorHandler::new(MarketDataProcessor, bus.clone())), 0);
        bus.subscribe(
            Subscription::Type(EventType::TraderPositions),
            Arc::new(ProcessorHandler::new(PositionDetectionProcessor::new(config.target_symbol.clone()), bus.clone())),
            0,
        );

        // `WhaleAlertProcessor` needs `TraderPositions` (to populate its
        // account-value map) and `PositionChange` (to detect the move
        // itself) — both must reach the SAME instance, so it's built once
        // and subscribed to both event types.
        let whale_alert_handler = Arc::new(ProcessorHandler::new(WhaleAlertProcessor::new(config.target_symbol.clone()), bus.clone()));
        bus.subscribe(Subscription::Type(EventType::TraderPositions), whale_alert_handler.clone(), 1);
        bus.subscribe(Subscription::Type(EventType::PositionChange), whale_alert_handler, 0);

        // `SignalAggregationProcessor` likewise needs `TraderPositions`
        // (position updates), `ScoredTraders` (score weights), and `Ticker`
        // (staleness-bounded price) routed to one shared instance.
        let signal_aggregation_handler = Arc::new(ProcessorHandler::new(SignalAggregationProcessor::new(config.target_symbol.clone()), bus.clone()));
        bus.subscribe(Subscription::Type(EventType::TraderPositions), signal_aggregation_handler.clone(), 2);
        bus.subscribe(Subscription::Type(EventType::ScoredTraders), signal_aggregation_handler.clone(), 0);
        bus.subscribe(Subscription::Type(EventType::Ticker), signal_aggregation_handler, 0);

        let client = HyperliquidClient::new(config.exchange_http_url.clone());
        let rate_limiter = Arc::new(RateLimitManager::default());
        let ws = Arc::new(WsManager::new(
            config.exchange_ws_url.clone(),
            config.reconnect_max_attempts,
            Duration::from_secs_f64(config.reconnect_base_delay_s),
            Duration::from_secs_f64(config.reconnect_max_delay_s),
            Duration::from_secs(config.heartbeat_interval_s),
        ));

        let (ws_shutdown_tx, ws_shutdown_rx) = watch::channel(false);
        let ws_task = tokio::spawn(ws.clone().run(ws_shutdown_rx));

        let (flush_shutdown_tx, flush_shutdown_rx) = watch::channel(false);
        let flush_interval = Duration::from_secs(config.buffer_flush_interval_s);
        let mut flush_handles = Vec::new();

        let intervals: Vec<CandleInterval> =
            config.candle_intervals.iter().filter_map(|raw| CandleInterval::ALL.iter().copied().find(|i| i.as_str() == raw)).collect();

        if config.ws_available {
            Self::spawn_orderbook_collector(&config, &bus, &ws, flush_interval, flush_shutdown_rx.clone(), &mut flush_handles);
            Self::spawn_trades_collector(&config, &bus, &ws, flush_interval, flush_shutdown_rx.clone(), &mut flush_handles);
            Self::spawn_candles_collector(&config, &bus, &ws, &intervals, flush_interval, flush_shutdown_rx.clone(), &mut flush_handles);
        }
        Self::spawn_all_mids_collector(&config, &bus, &ws, flush_interval, flush_shutdown_rx.clone(), &mut flush_handles);

        let positions = Arc::new(TraderPositionsCollector::new(ws.clone()));
        let orders = Arc::new(TraderOrdersCollector::new(config.target_symbol.clone(), ws.clone()));

        let scheduler = Scheduler::new(Duration::from_secs(60), Duration::from_secs(config.shutdown_grace_s));

        Self::schedule_jobs(&config, &scheduler, &client, &bus, &rate_limiter, &repository, &intervals, positions, orders);

        let backfiller = Backfiller::new(client.clone(), repository.clone());
        let symbol = config.target_symbol.clone();
        let backfill_config = config.backfill.clone();
        tokio::spawn(async move { backfiller.run(&symbol, &backfill_config).await });

        info!(symbol = %config.target_symbol, "pipeline started");

        Ok(Self { config, repository, bus, rate_limiter, ws, ws_shutdown_tx, ws_task, flush_shutdown_tx, flush_handles, scheduler })
    }

    fn spawn_all_mids_collector(
        config: &RuntimeConfig,
        bus: &Arc<dyn EventBus>,
        ws: &Arc<WsManager>,
        flush_interval: Duration,
        flush_shutdown_rx: watch::Receiver<bool>,
        flush_handles: &mut Vec<tokio::task::JoinHandle<()>>,
    ) {
        let flusher = Arc::new(BufferedFlusher::new("all_mids", bus.clone(), config.buffer_max_size));
        flush_handles.push(flusher.clone().spawn_flush_loop(flush_interval, flush_shutdown_rx));

        let collector = Arc::new(AllMidsCollector::new(config.target_symbol.clone()));
        let rx = ws.subscribe("allMids", SubscriptionFrame::subscribe(SubscriptionSpec::all_mids()));
        tokio::spawn(drive(rx, flusher, move |raw| {
            let collector = collector.clone();
            async move { collector.handle_message(serde_json::json!({ "data": raw })) }
        }));
    }

    fn spawn_orderbook_collector(
        config: &RuntimeConfig,
        bus: &Arc<dyn EventBus>,
        ws: &Arc<WsManager>,
        flush_interval: Duration,
        flush_shutdown_rx: watch::Receiver<bool>,
        flush_handles: &mut Vec<tokio::task::JoinHandle<()>>,
    ) {
        let flusher = Arc::new(BufferedFlusher::new("orderbook", bus.clone(), config.buffer_max_size));
        flush_handles.push(flusher.clone().spawn_flush_loop(flush_interval, flush_shutdown_rx));

        let collector = Arc::new(OrderbookCollector::new(
            config.target_symbol.clone(),
            config.orderbook_price_change_pct,
            Duration::from_secs(config.orderbook_max_save_interval_s),
        ));
        let rx = ws.subscribe("l2Book", SubscriptionFrame::subscribe(SubscriptionSpec::l2_book(config.target_symbol.clone())));
        tokio::spawn(drive(rx, flusher, move |raw| {
            let collector = collector.clone();
            async move { collector.handle_message(serde_json::json!({ "data": raw })) }
        }));
    }

    fn spawn_trades_collector(
        config: &RuntimeConfig,
        bus: &Arc<dyn EventBus>,
        ws: &Arc<WsManager>,
        flush_interval: Duration,
        flush_shutdown_rx: watch::Receiver<bool>,
        flush_handles: &mut Vec<tokio::task::JoinHandle<()>>,
    ) {
        let flusher = Arc::new(BufferedFlusher::new("trades", bus.clone(), config.buffer_max_size));
        flush_handles.push(flusher.clone().spawn_flush_loop(flush_interval, flush_shutdown_rx));

        let collector = Arc::new(TradesCollector::new(config.target_symbol.clone(), config.trade_min_value_usd));
        let rx = ws.subscribe("trades", SubscriptionFrame::subscribe(SubscriptionSpec::trades(config.target_symbol.clone())));
        tokio::spawn(drive(rx, flusher, move |raw| {
            let collector = collector.clone();
            async move { collector.handle_message(serde_json::json!({ "data": raw })) }
        }));
    }

    fn spawn_candles_collector(
        config: &RuntimeConfig,
        bus: &Arc<dyn EventBus>,
        ws: &Arc<WsManager>,
        intervals: &[CandleInterval],
        flush_interval: Duration,
        flush_shutdown_rx: watch::Receiver<bool>,
        flush_handles: &mut Vec<tokio::task::JoinHandle<()>>,
    ) {
        let flusher = Arc::new(BufferedFlusher::new("candles", bus.clone(), config.buffer_max_size));
        flush_handles.push(flusher.clone().spawn_flush_loop(flush_interval, flush_shutdown_rx));

        let collector = Arc::new(CandlesCollector::new(config.target_symbol.clone()));
        for interval in intervals {
            let channel = format!("candle:{}", interval.as_str());
            let rx = ws.subscribe(&channel, SubscriptionFrame::subscribe(SubscriptionSpec::candle(config.target_symbol.clone(), interval.as_str())));
            let collector = collector.clone();
            let flusher = flusher.clone();
            tokio::spawn(drive(rx, flusher, move |raw| {
                let collector = collector.clone();
                async move { collector.handle_message(serde_json::json!({ "data": raw })) }
            }));
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn schedule_jobs(
        config: &RuntimeConfig,
        scheduler: &Scheduler,
        client: &HyperliquidClient,
        bus: &Arc<dyn EventBus>,
        rate_limiter: &Arc<RateLimitManager>,
        repository: &Arc<dyn Repository>,
        intervals: &[CandleInterval],
        positions: Arc<TraderPositionsCollector>,
        orders: Arc<TraderOrdersCollector>,
    ) {
        let ticker = Arc::new(TickerJob::new(client.clone(), bus.clone(), rate_limiter.clone(), config.target_symbol.clone()));
        scheduler.schedule("update_ticker", Duration::from_secs(60), move || {
            let job = ticker.clone();
            async move { job.run().await }
        });

        let funding = Arc::new(FundingJob::new(client.clone(), bus.clone(), rate_limiter.clone(), config.target_symbol.clone()));
        scheduler.schedule("collect_funding", Duration::from_secs(8 * 3600), move || {
            let job = funding.clone();
            async move { job.run().await }
        });

        let daily_stats = Arc::new(DailyStatsJob::new(client.clone(), bus.clone(), rate_limiter.clone(), config.target_symbol.clone()));
        scheduler.schedule("collect_daily_stats", Duration::from_secs(86_400), move || {
            let job = daily_stats.clone();
            async move { job.run().await }
        });

        let onchain = Arc::new(FearGreedProvider::new());
        let onchain_bus = bus.clone();
        scheduler.schedule("collect_onchain_metrics", ONCHAIN_POLL_INTERVAL, move || {
            let onchain = onchain.clone();
            let bus = onchain_bus.clone();
            async move {
                match onchain.fetch().await {
                    Ok(event) => {
                        if !bus.publish(event).await {
                            warn!("collect_onchain_metrics: bus saturated, event dropped");
                        }
                    }
                    Err(e) => warn!(error = %e, "collect_onchain_metrics: fetch failed"),
                }
            }
        });

        let leaderboard = Arc::new(LeaderboardJob::new(
            client.clone(),
            bus.clone(),
            rate_limiter.clone(),
            repository.clone(),
            config.min_score,
            config.max_tracked_count,
            config.min_account_value,
            positions,
            orders,
        ));
        scheduler.schedule("select_traders", Duration::from_secs(config.trader_selection_interval_s), move || {
            let job = leaderboard.clone();
            async move { job.run().await }
        });

        let archiver = Arc::new(Archiver::new(repository.clone(), config.archive_base_path.clone(), config.archive_batch_size, config.compression_level));
        let retention = config.retention.clone();
        let max_archive_age_days = config.max_archive_age_days;
        scheduler.schedule("archive_collections", Duration::from_secs(config.archive_interval_s), move || {
            let archiver = archiver.clone();
            let retention = retention.clone();
            async move {
                let results = archiver.run(&retention).await;
                for result in &results {
                    if let Some(err) = &result.error {
                        warn!(collection = %result.collection, error = %err, "archive_collections: collection failed");
                    }
                }
                if let Err(e) = archiver.cleanup(max_archive_age_days).await {
                    warn!(error = %e, "archive_collections: cleanup sweep failed");
                }
            }
        });

        if !config.ws_available {
            let orderbook_job = Arc::new(OrderbookRestJob::new(
                client.clone(),
                bus.clone(),
                rate_limiter.clone(),
                config.target_symbol.clone(),
                crate::collectors::orderbook::OrderbookCollector::new(
                    config.target_symbol.clone(),
                    config.orderbook_price_change_pct,
                    Duration::from_secs(config.orderbook_max_save_interval_s),
                ),
            ));
            scheduler.schedule("collect_orderbook_rest", Duration::from_secs(5), move || {
                let job = orderbook_job.clone();
                async move { job.run().await }
            });

            let trades_job = Arc::new(TradesRestJob::new(
                client.clone(),
                bus.clone(),
                rate_limiter.clone(),
                config.target_symbol.clone(),
                crate::collectors::trades::TradesCollector::new(config.target_symbol.clone(), config.trade_min_value_usd),
            ));
            scheduler.schedule("collect_trades_rest", Duration::from_secs(5), move || {
                let job = trades_job.clone();
                async move { job.run().await }
            });

            let candles_job = Arc::new(CandlesRestJob::new(
                client.clone(),
                bus.clone(),
                rate_limiter.clone(),
                config.target_symbol.clone(),
                intervals.to_vec(),
                crate::collectors::candles::CandlesCollector::new(config.target_symbol.clone()),
            ));
            scheduler.schedule("collect_candles_rest", Duration::from_secs(60), move || {
                let job = candles_job.clone();
                async move { job.run().await }
            });
        }
    }

    /// Tear down in reverse order: stop the scheduler (no new job ticks),
    /// stop the WS manager, drain every collector's buffer within
    /// `drain_timeout_s`, then disconnect the bus last.
    pub async fn shutdown(self) {
        info!("pipeline shutdown requested");

        self.scheduler.shutdown().await;

        let _ = self.ws_shutdown_tx.send(true);
        if let Err(e) = tokio::time::timeout(Duration::from_secs(self.config.shutdown_grace_s), self.ws_task).await {
            warn!(error = %e, "WS manager task did not stop within shutdown_grace");
        }

        let _ = self.flush_shutdown_tx.send(true);
        let drain_timeout = Duration::from_secs(self.config.drain_timeout_s);
        for handle in self.flush_handles {
            if tokio::time::timeout(drain_timeout, handle).await.is_err() {
                warn!("a collector's flush loop did not drain within drain_timeout_s");
            }
        }

        if let Err(e) = self.bus.disconnect().await {
            warn!(error = %e, "event bus disconnect failed");
        }

        info!(published = self.bus.metrics().published, "pipeline stopped");
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn event_bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    /// Readiness summary for the (externally-owned) HTTP readiness probe
    /// described in spec §7: not-ready while the repository is unreachable,
    /// regardless of WS connectivity (a disconnected WS degrades to
    /// REST-fallback jobs rather than failing the process).
    pub async fn readiness(&self) -> Readiness {
        Readiness { repository_ok: self.repository.ping().await.is_ok(), ws_status: self.ws.status() }
    }
}

#[derive(Debug, Clone)]
pub struct Readiness {
    pub repository_ok: bool,
    pub ws_status: crate::ws_manager::WsStatus,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.repository_ok
    }
}
