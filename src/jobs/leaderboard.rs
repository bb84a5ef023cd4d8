// =============================================================================
// LeaderboardJob — HTTP `leaderboard` poll + trader tracking reconciliation
// (spec §4.6: `select_traders`, hourly)
// =============================================================================
//
// Grounded on examples/original_source/hyperliquid/hyperliquid-system/src/
// jobs/select_traders.py: fetch the raw leaderboard, score it, diff the
// scored top-N against the currently active `tracked_traders` set, persist
// the new active set, and reconcile the positions/orders collectors'
// `webData2` subscriptions to match. Step 3 of spec §4.6 ("waits for the
// downstream scored_traders event, or reads the most recent one") is
// satisfied by calling `TraderScoringProcessor::process` directly rather
// than round-tripping through the bus — the bus dispatches asynchronously
// on its own worker, so there is no synchronous way to "wait" for a
// processor's output through it; publishing the `Leaderboard` event
// separately still feeds `PersistenceHandler`'s `leaderboard_history`.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::collectors::trader_orders::TraderOrdersCollector;
use crate::collectors::trader_positions::TraderPositionsCollector;
use crate::event_bus::EventBus;
use crate::events::{EventPayload, EventType, StandardEvent};
use crate::hyperliquid::HyperliquidClient;
use crate::processors::trader_scoring::TraderScoringProcessor;
use crate::processors::Processor;
use crate::rate_limit::RateLimitManager;
use crate::repository::{QueryFilter, Repository};

pub struct LeaderboardJob {
    client: HyperliquidClient,
    bus: Arc<dyn EventBus>,
    rate_limiter: Arc<RateLimitManager>,
    repository: Arc<dyn Repository>,
    scoring: TraderScoringProcessor,
    positions: Arc<TraderPositionsCollector>,
    orders: Arc<TraderOrdersCollector>,
}

impl LeaderboardJob {
    pub fn new(
        client: HyperliquidClient,
        bus: Arc<dyn EventBus>,
        rate_limiter: Arc<RateLimitManager>,
        repository: Arc<dyn Repository>,
        min_score: f64,
        max_tracked_count: usize,
        min_account_value: f64,
        positions: Arc<TraderPositionsCollector>,
        orders: Arc<TraderOrdersCollector>,
    ) -> Self {
        Self { client, bus, rate_limiter, repository, scoring: TraderScoringProcessor::new(min_score, max_tracked_count, min_account_value), positions, orders }
    }

    pub async fn run(&self) {
        let rows = match self.client.leaderboard().await {
            Ok(rows) => {
                self.rate_limiter.report_success();
                rows
            }
            Err(e) => {
                self.rate_limiter.report_error();
                warn!(error = %e, "select_traders: leaderboard fetch failed");
                return;
            }
        };

        let leaderboard_event = StandardEvent::create(EventType::Leaderboard, "hyperliquid_leaderboard_rest", EventPayload::Raw(json!({ "rows": rows })), None, None);
        if !self.bus.publish(leaderboard_event.clone()).await {
            warn!("select_traders: bus saturated publishing leaderboard event");
        }

        // spec §4.6 step 3's safety rule: an empty leaderboard response
        // deactivates nobody; the previous active set is retained and only
        // an error metric moves.
        let scored = match self.scoring.process(&leaderboard_event).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                warn!("select_traders: no qualifying traders in this leaderboard fetch, retaining previous active set");
                self.rate_limiter.report_error();
                return;
            }
            Err(e) => {
                warn!(error = %e, "select_traders: scoring failed");
                self.rate_limiter.report_error();
                return;
            }
        };
        // Publish the derived `scored_traders` event so downstream
        // processors (signal aggregation's score weights) actually see it —
        // `scoring.process` above only computed it in-process for this
        // job's own reconciliation use.
        if !self.bus.publish(scored.clone()).await {
            warn!("select_traders: bus saturated publishing scored_traders event");
        }

        let EventPayload::ScoredTraders(scored_traders) = scored.payload else { return };

        let active_before = self.active_tracked_addresses().await;
        let active_after: HashSet<String> = scored_traders.iter().map(|t| t.trader_address.clone()).collect();

        let to_add: Vec<String> = active_after.difference(&active_before).cloned().collect();
        let to_remove: Vec<String> = active_before.difference(&active_after).cloned().collect();

        for trader in &scored_traders {
            let key = json!({ "address": trader.trader_address });
            let doc = json!({
                "address": trader.trader_address,
                "active": true,
                "score": trader.score,
                "tags": trader.tags,
                "account_value": trader.account_value,
            });
            if let Err(e) = self.repository.upsert("tracked_traders", &key, doc).await {
                warn!(error = %e, address = %trader.trader_address, "select_traders: failed to upsert tracked trader");
            }
        }
        for address in &to_remove {
            let key = json!({ "address": address });
            let doc = json!({ "address": address, "active": false });
            if let Err(e) = self.repository.upsert("tracked_traders", &key, doc).await {
                warn!(error = %e, %address, "select_traders: failed to deactivate dropped tracker");
            }
        }

        info!(added = to_add.len(), removed = to_remove.len(), active = active_after.len(), "select_traders: reconciled tracked trader set");

        self.spawn_forwarders(self.positions.reconcile_subscriptions(&to_add, &to_remove), self.positions.clone(), |collector, address, data| collector.handle_message(address, data));
        self.spawn_forwarders(self.orders.reconcile_subscriptions(&to_add, &to_remove), self.orders.clone(), |collector, address, data| collector.handle_message(address, data));
    }

    async fn active_tracked_addresses(&self) -> HashSet<String> {
        let rows = match self.repository.range_query("tracked_traders", &QueryFilter::new().with_limit(10_000)).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "select_traders: failed to read tracked_traders");
                return HashSet::new();
            }
        };
        rows.into_iter()
            .filter(|d| d.data.get("active").and_then(|v| v.as_bool()).unwrap_or(false))
            .filter_map(|d| d.data.get("address").and_then(|v| v.as_str()).map(String::from))
            .collect()
    }

    /// Drive each newly-opened `webData2` receiver into its collector's
    /// `handle_message`, publishing whatever events come out. `ws_manager`
    /// hands subscribers the bare inner payload, one layer short of what
    /// `handle_message` expects (see `lifecycle.rs`), so each frame is
    /// re-wrapped under a `data` key before being handed off.
    fn spawn_forwarders<C: Send + Sync + 'static>(
        &self,
        new_receivers: Vec<(String, tokio::sync::mpsc::Receiver<serde_json::Value>)>,
        collector: Arc<C>,
        handle: fn(&C, &str, serde_json::Value) -> Vec<StandardEvent>,
    ) {
        for (address, mut rx) in new_receivers {
            let collector = collector.clone();
            let bus = self.bus.clone();
            tokio::spawn(async move {
                while let Some(raw) = rx.recv().await {
                    for event in handle(&collector, &address, json!({ "data": raw })) {
                        bus.publish(event).await;
                    }
                }
            });
        }
    }
}
