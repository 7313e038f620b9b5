//! Supervisor (spec §4.7).
//!
//! Owns the construction and shutdown order of every component. Grounded on
//! the teacher's `main.rs`, which wires `scrapers` tasks, the arbitrage
//! engine, and `EdgeReceiver` together behind one `tokio::select!`-based
//! shutdown switch; generalized here into an N-venue, N-multiplexer fleet.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::adapter::VenueAdapter;
use crate::book::BookStore;
use crate::bus::{FanoutBus, SessionState, Update};
use crate::config::Config;
use crate::health::{HealthSnapshot, PollingAssignmentHealth, VenueHealth};
use crate::ids::{Channel, VenueId};
use crate::multiplexer::Multiplexer;
use crate::poller::PollingController;
use crate::registry::SymbolRegistry;
use crate::spread::SpreadEngine;

/// A fully constructed, runnable system. Built once via [`Supervisor::build`],
/// then driven by [`Supervisor::run`] until its `CancellationToken` fires.
pub struct Supervisor {
    config: Config,
    registry: Arc<SymbolRegistry>,
    book: Arc<BookStore>,
    bus: FanoutBus,
    multiplexers: Vec<Arc<Multiplexer>>,
    spread: Arc<SpreadEngine>,
    poller: Arc<PollingController>,
}

impl Supervisor {
    /// Construction order (spec §4.7): Symbol Registry -> Book Store ->
    /// Fan-out Bus -> one Multiplexer per venue -> Spread Engine -> Polling
    /// Controller. Each component only ever depends on ones built before it.
    pub fn build(
        config: Config,
        mut registry: SymbolRegistry,
        adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
        native_symbols: &HashMap<(VenueId, crate::ids::CanonicalId), crate::ids::VenueSymbol>,
    ) -> Self {
        for ((venue, id), native) in native_symbols {
            let _ = registry.register(venue.clone(), native.clone(), id.clone());
        }
        let registry = Arc::new(registry);

        let bus = FanoutBus::new(config.fanout_channel_capacity);
        let book = Arc::new(BookStore::new(bus.clone()));

        let mut desired_subs = HashSet::new();
        for id in &config.universe {
            desired_subs.insert((id.clone(), Channel::Book));
        }

        let multiplexers: Vec<Arc<Multiplexer>> = config
            .venues
            .iter()
            .filter_map(|vc| {
                let adapter = adapters.get(&vc.id)?.clone();
                Some(Arc::new(Multiplexer::new(
                    vc.id.clone(),
                    adapter,
                    registry.clone(),
                    book.clone(),
                    bus.clone(),
                    config.reconnect.clone(),
                    desired_subs.clone(),
                )))
            })
            .collect();

        let spread = Arc::new(SpreadEngine::new());
        let poller = Arc::new(PollingController::new(
            book.clone(),
            registry.clone(),
            bus.clone(),
            config.poll.clone(),
            config.spread.arb_dwell,
            adapters,
        ));

        Self { config, registry, book, bus, multiplexers, spread, poller }
    }

    /// Runs every Multiplexer and the spread-recompute loop until `cancel`
    /// fires, then shuts down in reverse dependency order (spec §4.7):
    /// Polling Controller, then Multiplexers, then Spread Engine, then the
    /// Fan-out Bus drains naturally as subscribers drop, finally Book Store.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut handles = Vec::new();
        for mux in &self.multiplexers {
            let mux = mux.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { mux.run(cancel).await }));
        }

        let spread_handle = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { this.spread_loop(cancel).await })
        };

        cancel.cancelled().await;
        info!("supervisor received shutdown signal");

        self.poller.shutdown().await;
        for h in handles {
            let _ = h.await;
        }
        let _ = spread_handle.await;
        info!("supervisor shutdown complete");
    }

    async fn spread_loop(&self, cancel: CancellationToken) {
        let Some(anchor) = self.config.anchor_venue().cloned() else { return };
        loop {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
                _ = cancel.cancelled() => return,
            }

            for id in &self.config.universe {
                let Some(summary) = self.spread.recompute(
                    &self.book,
                    id,
                    &self.config.spread,
                    self.config.freshness.stale_after,
                    &anchor,
                    self.config.decimal_scale,
                    Instant::now(),
                ) else {
                    continue;
                };

                let participating = summary.participating.contains(&anchor) && !summary.stale.contains(&anchor);
                self.poller
                    .on_spread_update(id, &anchor, summary.classification, participating)
                    .await;
                self.bus.publish(Update::SpreadUpdate(summary));
            }
        }
    }

    pub async fn health(&self) -> HealthSnapshot {
        let mut venues = Vec::with_capacity(self.multiplexers.len());
        for mux in &self.multiplexers {
            venues.push(VenueHealth {
                venue: mux.venue_id().clone(),
                state: SessionState::from(mux.state().await),
                desired_sub_count: mux.desired_sub_count().await,
                actual_sub_count: mux.actual_sub_count().await,
                unmapped_count: mux.unmapped_count(),
                last_error: mux.last_error().await,
                ingest_rate: mux.ingest_rate(),
                poll_rate: self.poller.poll_rate(mux.venue_id()),
            });
        }

        let armed_assignments = self
            .poller
            .armed_assignments()
            .await
            .into_iter()
            .map(|(id, venue, started_at)| PollingAssignmentHealth {
                id,
                venue,
                started_at,
                armed_for_ms: started_at.elapsed().as_millis(),
            })
            .collect();

        HealthSnapshot {
            generated_at: chrono::Utc::now(),
            venues,
            subscriber_count: self.bus.subscriber_count(),
            armed_assignments,
            tracked_ids: self.config.universe.len(),
        }
    }

    pub fn bus(&self) -> FanoutBus {
        self.bus.clone()
    }

    pub fn book(&self) -> Arc<BookStore> {
        self.book.clone()
    }

    pub fn registry(&self) -> Arc<SymbolRegistry> {
        self.registry.clone()
    }
}
