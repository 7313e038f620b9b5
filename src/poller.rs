//! Polling Controller (spec §4.5).
//!
//! Arms/disarms REST-snapshot polling per (CanonicalId, VenueId) based on
//! Spread Engine classifications, with dwell-based hysteresis and per-
//! assignment failure backoff. Grounded on the teacher's REST retry shape in
//! `scrapers::dome_rest` and on the Python ancestor's polling-fallback
//! reconnect loop (`original_source` `multi_exchange_monitor/
//! websocket_manager.py`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapter::VenueAdapter;
use crate::book::{BookEntry, BookSource, BookStore, SlotKind};
use crate::bus::{FanoutBus, SessionState, Update};
use crate::config::PollConfig;
use crate::ids::{CanonicalId, VenueId};
use crate::registry::SymbolRegistry;
use crate::spread::Classification;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AssignmentKey {
    id: CanonicalId,
    venue: VenueId,
}

struct Assignment {
    started_at: Instant,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    last_arbitrage_seen: Instant,
}

/// Owns every active [`AssignmentKey`] -> task. Arm/disarm decisions are
/// serialized through `inner` so at most one poller per pair ever spawns
/// (spec §4.5's "controller is itself single-flighted").
pub struct PollingController {
    book: Arc<BookStore>,
    registry: Arc<SymbolRegistry>,
    bus: FanoutBus,
    poll_cfg: PollConfig,
    arb_dwell: Duration,
    adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    assignments: Mutex<HashMap<AssignmentKey, Assignment>>,
    seq: Arc<AtomicU64>,
    poll_counts: Arc<SyncMutex<HashMap<VenueId, Arc<AtomicU64>>>>,
    started_at: Instant,
}

impl PollingController {
    pub fn new(
        book: Arc<BookStore>,
        registry: Arc<SymbolRegistry>,
        bus: FanoutBus,
        poll_cfg: PollConfig,
        arb_dwell: Duration,
        adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    ) -> Self {
        Self {
            book,
            registry,
            bus,
            poll_cfg,
            arb_dwell,
            adapters,
            assignments: Mutex::new(HashMap::new()),
            seq: Arc::new(AtomicU64::new(0)),
            poll_counts: Arc::new(SyncMutex::new(HashMap::new())),
            started_at: Instant::now(),
        }
    }

    /// Accepted snapshot polls per second for `venue` since this controller
    /// was built (spec §4.7 health contract's per-venue poll rate).
    pub fn poll_rate(&self, venue: &VenueId) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        let count = self.poll_counts.lock().get(venue).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0);
        count as f64 / elapsed
    }

    /// Called on every `SpreadUpdate`. Arms `(id, anchor)` when the
    /// classification is `arbitrage_candidate` and the anchor participates;
    /// disarms after the condition has lapsed for `arb_dwell`.
    pub async fn on_spread_update(
        &self,
        id: &CanonicalId,
        anchor: &VenueId,
        classification: Classification,
        participating: bool,
    ) {
        let mut assignments = self.assignments.lock().await;
        let key = AssignmentKey { id: id.clone(), venue: anchor.clone() };
        let armed_now = classification == Classification::ArbitrageCandidate && participating;

        if armed_now {
            if let Some(a) = assignments.get_mut(&key) {
                a.last_arbitrage_seen = Instant::now();
            } else {
                let Some(adapter) = self.adapters.get(anchor).cloned() else { return };
                let cancel = CancellationToken::new();
                let handle = self.spawn_poller(id.clone(), anchor.clone(), adapter, cancel.clone());
                assignments.insert(
                    key,
                    Assignment { started_at: Instant::now(), cancel, handle, last_arbitrage_seen: Instant::now() },
                );
                gauge!("spreadwatch_armed_polling_assignments").set(assignments.len() as f64);
                info!(%id, venue = %anchor, "armed polling assignment");
            }
            return;
        }

        if let Some(a) = assignments.get(&key) {
            if a.last_arbitrage_seen.elapsed() >= self.arb_dwell {
                let a = assignments.remove(&key).unwrap();
                a.cancel.cancel();
                drop(assignments);
                let _ = a.handle.await;
                gauge!("spreadwatch_armed_polling_assignments").decrement(1.0);
                info!(%id, venue = %anchor, "disarmed polling assignment after dwell");
            }
        }
    }

    pub async fn is_armed(&self, id: &CanonicalId, venue: &VenueId) -> bool {
        self.assignments
            .lock()
            .await
            .contains_key(&AssignmentKey { id: id.clone(), venue: venue.clone() })
    }

    pub async fn armed_assignments(&self) -> Vec<(CanonicalId, VenueId, Instant)> {
        self.assignments
            .lock()
            .await
            .iter()
            .map(|(k, a)| (k.id.clone(), k.venue.clone(), a.started_at))
            .collect()
    }

    /// Cancels every assignment and waits for their tombstone writes (spec
    /// §4.7: Polling Controller is cancelled first during shutdown).
    pub async fn shutdown(&self) {
        let mut assignments = self.assignments.lock().await;
        let keys: Vec<_> = assignments.keys().cloned().collect();
        for key in keys {
            if let Some(a) = assignments.remove(&key) {
                a.cancel.cancel();
                let _ = a.handle.await;
            }
        }
    }

    fn spawn_poller(
        &self,
        id: CanonicalId,
        venue: VenueId,
        adapter: Arc<dyn VenueAdapter>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let book = self.book.clone();
        let registry = self.registry.clone();
        let bus = self.bus.clone();
        let interval = self.poll_cfg.interval;
        let max_failures = self.poll_cfg.max_failures_window;
        let backoff = self.poll_cfg.backoff;
        let seq_counter = self.seq.clone();
        let poll_count = self
            .poll_counts
            .lock()
            .entry(venue.clone())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone();

        tokio::spawn(async move {
            let failures = AtomicU32::new(0);
            let mut current_interval = interval;

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(current_interval) => {}
                    _ = cancel.cancelled() => break,
                }

                let Ok(native) = registry.native_of(&id, &venue) else { continue };
                match adapter.fetch_snapshot(&native).await {
                    Ok(snapshot) => {
                        failures.store(0, Ordering::Relaxed);
                        current_interval = interval;
                        poll_count.fetch_add(1, Ordering::Relaxed);
                        let seq = seq_counter.fetch_add(1, Ordering::Relaxed);
                        book.apply(BookEntry {
                            venue: venue.clone(),
                            id: id.clone(),
                            bid: snapshot.bid,
                            bid_size: snapshot.bid_size,
                            ask: snapshot.ask,
                            ask_size: snapshot.ask_size,
                            last: None,
                            last_size: None,
                            event_time: snapshot.event_time,
                            ingest_time: Instant::now(),
                            source: BookSource::Polled,
                            seq,
                        });
                    }
                    Err(e) => {
                        let n = failures.fetch_add(1, Ordering::Relaxed) + 1;
                        counter!("spreadwatch_poll_failures_total", "venue" => venue.as_str().to_string())
                            .increment(1);
                        warn!(%id, venue = %venue, error = %e, failures = n, "snapshot poll failed");
                        if n >= max_failures {
                            current_interval = backoff;
                        }
                        if n >= max_failures * 3 {
                            bus.publish(Update::SessionUpdate(
                                venue.clone(),
                                SessionState::Live,
                                SessionState::Degraded,
                                format!("polling retry budget exceeded for {id}"),
                            ));
                            break;
                        }
                    }
                }
            }

            // Final tombstone write for this (venue, id) polled slot (spec
            // §4.5's cancellation contract). `tombstone_polled` addresses the
            // polled slot directly, so the stream-sourced slot for the same
            // (venue, id) is a distinct key and is left untouched.
            book.tombstone_polled(&venue, &id);
        })
    }
}
