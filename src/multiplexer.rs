//! Stream Multiplexer (spec §4.3).
//!
//! One instance per venue. Owns that venue's [`VenueSession`] state machine,
//! reconciles desired vs. actual subscriptions, and normalizes venue events
//! into [`BookEntry`] writes. Generalized from the teacher's venue-specific
//! reconnect loops (`scrapers::polymarket_ws::connect_and_stream`,
//! `scrapers::binance_book_ticker`, `edge::receiver::EdgeReceiver::run`) into
//! one state machine driven entirely by the [`VenueAdapter`] trait (spec §9's
//! "single generic Multiplexer" mandate).

use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::adapter::VenueAdapter;
use crate::book::{BookEntry, BookSource, BookStore};
use crate::bus::{FanoutBus, SessionState, Update};
use crate::config::ReconnectConfig;
use crate::error::{InvariantViolation, ProtocolError};
use crate::ids::{Channel, CanonicalId, VenueId};
use crate::registry::SymbolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Connecting,
    Live,
    Degraded,
    Closed,
}

impl From<ConnState> for SessionState {
    fn from(s: ConnState) -> Self {
        match s {
            ConnState::Idle => SessionState::Idle,
            ConnState::Connecting => SessionState::Connecting,
            ConnState::Live => SessionState::Live,
            ConnState::Degraded => SessionState::Degraded,
            ConnState::Closed => SessionState::Closed,
        }
    }
}

/// The spec §3 `VenueSession`, owned exclusively by this venue's task.
pub struct VenueSessionState {
    pub venue: VenueId,
    pub state: ConnState,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub desired_subs: HashSet<(CanonicalId, Channel)>,
    pub actual_subs: HashSet<(CanonicalId, Channel)>,
    pub backoff_deadline: Instant,
}

const MAX_HANDSHAKE_ATTEMPTS: u32 = 8;
const HANDSHAKE_ATTEMPT_WINDOW: Duration = Duration::from_secs(120);

/// Per-venue subscription controller.
pub struct Multiplexer {
    venue: VenueId,
    adapter: Arc<dyn VenueAdapter>,
    registry: Arc<SymbolRegistry>,
    book: Arc<BookStore>,
    bus: FanoutBus,
    reconnect_cfg: ReconnectConfig,
    seq: Mutex<std::collections::HashMap<CanonicalId, u64>>,
    session: RwLock<VenueSessionState>,
    unmapped_count: AtomicU64,
    protocol_reject_count: AtomicU64,
    ingest_count: AtomicU64,
    started_at: Instant,
    attempt_window_start: Mutex<Instant>,
    fatal: AtomicU32,
}

impl Multiplexer {
    pub fn new(
        venue: VenueId,
        adapter: Arc<dyn VenueAdapter>,
        registry: Arc<SymbolRegistry>,
        book: Arc<BookStore>,
        bus: FanoutBus,
        reconnect_cfg: ReconnectConfig,
        desired_subs: HashSet<(CanonicalId, Channel)>,
    ) -> Self {
        let session = VenueSessionState {
            venue: venue.clone(),
            state: ConnState::Idle,
            attempt_count: 0,
            last_error: None,
            desired_subs,
            actual_subs: HashSet::new(),
            backoff_deadline: Instant::now(),
        };
        Self {
            venue,
            adapter,
            registry,
            book,
            bus,
            reconnect_cfg,
            seq: Mutex::new(std::collections::HashMap::new()),
            session: RwLock::new(session),
            unmapped_count: AtomicU64::new(0),
            protocol_reject_count: AtomicU64::new(0),
            ingest_count: AtomicU64::new(0),
            started_at: Instant::now(),
            attempt_window_start: Mutex::new(Instant::now()),
            fatal: AtomicU32::new(0),
        }
    }

    pub fn unmapped_count(&self) -> u64 {
        self.unmapped_count.load(Ordering::Relaxed)
    }

    /// Accepted book writes per second since this Multiplexer was built
    /// (spec §4.7 health contract's per-venue ingest rate).
    pub fn ingest_rate(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.ingest_count.load(Ordering::Relaxed) as f64 / elapsed
    }

    pub async fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Relaxed) != 0
    }

    pub fn venue_id(&self) -> &VenueId {
        &self.venue
    }

    pub async fn state(&self) -> ConnState {
        self.session.read().await.state
    }

    pub async fn desired_sub_count(&self) -> usize {
        self.session.read().await.desired_subs.len()
    }

    pub async fn actual_sub_count(&self) -> usize {
        self.session.read().await.actual_subs.len()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.session.read().await.last_error.clone()
    }

    async fn transition(&self, new_state: ConnState, reason: &str) {
        let old = {
            let mut session = self.session.write().await;
            let old = session.state;
            session.state = new_state;
            old
        };
        if old != new_state {
            counter!(
                "spreadwatch_session_transitions_total",
                "venue" => self.venue.as_str().to_string(),
                "state" => format!("{new_state:?}"),
            )
            .increment(1);
            self.bus.publish(Update::SessionUpdate(
                self.venue.clone(),
                old.into(),
                new_state.into(),
                reason.to_string(),
            ));
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.reconnect_cfg.base.as_millis() as u64;
        let cap = self.reconnect_cfg.cap.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(16)).min(cap);
        let jitter = rand::thread_rng().gen_range(0..=exp / 4 + 1);
        Duration::from_millis(exp.saturating_sub(jitter / 2))
    }

    /// Runs the venue's connect/reconcile/ingest loop until `cancel` fires.
    /// On cancellation: clears `actual_subs`, closes the session, emits
    /// `SessionUpdate(closed)` (spec §5).
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let backoff_deadline = self.session.read().await.backoff_deadline;
            let now = Instant::now();
            if backoff_deadline > now {
                tokio::select! {
                    _ = tokio::time::sleep(backoff_deadline - now) => {}
                    _ = cancel.cancelled() => break,
                }
            }

            self.transition(ConnState::Connecting, "connecting").await;
            let stream = tokio::select! {
                r = self.adapter.open_stream() => r,
                _ = cancel.cancelled() => break,
            };

            let mut stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    self.on_handshake_failure(e.to_string()).await;
                    continue;
                }
            };

            self.transition(ConnState::Live, "handshake ok").await;
            {
                let mut session = self.session.write().await;
                session.attempt_count = 0;
            }
            self.resubscribe_all(stream.as_mut()).await;

            let live_since = Instant::now();
            loop {
                let ev = tokio::select! {
                    ev = stream.next_event() => ev,
                    _ = cancel.cancelled() => {
                        self.adapter.close(stream).await;
                        self.on_cancelled().await;
                        return;
                    }
                };

                match ev {
                    Ok(Some(event)) => self.ingest(event).await,
                    Ok(None) => {
                        self.on_stream_closed("server closed stream", live_since).await;
                        break;
                    }
                    Err(e) => {
                        self.on_stream_closed(&e.to_string(), live_since).await;
                        break;
                    }
                }
            }
        }

        self.on_cancelled().await;
    }

    async fn on_cancelled(&self) {
        let mut session = self.session.write().await;
        session.actual_subs.clear();
        session.state = ConnState::Closed;
        drop(session);
        self.transition(ConnState::Closed, "supervisor shutdown").await;
    }

    async fn on_stream_closed(&self, reason: &str, live_since: Instant) {
        if live_since.elapsed() > self.reconnect_cfg.stability {
            let mut session = self.session.write().await;
            session.attempt_count = 0;
        }
        let mut session = self.session.write().await;
        session.actual_subs.clear();
        session.last_error = Some(reason.to_string());
        let attempt = session.attempt_count;
        session.backoff_deadline = Instant::now() + self.backoff_for(attempt);
        session.attempt_count += 1;
        drop(session);
        self.transition(ConnState::Degraded, reason).await;
    }

    async fn on_handshake_failure(&self, reason: String) {
        let mut window = self.attempt_window_start.lock().await;
        if window.elapsed() > HANDSHAKE_ATTEMPT_WINDOW {
            *window = Instant::now();
            let mut session = self.session.write().await;
            session.attempt_count = 0;
        }
        drop(window);

        let mut session = self.session.write().await;
        session.attempt_count += 1;
        session.last_error = Some(reason.clone());
        let attempt = session.attempt_count;
        session.backoff_deadline = Instant::now() + self.backoff_for(attempt);
        let fatal = attempt > MAX_HANDSHAKE_ATTEMPTS;
        drop(session);

        self.transition(ConnState::Degraded, &reason).await;
        if fatal {
            warn!(venue = %self.venue, attempts = attempt, "handshake attempt cap exceeded, escalating");
            self.fatal.store(1, Ordering::Relaxed);
        }
    }

    /// Diffs `desired_subs` against `actual_subs` and issues subscribe/
    /// unsubscribe calls. Only updates `actual_subs` on acknowledgement.
    /// Deferred entirely while state != live.
    pub async fn reconcile(&self, stream: &mut dyn crate::adapter::StreamSession) {
        let is_live = self.session.read().await.state == ConnState::Live;
        if !is_live {
            return;
        }
        let (to_add, to_remove) = {
            let session = self.session.read().await;
            let add: Vec<_> = session.desired_subs.difference(&session.actual_subs).cloned().collect();
            let remove: Vec<_> = session.actual_subs.difference(&session.desired_subs).cloned().collect();
            (add, remove)
        };

        for (id, channel) in to_add {
            if let Ok(native) = self.registry.native_of(&id, &self.venue) {
                if self.adapter.subscribe(stream, &native, &[channel]).await.is_ok() {
                    self.session.write().await.actual_subs.insert((id, channel));
                }
            }
        }
        for (id, channel) in to_remove {
            if let Ok(native) = self.registry.native_of(&id, &self.venue) {
                if self.adapter.unsubscribe(stream, &native, &[channel]).await.is_ok() {
                    self.session.write().await.actual_subs.remove(&(id, channel));
                }
            }
        }
    }

    async fn resubscribe_all(&self, stream: &mut dyn crate::adapter::StreamSession) {
        self.session.write().await.actual_subs.clear();
        self.reconcile(stream).await;
    }

    pub async fn set_desired_subs(&self, desired: HashSet<(CanonicalId, Channel)>) {
        self.session.write().await.desired_subs = desired;
    }

    /// Resolves `CanonicalId`, builds a normalized `BookEntry` with a
    /// per-(venue, id) monotonically increasing `seq`, applies it to the
    /// Book Store. The store's `apply` handles fan-out (spec §4.3(d)).
    async fn ingest(&self, event: crate::adapter::VenueEvent) {
        let id = match self.registry.canonical_of(&self.venue, &event.symbol) {
            Ok(id) => id,
            Err(_) => {
                self.unmapped_count.fetch_add(1, Ordering::Relaxed);
                counter!("spreadwatch_unmapped_events_total", "venue" => self.venue.as_str().to_string())
                    .increment(1);
                debug!(venue = %self.venue, symbol = %event.symbol, "dropping event for unmapped symbol");
                return;
            }
        };

        if let (Some(bid), Some(ask)) = (event.bid, event.ask) {
            if bid > ask {
                self.protocol_reject_count.fetch_add(1, Ordering::Relaxed);
                counter!("spreadwatch_protocol_rejects_total", "venue" => self.venue.as_str().to_string())
                    .increment(1);
                let err = ProtocolError {
                    venue: self.venue.clone(),
                    id: Some(id.clone()),
                    reason: format!("crossed book: bid {bid} > ask {ask}"),
                };
                warn!(venue = %self.venue, %id, %err, "rejecting crossed book");
                return;
            }
        }

        let seq = {
            let mut seqs = self.seq.lock().await;
            let next = seqs.get(&id).copied().unwrap_or(0) + 1;
            seqs.insert(id.clone(), next);
            next
        };

        let entry = BookEntry {
            venue: self.venue.clone(),
            id: id.clone(),
            bid: event.bid,
            bid_size: event.bid_size,
            ask: event.ask,
            ask_size: event.ask_size,
            last: event.last,
            last_size: event.last_size,
            event_time: event.event_time,
            ingest_time: Instant::now(),
            source: BookSource::Stream,
            seq,
        };

        let result = self.book.apply(entry);
        if result.accepted {
            self.ingest_count.fetch_add(1, Ordering::Relaxed);
        } else {
            // This Multiplexer is the sole writer of this venue's stream slot
            // and `seq` was just generated strictly greater than whatever it
            // last wrote; the store rejecting it anyway means the stored
            // seq did not come from this seq generator. That can only be an
            // internal bug (spec §7: "Invariant" errors are intentionally
            // fatal), not an ordinary out-of-order network delivery.
            let stored = result.prior.map(|p| p.seq).unwrap_or(0);
            let violation = InvariantViolation::SeqRegression { venue: self.venue.clone(), id, stored, incoming: seq };
            error!(venue = %self.venue, %violation, "book store invariant violated, escalating");
            self.fatal.store(1, Ordering::Relaxed);
        }
    }
}
