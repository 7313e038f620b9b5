//! In-memory demo/test adapters.
//!
//! Not part of the spec's core — every venue-agnostic component still needs
//! at least one concrete [`VenueAdapter`] to exercise it, so this module
//! plays the role the teacher's `scrapers::binance_book_ticker` /
//! `scrapers::polymarket_ws` play for their respective venues, but scripted
//! and deterministic instead of live.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use super::{EventKind, Snapshot, StreamSession, VenueAdapter, VenueEvent};
use crate::error::TransientError;
use crate::ids::{Channel, VenueSymbol};

/// A scripted venue: events are injected via [`ScriptedAdapter::push_event`]
/// and drained in FIFO order by the stream session; snapshots are served from
/// a single mutable cell set via [`ScriptedAdapter::set_snapshot`].
pub struct ScriptedAdapter {
    instruments: Vec<VenueSymbol>,
    events: Arc<Mutex<VecDeque<VenueEvent>>>,
    snapshot: Arc<Mutex<Option<Snapshot>>>,
    fail_snapshots: Arc<Mutex<bool>>,
    fail_handshakes: Arc<Mutex<bool>>,
}

impl ScriptedAdapter {
    pub fn new(instruments: Vec<VenueSymbol>) -> Self {
        Self {
            instruments,
            events: Arc::new(Mutex::new(VecDeque::new())),
            snapshot: Arc::new(Mutex::new(None)),
            fail_snapshots: Arc::new(Mutex::new(false)),
            fail_handshakes: Arc::new(Mutex::new(false)),
        }
    }

    pub fn push_event(&self, event: VenueEvent) {
        self.events.lock().push_back(event);
    }

    pub fn set_snapshot(&self, snapshot: Snapshot) {
        *self.snapshot.lock() = Some(snapshot);
    }

    pub fn set_snapshot_failure(&self, fail: bool) {
        *self.fail_snapshots.lock() = fail;
    }

    pub fn set_handshake_failure(&self, fail: bool) {
        *self.fail_handshakes.lock() = fail;
    }
}

pub struct ScriptedSession {
    events: Arc<Mutex<VecDeque<VenueEvent>>>,
}

#[async_trait]
impl StreamSession for ScriptedSession {
    async fn next_event(&mut self) -> Result<Option<VenueEvent>, TransientError> {
        loop {
            if let Some(ev) = self.events.lock().pop_front() {
                return Ok(Some(ev));
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl VenueAdapter for ScriptedAdapter {
    fn list_instruments(&self) -> Vec<VenueSymbol> {
        self.instruments.clone()
    }

    async fn open_stream(&self) -> Result<Box<dyn StreamSession>, TransientError> {
        if *self.fail_handshakes.lock() {
            return Err(TransientError::HandshakeTimeout(std::time::Duration::from_secs(5)));
        }
        Ok(Box::new(ScriptedSession { events: self.events.clone() }))
    }

    async fn subscribe(
        &self,
        _session: &mut dyn StreamSession,
        _symbol: &VenueSymbol,
        _channels: &[Channel],
    ) -> Result<(), TransientError> {
        Ok(())
    }

    async fn unsubscribe(
        &self,
        _session: &mut dyn StreamSession,
        _symbol: &VenueSymbol,
        _channels: &[Channel],
    ) -> Result<(), TransientError> {
        Ok(())
    }

    async fn fetch_snapshot(&self, _symbol: &VenueSymbol) -> Result<Snapshot, TransientError> {
        if *self.fail_snapshots.lock() {
            return Err(TransientError::RestTimeout(std::time::Duration::from_secs(3)));
        }
        self.snapshot
            .lock()
            .clone()
            .ok_or_else(|| TransientError::Transport("no snapshot scripted".into()))
    }

    async fn close(&self, _session: Box<dyn StreamSession>) {}
}

/// Convenience constructor for a book-update event.
pub fn book_event(symbol: &str, bid: &str, ask: &str) -> VenueEvent {
    use crate::decimal::{Price, Qty};
    VenueEvent {
        kind: EventKind::Book,
        symbol: VenueSymbol::new(symbol),
        bid: Price::parse(bid),
        bid_size: Qty::parse("1"),
        ask: Price::parse(ask),
        ask_size: Qty::parse("1"),
        last: None,
        last_size: None,
        event_time: Instant::now(),
    }
}
