//! Venue Adapter contract (spec §4.1 / §6).
//!
//! A closed set of normalized event variants crosses the adapter boundary —
//! no free-form dictionaries reach the core (spec §9's first design note).
//! Venue-specific wire codecs live entirely behind implementations of
//! [`VenueAdapter`]; the Multiplexer only ever sees this trait.

pub mod binance;
pub mod demo;

use async_trait::async_trait;
use std::time::Instant;

use crate::decimal::{Price, Qty};
use crate::error::TransientError;
use crate::ids::{Channel, VenueSymbol};

/// One normalized event yielded by a venue's stream session.
///
/// Any price/size field may be absent on a given event (spec §6): a trade
/// print carries `last`/`last_size` only, a book update carries bid/ask only.
#[derive(Debug, Clone)]
pub struct VenueEvent {
    pub kind: EventKind,
    pub symbol: VenueSymbol,
    pub bid: Option<Price>,
    pub bid_size: Option<Qty>,
    pub ask: Option<Price>,
    pub ask_size: Option<Qty>,
    pub last: Option<Price>,
    pub last_size: Option<Qty>,
    pub event_time: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Book,
    Trade,
}

/// A snapshot fetched via the REST polling path (spec §4.5 / §6).
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub bid: Option<Price>,
    pub bid_size: Option<Qty>,
    pub ask: Option<Price>,
    pub ask_size: Option<Qty>,
    pub event_time: Instant,
}

/// An opaque, adapter-owned streaming session handle.
#[async_trait]
pub trait StreamSession: Send {
    /// Blocks until the next normalized event or a transient error.
    /// Returns `Ok(None)` when the stream ends cleanly (server close).
    async fn next_event(&mut self) -> Result<Option<VenueEvent>, TransientError>;
}

/// The narrow contract every venue implementation satisfies (spec §4.1/§6).
///
/// Reconnection at the socket level is the adapter's responsibility; the
/// Multiplexer only handles session-level reconnection (open a new session).
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn list_instruments(&self) -> Vec<VenueSymbol>;

    async fn open_stream(&self) -> Result<Box<dyn StreamSession>, TransientError>;

    async fn subscribe(
        &self,
        session: &mut dyn StreamSession,
        symbol: &VenueSymbol,
        channels: &[Channel],
    ) -> Result<(), TransientError>;

    async fn unsubscribe(
        &self,
        session: &mut dyn StreamSession,
        symbol: &VenueSymbol,
        channels: &[Channel],
    ) -> Result<(), TransientError>;

    async fn fetch_snapshot(&self, symbol: &VenueSymbol) -> Result<Snapshot, TransientError>;

    async fn close(&self, session: Box<dyn StreamSession>);
}
