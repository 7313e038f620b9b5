//! Aggregated Book Store (spec §4.2).
//!
//! Lock-free reads, last-write-wins-by-seq writes. Grounded on the teacher's
//! `scrapers::polymarket_book_store` `ArcSwap`-based book snapshots, but
//! generalized from a single Polymarket-shaped book into the spec's
//! (venue, canonical id)-keyed store with both streamed and polled slots.
//!
//! Stream and polled writes for the same `(venue, id)` are kept in
//! physically distinct slots, keyed additionally by [`SlotKind`] — spec §5
//! requires "polled writes and streamed writes target distinct slots and do
//! not race", and §4.5/§8 scenario 4 require that cancelling a poller's
//! assignment tombstones only its own polled slot, leaving the stream slot
//! untouched.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bus::{FanoutBus, Update};
use crate::decimal::{Price, Qty};
use crate::ids::{CanonicalId, VenueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookSource {
    Stream,
    Polled,
    Stale,
}

/// The store-key discriminator backing a [`BookSource::Stream`] or
/// [`BookSource::Polled`] write. `Stale` entries never originate a slot of
/// their own: they are written in place of whichever slot (`Stream` or
/// `Polled`) is being tombstoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Stream,
    Polled,
}

impl SlotKind {
    /// `apply()` only ever creates or updates `Stream`/`Polled` slots;
    /// tombstoning an existing slot goes through [`BookStore::expire`] or
    /// [`BookStore::tombstone_polled`] instead, which address the slot
    /// directly rather than inferring it from `BookSource::Stale`.
    fn of(source: BookSource) -> Option<Self> {
        match source {
            BookSource::Stream => Some(SlotKind::Stream),
            BookSource::Polled => Some(SlotKind::Polled),
            BookSource::Stale => None,
        }
    }
}

/// Exactly the spec §3 tuple.
#[derive(Debug, Clone)]
pub struct BookEntry {
    pub venue: VenueId,
    pub id: CanonicalId,
    pub bid: Option<Price>,
    pub bid_size: Option<Qty>,
    pub ask: Option<Price>,
    pub ask_size: Option<Qty>,
    pub last: Option<Price>,
    pub last_size: Option<Qty>,
    pub event_time: Instant,
    pub ingest_time: Instant,
    pub source: BookSource,
    pub seq: u64,
}

impl BookEntry {
    /// `bid <= ask` invariant (spec §3). Entries with only one side present
    /// trivially satisfy it.
    pub fn is_crossed(&self) -> bool {
        matches!((self.bid, self.ask), (Some(b), Some(a)) if b > a)
    }

    pub fn mid(&self, scale: u32) -> Option<Price> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) => Some(Price::mid(b, a, scale)),
            _ => self.last,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.ingest_time)
    }
}

pub struct ApplyResult {
    pub accepted: bool,
    pub prior: Option<Arc<BookEntry>>,
}

type Key = (VenueId, CanonicalId, SlotKind);

struct Slot {
    current: ArcSwap<Option<BookEntry>>,
    write_lock: Mutex<()>,
}

impl Default for Slot {
    fn default() -> Self {
        Self { current: ArcSwap::from_pointee(None), write_lock: Mutex::new(()) }
    }
}

/// The in-memory authoritative top-of-book view (spec §4.2).
///
/// Reads are wait-free (`ArcSwap::load`). Writers racing on the same key are
/// serialized through a per-key `Mutex` guarding only the seq-ordered
/// compare-and-swap decision, never held across a suspension point (spec §5).
pub struct BookStore {
    slots: parking_lot::RwLock<HashMap<Key, Arc<Slot>>>,
    bus: FanoutBus,
}

impl BookStore {
    pub fn new(bus: FanoutBus) -> Self {
        Self { slots: parking_lot::RwLock::new(HashMap::new()), bus }
    }

    fn slot_for(&self, key: &Key) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().get(key) {
            return slot.clone();
        }
        self.slots.write().entry(key.clone()).or_default().clone()
    }

    /// Writes `entry` if its `seq` exceeds the stored seq for its
    /// `(venue, id, slot)`, where `slot` is derived from `entry.source`
    /// (spec §5: "polled writes and streamed writes target distinct slots
    /// and do not race"). Publishes a `BookUpdate` to the bus on acceptance
    /// (spec §4.2/§4.3: "the store's publish step handles fan-out").
    pub fn apply(&self, entry: BookEntry) -> ApplyResult {
        let slot_kind = SlotKind::of(entry.source)
            .expect("apply() writes Stream or Polled entries; use expire()/tombstone_polled() to mark Stale");
        let key = (entry.venue.clone(), entry.id.clone(), slot_kind);
        let slot = self.slot_for(&key);

        let _guard = slot.write_lock.lock();
        let prior = (**slot.current.load()).clone();
        if let Some(prior) = &prior {
            if entry.seq <= prior.seq {
                return ApplyResult { accepted: false, prior: Some(Arc::new(prior.clone())) };
            }
        }
        let entry = Arc::new(entry);
        slot.current.store(Arc::new(Some((*entry).clone())));
        drop(_guard);

        let prior_seq = prior.as_ref().map(|p| p.seq);
        self.bus.publish(Update::BookUpdate(entry, prior_seq));
        ApplyResult { accepted: true, prior: prior.map(Arc::new) }
    }

    pub fn get(&self, venue: &VenueId, id: &CanonicalId, slot_kind: SlotKind) -> Option<Arc<BookEntry>> {
        let key = (venue.clone(), id.clone(), slot_kind);
        let slots = self.slots.read();
        let slot = slots.get(&key)?;
        (**slot.current.load()).clone().map(Arc::new)
    }

    /// One entry per venue for `id`. Where both a stream and a polled slot
    /// are populated for the same venue, the fresher of the two (by
    /// `ingest_time`) wins, so a continuously polled fallback naturally
    /// supersedes a stream entry that has gone stale without any extra
    /// policy flag.
    pub fn snapshot_by_id(&self, id: &CanonicalId) -> HashMap<VenueId, Arc<BookEntry>> {
        let slots = self.slots.read();
        let mut out: HashMap<VenueId, Arc<BookEntry>> = HashMap::new();
        for ((venue, k, _), slot) in slots.iter() {
            if k != id {
                continue;
            }
            let Some(candidate) = (**slot.current.load()).clone() else { continue };
            match out.get(venue) {
                Some(existing) if existing.ingest_time >= candidate.ingest_time => {}
                _ => {
                    out.insert(venue.clone(), Arc::new(candidate));
                }
            }
        }
        out
    }

    pub fn snapshot_all(&self) -> Vec<Arc<BookEntry>> {
        let slots = self.slots.read();
        slots
            .values()
            .filter_map(|slot| (**slot.current.load()).clone().map(Arc::new))
            .collect()
    }

    /// Drops the stream-sourced entry for `(venue, id)` after the
    /// disconnect grace period, publishing a tombstone `BookUpdate` that
    /// retains last-known values with `source=stale`. Scoped to the stream
    /// slot only: venue disconnects are a stream-session concept (spec
    /// §4.3) and must never clobber an unrelated polled slot for the same
    /// `(venue, id)`.
    pub fn expire(&self, venue: &VenueId, id: &CanonicalId) {
        self.tombstone(venue, id, SlotKind::Stream);
    }

    /// Drops the polled entry for `(venue, id)` when its polling assignment
    /// is cancelled (spec §4.5's cancellation contract), publishing a
    /// tombstone `BookUpdate`. Scoped to the polled slot only: the
    /// stream-sourced slot for the same `(venue, id)` is a distinct key and
    /// is left untouched (spec §8 scenario 4).
    pub fn tombstone_polled(&self, venue: &VenueId, id: &CanonicalId) {
        self.tombstone(venue, id, SlotKind::Polled);
    }

    fn tombstone(&self, venue: &VenueId, id: &CanonicalId, slot_kind: SlotKind) {
        let key = (venue.clone(), id.clone(), slot_kind);
        let slot = match self.slots.read().get(&key).cloned() {
            Some(s) => s,
            None => return,
        };
        let _guard = slot.write_lock.lock();
        let Some(mut last) = (**slot.current.load()).clone() else { return };
        last.source = BookSource::Stale;
        last.ingest_time = Instant::now();
        slot.current.store(Arc::new(Some(last.clone())));
        drop(_guard);
        self.bus.publish(Update::BookUpdate(Arc::new(last), None));
        self.slots.write().remove(&key);
    }
}
