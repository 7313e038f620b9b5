//! Fan-out Bus (spec §4.6).
//!
//! Conflate-latest per `(kind, venue, id)` key. The teacher crate's closest
//! analogue is a `tokio::sync::broadcast` channel fed from `main.rs`'s
//! WebSocket handler and `EdgeReceiver`'s UDP forwarding path, but
//! `broadcast`'s lagged-receiver semantics drop the *oldest* unseen messages
//! indiscriminately, not "replace the pending value for this key" — the
//! wrong shape for spec §4.6. This bus is instead hand-built from a bounded
//! `mpsc` channel per subscriber plus a small conflation map, kept in the
//! same message-passing idiom the teacher uses throughout.

use metrics::counter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::book::BookEntry;
use crate::ids::{CanonicalId, VenueId};
use crate::spread::SpreadSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Live,
    Degraded,
    Closed,
}

/// Tagged union of bus messages (spec §3's `Update`).
#[derive(Debug, Clone)]
pub enum Update {
    BookUpdate(Arc<BookEntry>, Option<u64>),
    SpreadUpdate(Arc<SpreadSummary>),
    SessionUpdate(VenueId, SessionState, SessionState, String),
}

/// The per-key conflation identity (spec §4.6: `key = (kind, venue, id)`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConflationKey {
    Book(VenueId, CanonicalId),
    Spread(CanonicalId),
    Session(VenueId),
}

fn conflation_key(update: &Update) -> ConflationKey {
    match update {
        Update::BookUpdate(entry, _) => ConflationKey::Book(entry.venue.clone(), entry.id.clone()),
        Update::SpreadUpdate(summary) => ConflationKey::Spread(summary.id.clone()),
        Update::SessionUpdate(venue, ..) => ConflationKey::Session(venue.clone()),
    }
}

struct Subscriber {
    tx: mpsc::Sender<Update>,
    pending: Mutex<HashMap<ConflationKey, Update>>,
    predicate: Box<dyn Fn(&Update) -> bool + Send + Sync>,
}

pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Update>,
    bus: Arc<FanoutBusInner>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Update> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.subscribers.lock().remove(&self.id);
    }
}

struct FanoutBusInner {
    subscribers: Mutex<HashMap<u64, Arc<Subscriber>>>,
    next_id: AtomicU64,
    capacity: usize,
}

/// Clonable handle to the bus; publishing never blocks (spec §5's
/// "non-blocking replace" when a subscriber's channel has no room).
#[derive(Clone)]
pub struct FanoutBus(Arc<FanoutBusInner>);

impl FanoutBus {
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(FanoutBusInner {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity,
        }))
    }

    pub fn subscribe(
        &self,
        predicate: impl Fn(&Update) -> bool + Send + Sync + 'static,
    ) -> Subscription {
        let (tx, rx) = mpsc::channel(self.0.capacity.max(1));
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        let sub = Arc::new(Subscriber {
            tx,
            pending: Mutex::new(HashMap::new()),
            predicate: Box::new(predicate),
        });
        self.0.subscribers.lock().insert(id, sub);
        Subscription { id, rx, bus: self.0.clone() }
    }

    /// Publishes to every matching subscriber. Never awaits a full channel:
    /// on backpressure the pending value for this key is replaced in place
    /// and delivered as soon as the subscriber's loop catches up.
    pub fn publish(&self, update: Update) {
        let key = conflation_key(&update);
        let subs: Vec<Arc<Subscriber>> = self.0.subscribers.lock().values().cloned().collect();
        for sub in subs {
            if !(sub.predicate)(&update) {
                continue;
            }
            self.publish_one(&sub, &key, update.clone());
        }
    }

    /// Every send for a given subscriber+key is decided under the
    /// subscriber's single `pending` lock: if an older update for this key
    /// is already parked there, the new one replaces it instead of racing a
    /// direct `try_send` past it, which would let a stale update reach the
    /// subscriber after a newer one already had (spec §4.6/§8: delivery
    /// order per key must track seq).
    fn publish_one(&self, sub: &Arc<Subscriber>, key: &ConflationKey, update: Update) {
        let mut pending = sub.pending.lock();
        if pending.contains_key(key) {
            pending.insert(key.clone(), update);
        } else {
            match sub.tx.try_send(update) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(update)) => {
                    counter!("spreadwatch_bus_conflate_total").increment(1);
                    pending.insert(key.clone(), update);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
        drop(pending);
        self.drain_pending(sub);
    }

    fn drain_pending(&self, sub: &Arc<Subscriber>) {
        let mut pending = sub.pending.lock();
        pending.retain(|_, update| match sub.tx.try_send(update.clone()) {
            Ok(()) => false,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::BookSource;
    use crate::decimal::Price;
    use std::time::Instant;

    fn entry(venue: &str, id: &str, seq: u64) -> Arc<BookEntry> {
        Arc::new(BookEntry {
            venue: VenueId::new(venue).unwrap(),
            id: CanonicalId::parse(id).unwrap(),
            bid: Price::parse("1"),
            bid_size: None,
            ask: Price::parse("2"),
            ask_size: None,
            last: None,
            last_size: None,
            event_time: Instant::now(),
            ingest_time: Instant::now(),
            source: BookSource::Stream,
            seq,
        })
    }

    #[tokio::test]
    async fn subscriber_sees_latest_on_conflate() {
        let bus = FanoutBus::new(1);
        let mut sub = bus.subscribe(|_| true);

        // First publish fills the one-slot channel; it is delivered.
        bus.publish(Update::BookUpdate(entry("a", "BTC-USDC-PERP", 1), None));
        // Publish two more before the subscriber drains — only the latest
        // for this key should ultimately be observable after the first recv.
        bus.publish(Update::BookUpdate(entry("a", "BTC-USDC-PERP", 2), Some(1)));
        bus.publish(Update::BookUpdate(entry("a", "BTC-USDC-PERP", 3), Some(2)));

        let first = sub.recv().await.unwrap();
        match first {
            Update::BookUpdate(e, _) => assert_eq!(e.seq, 1),
            _ => panic!("wrong variant"),
        }

        // Allow conflation to settle, then manually trigger a drain via a
        // dummy publish (recv already pulled one slot open).
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        bus.publish(Update::BookUpdate(entry("a", "BTC-USDC-PERP", 4), Some(3)));

        let second = sub.recv().await.unwrap();
        match second {
            Update::BookUpdate(e, _) => assert!(e.seq >= 3),
            _ => panic!("wrong variant"),
        }
    }

    /// A publish that finds room in the channel must still defer to an
    /// older update for the same key already parked in `pending`, replacing
    /// it rather than racing a direct `try_send` past it. Otherwise a stale
    /// update could reach the subscriber after a newer one already had.
    #[tokio::test]
    async fn direct_send_never_bypasses_an_already_pending_older_update() {
        let bus = FanoutBus::new(2);
        let mut sub = bus.subscribe(|_| true);

        bus.publish(Update::BookUpdate(entry("a", "BTC-USDC-PERP", 1), None));
        bus.publish(Update::BookUpdate(entry("a", "BTC-USDC-PERP", 2), Some(1)));
        // Channel (capacity 2) is now full; seq 3 is conflated into pending.
        bus.publish(Update::BookUpdate(entry("a", "BTC-USDC-PERP", 3), Some(2)));

        let first = sub.recv().await.unwrap();
        match first {
            Update::BookUpdate(e, _) => assert_eq!(e.seq, 1),
            _ => panic!("wrong variant"),
        }

        // The channel now has one free slot. A naive "try_send first, only
        // consult pending on Full" implementation would let seq 4 jump
        // straight into that slot while stale seq 3 is still parked,
        // so a later drain could deliver 3 after 4 already arrived.
        bus.publish(Update::BookUpdate(entry("a", "BTC-USDC-PERP", 4), Some(3)));

        let second = sub.recv().await.unwrap();
        let third = sub.recv().await.unwrap();
        let seqs = [second, third].map(|u| match u {
            Update::BookUpdate(e, _) => e.seq,
            _ => panic!("wrong variant"),
        });
        assert_eq!(seqs, [2, 4], "seq 3 must never be delivered once seq 4 superseded it");
    }

    #[test]
    fn dropping_subscription_reclaims_slot() {
        let bus = FanoutBus::new(4);
        {
            let _sub = bus.subscribe(|_| true);
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }
}
