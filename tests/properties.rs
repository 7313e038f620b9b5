//! Property-based tests for spec §8's quantified invariants and
//! round-trip/idempotence properties, driven by `proptest` (the teacher
//! crate has no property tests of its own; this harness is grounded on the
//! `dawsh2-Torq` pack example's `proptest` usage for its decimal/order-book
//! arithmetic, which is the pack's canonical precedent for fuzzing exact
//! decimal and sequence invariants in Rust).

use proptest::prelude::*;
use std::time::Instant;

use spreadwatch::book::{BookEntry, BookSource, BookStore};
use spreadwatch::bus::FanoutBus;
use spreadwatch::decimal::{Price, Qty};
use spreadwatch::ids::{CanonicalId, VenueId, VenueSymbol};
use spreadwatch::registry::SymbolRegistry;

fn entry(seq: u64, bid: &str, ask: &str) -> BookEntry {
    BookEntry {
        venue: VenueId::new("a").unwrap(),
        id: CanonicalId::parse("BTC-USDC-PERP").unwrap(),
        bid: Price::parse(bid),
        bid_size: Qty::parse("1"),
        ask: Price::parse(ask),
        ask_size: Qty::parse("1"),
        last: None,
        last_size: None,
        event_time: Instant::now(),
        ingest_time: Instant::now(),
        source: BookSource::Stream,
        seq,
    }
}

proptest! {
    /// For every accepted `BookEntry`, the previously stored entry for the
    /// same (venue, id) has strictly smaller `seq` (spec §8).
    #[test]
    fn accepted_entries_have_strictly_increasing_seq(seqs in prop::collection::vec(1u64..1000, 1..50)) {
        let store = BookStore::new(FanoutBus::new(16));
        let mut last_accepted_seq: Option<u64> = None;

        for seq in seqs {
            let result = store.apply(entry(seq, "100", "101"));
            if result.accepted {
                if let Some(prior) = last_accepted_seq {
                    prop_assert!(seq > prior);
                }
                last_accepted_seq = Some(seq);
            } else {
                // Rejected entries never exceed the currently stored seq.
                prop_assert!(last_accepted_seq.map_or(true, |s| seq <= s));
            }
        }
    }

    /// Re-applying the same `BookEntry` (same seq) is a no-op that returns
    /// `accepted=false` (spec §8 idempotence).
    #[test]
    fn reapplying_same_seq_is_a_noop(seq in 1u64..1000) {
        let store = BookStore::new(FanoutBus::new(16));
        let first = store.apply(entry(seq, "100", "101"));
        prop_assert!(first.accepted);
        let second = store.apply(entry(seq, "100", "101"));
        prop_assert!(!second.accepted);
    }

    /// `canonical_of(venue, native_of(id, venue))` is the identity whenever
    /// `native_of` is defined (spec §8 round-trip property).
    #[test]
    fn registry_roundtrip(native in "[A-Z]{2,5}_[A-Z]{2,5}_PERP") {
        let mut registry = SymbolRegistry::new();
        let venue = VenueId::new("a").unwrap();
        let id = CanonicalId::parse("BTC-USDC-PERP").unwrap();
        let symbol = VenueSymbol::new(native);
        registry.register(venue.clone(), symbol.clone(), id.clone()).unwrap();

        let round_tripped = registry.canonical_of(&venue, &registry.native_of(&id, &venue).unwrap()).unwrap();
        prop_assert_eq!(round_tripped, id);
    }

    /// Decimal mid-price computation never drifts under repeated addition
    /// the way float mid-price would (spec §3/§9: exact comparisons).
    #[test]
    fn mid_price_is_exact_between_bid_and_ask(
        bid_cents in 1i64..1_000_000_00,
        spread_cents in 0i64..1000,
    ) {
        let bid = Price::parse(&format!("{}.{:02}", bid_cents / 100, bid_cents % 100)).unwrap();
        let ask_cents = bid_cents + spread_cents;
        let ask = Price::parse(&format!("{}.{:02}", ask_cents / 100, ask_cents % 100)).unwrap();
        let mid = Price::mid(bid, ask, 8);
        prop_assert!(mid.0 >= bid.0 && mid.0 <= ask.0);
    }
}
