//! End-to-end scenarios (spec §8), exercised through the public crate API
//! against the scripted demo adapters rather than live venues.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use spreadwatch::adapter::demo::{book_event, ScriptedAdapter};
use spreadwatch::adapter::Snapshot;
use spreadwatch::book::{BookStore, SlotKind};
use spreadwatch::bus::FanoutBus;
use spreadwatch::config::Config;
use spreadwatch::decimal::Price;
use spreadwatch::ids::{CanonicalId, Channel, VenueId, VenueSymbol};
use spreadwatch::multiplexer::Multiplexer;
use spreadwatch::poller::PollingController;
use spreadwatch::registry::SymbolRegistry;
use spreadwatch::spread::{self, Classification, SpreadEngine};
use tokio_util::sync::CancellationToken;

fn venue(s: &str) -> VenueId {
    VenueId::new(s).unwrap()
}

fn id(s: &str) -> CanonicalId {
    CanonicalId::parse(s).unwrap()
}

/// Scenario 1/2: two venues publish stable, then moderately diverging,
/// quotes. Classification moves quiet -> elevated as the gap widens, never
/// reaching arbitrage_candidate below threshold.
#[tokio::test]
async fn two_venue_quote_quiet_then_elevated() {
    let cfg = Config::example_two_venue("a", "b", "BTC-USDC-PERP").unwrap();
    let bus = FanoutBus::new(cfg.fanout_channel_capacity);
    let book = Arc::new(BookStore::new(bus));
    let engine = SpreadEngine::new();
    let btc = id("BTC-USDC-PERP");
    let anchor = venue("a");

    book.apply(spreadwatch::book::BookEntry {
        venue: venue("a"),
        id: btc.clone(),
        bid: Price::parse("50000"),
        bid_size: None,
        ask: Price::parse("50002"),
        ask_size: None,
        last: None,
        last_size: None,
        event_time: Instant::now(),
        ingest_time: Instant::now(),
        source: spreadwatch::book::BookSource::Stream,
        seq: 1,
    });
    book.apply(spreadwatch::book::BookEntry {
        venue: venue("b"),
        id: btc.clone(),
        bid: Price::parse("50010"),
        bid_size: None,
        ask: Price::parse("50012"),
        ask_size: None,
        last: None,
        last_size: None,
        event_time: Instant::now(),
        ingest_time: Instant::now(),
        source: spreadwatch::book::BookSource::Stream,
        seq: 1,
    });

    let summary = engine
        .recompute(&book, &btc, &cfg.spread, cfg.freshness.stale_after, &anchor, cfg.decimal_scale, Instant::now())
        .unwrap();
    assert_eq!(summary.classification, Classification::Quiet);

    // Venue b's quote jumps to a ~0.2% gap: elevated but not arbitrage.
    book.apply(spreadwatch::book::BookEntry {
        venue: venue("b"),
        id: btc.clone(),
        bid: Price::parse("50110"),
        bid_size: None,
        ask: Price::parse("50112"),
        ask_size: None,
        last: None,
        last_size: None,
        event_time: Instant::now(),
        ingest_time: Instant::now(),
        source: spreadwatch::book::BookSource::Stream,
        seq: 2,
    });
    let summary = engine
        .recompute(&book, &btc, &cfg.spread, cfg.freshness.stale_after, &anchor, cfg.decimal_scale, Instant::now())
        .unwrap();
    assert_eq!(summary.classification, Classification::Elevated);
}

/// Scenario 3/4: spread widens past the arbitrage threshold with the anchor
/// venue participating, arming the Polling Controller; once the condition
/// lapses for longer than the dwell, it disarms.
#[tokio::test]
async fn arbitrage_candidate_arms_and_disarms_polling() {
    let cfg = Config::example_two_venue("a", "b", "BTC-USDC-PERP").unwrap();
    let bus = FanoutBus::new(cfg.fanout_channel_capacity);
    let book = Arc::new(BookStore::new(bus.clone()));
    let btc = id("BTC-USDC-PERP");
    let anchor = venue("a");

    book.apply(spreadwatch::book::BookEntry {
        venue: anchor.clone(),
        id: btc.clone(),
        bid: Price::parse("50000"),
        bid_size: None,
        ask: Price::parse("50002"),
        ask_size: None,
        last: None,
        last_size: None,
        event_time: Instant::now(),
        ingest_time: Instant::now(),
        source: spreadwatch::book::BookSource::Stream,
        seq: 1,
    });
    book.apply(spreadwatch::book::BookEntry {
        venue: venue("b"),
        id: btc.clone(),
        bid: Price::parse("50300"),
        bid_size: None,
        ask: Price::parse("50302"),
        ask_size: None,
        last: None,
        last_size: None,
        event_time: Instant::now(),
        ingest_time: Instant::now(),
        source: spreadwatch::book::BookSource::Stream,
        seq: 1,
    });

    let summary = spread::compute(&book, &btc, &cfg.spread, cfg.freshness.stale_after, &anchor, cfg.decimal_scale, Instant::now());
    assert_eq!(summary.classification, Classification::ArbitrageCandidate);

    let mut registry = SymbolRegistry::new();
    registry
        .register(anchor.clone(), VenueSymbol::new("BTC_USDC_PERP"), btc.clone())
        .unwrap();
    let registry = Arc::new(registry);
    let adapter = Arc::new(ScriptedAdapter::new(vec![]));
    adapter.set_snapshot(Snapshot {
        bid: Price::parse("50000"),
        bid_size: None,
        ask: Price::parse("50002"),
        ask_size: None,
        event_time: Instant::now(),
    });
    let mut adapters: HashMap<VenueId, Arc<dyn spreadwatch::adapter::VenueAdapter>> = HashMap::new();
    adapters.insert(anchor.clone(), adapter);

    let controller = PollingController::new(
        book.clone(),
        registry,
        bus,
        cfg.poll.clone(),
        Duration::from_millis(60),
        adapters,
    );

    controller
        .on_spread_update(&btc, &anchor, summary.classification, true)
        .await;
    assert!(controller.is_armed(&btc, &anchor).await);

    // The poller actually reaches the book: its write lands in the polled
    // slot, distinct from the stream-sourced entry written above.
    tokio::time::timeout(Duration::from_millis(300), async {
        loop {
            if book.get(&anchor, &btc, SlotKind::Polled).is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("polled entry should appear in the polled slot");

    // Quotes converge; condition lapses immediately but dwell hasn't passed.
    controller.on_spread_update(&btc, &anchor, Classification::Quiet, true).await;
    assert!(controller.is_armed(&btc, &anchor).await);

    tokio::time::sleep(Duration::from_millis(80)).await;
    controller.on_spread_update(&btc, &anchor, Classification::Quiet, true).await;
    assert!(!controller.is_armed(&btc, &anchor).await);

    // Disarming tombstones only the polled slot; the stream-sourced entry
    // written at the top of this test is unaffected (spec §8 scenario 4).
    assert!(book.get(&anchor, &btc, SlotKind::Polled).is_none());
    let stream_entry = book.get(&anchor, &btc, SlotKind::Stream).unwrap();
    assert_eq!(stream_entry.bid, Price::parse("50000"));
}

/// Scenario 5: the same instrument is listed under three different native
/// symbol forms across three venues; the registry unifies them under one
/// canonical id and the spread engine sees all three.
#[tokio::test]
async fn cross_venue_symbol_unification() {
    let mut registry = SymbolRegistry::new();
    let qe = HashMap::from([("USDT".to_string(), "USDC".to_string())]);
    let btc = id("BTC-USDC-PERP");

    let (b, q, k) = spreadwatch::registry::parse_native(
        spreadwatch::registry::NativeForm::ColonSuffixedPair,
        "BTC/USDC:PERP",
        &qe,
    )
    .unwrap();
    assert_eq!(format!("{b}-{q}-{k}"), "BTC-USDC-PERP");
    registry.register(venue("a"), VenueSymbol::new("BTC/USDC:PERP"), btc.clone()).unwrap();

    let (b, q, k) = spreadwatch::registry::parse_native(
        spreadwatch::registry::NativeForm::UnderscoreTriple,
        "BTC_USDT_PERP",
        &qe,
    )
    .unwrap();
    assert_eq!(format!("{b}-{q}-{k}"), "BTC-USDC-PERP");
    registry.register(venue("b"), VenueSymbol::new("BTC_USDT_PERP"), btc.clone()).unwrap();

    registry.register(venue("c"), VenueSymbol::new("BTC_USDC_PERP"), btc.clone()).unwrap();

    assert_eq!(registry.venues_for(&btc).len(), 3);
}

/// Scenario 6: a venue disconnects; its entries age past `stale_after` and
/// are excluded from the mid-price calculation while remaining listed as
/// `participating`.
#[tokio::test]
async fn venue_disconnect_drives_stale_classification() {
    let cfg = Config::example_two_venue("a", "b", "BTC-USDC-PERP").unwrap();
    let bus = FanoutBus::new(cfg.fanout_channel_capacity);
    let book = Arc::new(BookStore::new(bus));
    let btc = id("BTC-USDC-PERP");

    book.apply(spreadwatch::book::BookEntry {
        venue: venue("a"),
        id: btc.clone(),
        bid: Price::parse("50000"),
        bid_size: None,
        ask: Price::parse("50002"),
        ask_size: None,
        last: None,
        last_size: None,
        event_time: Instant::now(),
        ingest_time: Instant::now(),
        source: spreadwatch::book::BookSource::Stream,
        seq: 1,
    });
    book.apply(spreadwatch::book::BookEntry {
        venue: venue("b"),
        id: btc.clone(),
        bid: Price::parse("50010"),
        bid_size: None,
        ask: Price::parse("50012"),
        ask_size: None,
        last: None,
        last_size: None,
        event_time: Instant::now(),
        ingest_time: Instant::now(),
        source: spreadwatch::book::BookSource::Stream,
        seq: 1,
    });

    tokio::time::sleep(Duration::from_millis(10)).await;

    // Venue b "disconnects": no further updates arrive, and stale_after is
    // set shorter than its age so it drops out of mid-price calculation.
    let summary = spread::compute(&book, &btc, &cfg.spread, Duration::from_millis(5), &venue("a"), cfg.decimal_scale, Instant::now());
    assert!(summary.stale.contains(&venue("b")));
    assert!(summary.participating.contains(&venue("b")));
    assert_eq!(summary.classification, Classification::InsufficientData);
}

/// Full wiring smoke test: a Multiplexer running against a scripted adapter
/// feeds the Book Store, which the Spread Engine can then read from.
#[tokio::test]
async fn multiplexer_to_book_store_to_spread_engine_pipeline() {
    let symbol = VenueSymbol::new("BTC_USDC_PERP");
    let btc = id("BTC-USDC-PERP");
    let mut registry = SymbolRegistry::new();
    registry.register(venue("a"), symbol.clone(), btc.clone()).unwrap();
    registry.register(venue("b"), symbol.clone(), btc.clone()).unwrap();
    let registry = Arc::new(registry);

    let bus = FanoutBus::new(32);
    let book = Arc::new(BookStore::new(bus.clone()));

    let adapter_a = Arc::new(ScriptedAdapter::new(vec![symbol.clone()]));
    let adapter_b = Arc::new(ScriptedAdapter::new(vec![symbol.clone()]));
    adapter_a.push_event(book_event("BTC_USDC_PERP", "50000", "50002"));
    adapter_b.push_event(book_event("BTC_USDC_PERP", "50010", "50012"));

    let mut desired = HashSet::new();
    desired.insert((btc.clone(), Channel::Book));

    let cfg = Config::example_two_venue("a", "b", "BTC-USDC-PERP").unwrap();

    let mux_a = Arc::new(Multiplexer::new(
        venue("a"),
        adapter_a,
        registry.clone(),
        book.clone(),
        bus.clone(),
        cfg.reconnect.clone(),
        desired.clone(),
    ));
    let mux_b = Arc::new(Multiplexer::new(
        venue("b"),
        adapter_b,
        registry,
        book.clone(),
        bus,
        cfg.reconnect.clone(),
        desired,
    ));

    let cancel = CancellationToken::new();
    let (ca, cb) = (cancel.clone(), cancel.clone());
    let (ma, mb) = (mux_a.clone(), mux_b.clone());
    let ha = tokio::spawn(async move { ma.run(ca).await });
    let hb = tokio::spawn(async move { mb.run(cb).await });

    let engine = SpreadEngine::new();
    let summary = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            if let Some(s) = engine.recompute(
                &book,
                &btc,
                &cfg.spread,
                cfg.freshness.stale_after,
                &venue("a"),
                cfg.decimal_scale,
                Instant::now(),
            ) {
                if s.mid_prices.len() == 2 {
                    return s;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("both venues should be visible to the spread engine");

    assert_eq!(summary.classification, Classification::Quiet);

    cancel.cancel();
    let _ = ha.await;
    let _ = hb.await;
}
