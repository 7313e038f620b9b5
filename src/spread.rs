//! Spread Engine (spec §4.4).
//!
//! Recomputes the cross-venue spread summary for a canonical id on every
//! ingest event touching it. Side-effect-free and idempotent: bad inputs are
//! simply excluded, never propagated as errors (spec §4.4's "Failure"
//! clause).
//!
//! Grounded on `arbitrage::engine::ArbitrageEngine`'s confidence/threshold
//! checks (generalized here from a fixed Polymarket/Kalshi pair into an
//! N-venue max-pair scan) and on the Python ancestor's `SpreadData.
//! calculate_spread` (`original_source` `multi_exchange_monitor/models.py`),
//! which is the direct precedent for "take min/max across available prices,
//! percentage over the lower one".

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::book::BookStore;
use crate::config::SpreadConfig;
use crate::decimal::Price;
use crate::ids::{CanonicalId, VenueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Quiet,
    Elevated,
    ArbitrageCandidate,
    InsufficientData,
}

#[derive(Debug, Clone)]
pub struct SpreadSummary {
    pub id: CanonicalId,
    pub participating: HashSet<VenueId>,
    pub stale: HashSet<VenueId>,
    pub best_bid_venue: Option<VenueId>,
    pub best_ask_venue: Option<VenueId>,
    pub mid_prices: HashMap<VenueId, Price>,
    pub max_spread_abs: Option<Price>,
    pub max_spread_pct: Option<Decimal>,
    pub max_pair: Option<(VenueId, VenueId)>,
    pub classification: Classification,
    pub updated_at: Instant,
}

/// Recomputes the spread summary for `id` from the Book Store's current
/// view. Returns `None` when fewer than two fresh venues participate (spec:
/// "no SpreadUpdate emitted" for `insufficient_data` — callers choose whether
/// to still surface the `insufficient_data` transition, see
/// `spread::SpreadEngine::recompute`).
pub fn compute(
    book: &BookStore,
    id: &CanonicalId,
    cfg: &SpreadConfig,
    stale_after: std::time::Duration,
    anchor: &VenueId,
    scale: u32,
    now: Instant,
) -> SpreadSummary {
    let books = book.snapshot_by_id(id);
    let mut stale = HashSet::new();
    let mut mids: HashMap<VenueId, Price> = HashMap::new();

    for (venue, entry) in &books {
        if entry.age(now) > stale_after {
            stale.insert(venue.clone());
            continue;
        }
        if let Some(mid) = entry.mid(scale) {
            mids.insert(venue.clone(), mid);
        }
    }

    let participating: HashSet<VenueId> = books.keys().cloned().collect();

    if mids.len() < 2 {
        return SpreadSummary {
            id: id.clone(),
            participating,
            stale,
            best_bid_venue: None,
            best_ask_venue: None,
            mid_prices: mids,
            max_spread_abs: None,
            max_spread_pct: None,
            max_pair: None,
            classification: Classification::InsufficientData,
            updated_at: now,
        };
    }

    // Lexicographic tie-break on (VenueId, VenueId) pairs (spec §4.4).
    let mut venues: Vec<&VenueId> = mids.keys().collect();
    venues.sort();

    let mut best: Option<(VenueId, VenueId, Price, Decimal)> = None;
    for i in 0..venues.len() {
        for j in (i + 1)..venues.len() {
            let (va, vb) = (venues[i], venues[j]);
            let (pa, pb) = (mids[va], mids[vb]);
            let abs = Price::abs_diff(pa, pb);
            let denom = if pa.0 < pb.0 { pa.0 } else { pb.0 };
            if denom.is_zero() {
                continue;
            }
            let pct = (abs.0 / denom) * Decimal::from(100);
            let better = match &best {
                None => true,
                Some((_, _, best_abs, _)) => abs.0 > best_abs.0,
            };
            if better {
                best = Some((va.clone(), vb.clone(), abs, pct));
            }
        }
    }

    let (max_pair, max_spread_abs, max_spread_pct) = match best {
        Some((a, b, abs, pct)) => (Some((a, b)), Some(abs), Some(pct)),
        None => (None, None, None),
    };

    let classification = match max_spread_pct {
        Some(pct) if pct >= cfg.arbitrage_pct && participating.contains(anchor) => {
            Classification::ArbitrageCandidate
        }
        Some(pct) if pct >= cfg.elevated_pct => Classification::Elevated,
        Some(_) => Classification::Quiet,
        None => Classification::InsufficientData,
    };

    let best_bid_venue = books
        .iter()
        .filter(|(v, _)| !stale.contains(*v))
        .filter_map(|(v, e)| e.bid.map(|b| (v, b)))
        .max_by_key(|(_, b)| *b)
        .map(|(v, _)| v.clone());
    let best_ask_venue = books
        .iter()
        .filter(|(v, _)| !stale.contains(*v))
        .filter_map(|(v, e)| e.ask.map(|a| (v, a)))
        .min_by_key(|(_, a)| *a)
        .map(|(v, _)| v.clone());

    SpreadSummary {
        id: id.clone(),
        participating,
        stale,
        best_bid_venue,
        best_ask_venue,
        mid_prices: mids,
        max_spread_abs,
        max_spread_pct,
        max_pair,
        classification,
        updated_at: now,
    }
}

/// Tracks the last-emitted summary per canonical id and decides whether a
/// `SpreadUpdate` should be published (spec: `insufficient_data` transitions
/// ARE emitted per scenario 6/testable-properties so that listeners observe
/// the drop from 2 to 1 fresh venues; the "no SpreadUpdate" rule in §4.4
/// governs the case where fewer than two venues were ever participating).
pub struct SpreadEngine {
    last: parking_lot::RwLock<HashMap<CanonicalId, Arc<SpreadSummary>>>,
}

impl SpreadEngine {
    pub fn new() -> Self {
        Self { last: parking_lot::RwLock::new(HashMap::new()) }
    }

    pub fn recompute(
        &self,
        book: &BookStore,
        id: &CanonicalId,
        cfg: &SpreadConfig,
        stale_after: std::time::Duration,
        anchor: &VenueId,
        scale: u32,
        now: Instant,
    ) -> Option<Arc<SpreadSummary>> {
        let had_prior = self.last.read().contains_key(id);
        let summary = compute(book, id, cfg, stale_after, anchor, scale, now);

        if summary.classification == Classification::InsufficientData && !had_prior {
            // Never participated meaningfully; spec §4.4 says no update.
            return None;
        }

        let summary = Arc::new(summary);
        self.last.write().insert(id.clone(), summary.clone());
        Some(summary)
    }

    pub fn last_for(&self, id: &CanonicalId) -> Option<Arc<SpreadSummary>> {
        self.last.read().get(id).cloned()
    }
}

impl Default for SpreadEngine {
    fn default() -> Self {
        Self::new()
    }
}
