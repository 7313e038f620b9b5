//! Symbol Registry (spec §4.1).
//!
//! Bidirectional venue-symbol <-> canonical-id mapping. Immutable after
//! initialization (spec §5's "shared-resource policy"): all writes happen at
//! `register` time during startup, after which lookups never block and never
//! fail due to network state.
//!
//! Venue-native symbol derivation is table-driven (spec §4.1's three native
//! forms), not embedded per-venue code paths — directly answering spec §9's
//! complaint about the source hard-coding venue rules in ad hoc methods.

use std::collections::{HashMap, HashSet};

use crate::error::RegistryError;
use crate::ids::{CanonicalId, VenueId, VenueSymbol};

/// The three native symbol shapes in scope (spec §4.1 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeForm {
    /// `BTC/USDC:PERP`
    ColonSuffixedPair,
    /// `BTC_USDC_PERP`
    UnderscoreTriple,
}

/// Parses a venue-native symbol into `(base, quote, kind)` given its form and
/// the configured quote-equivalence table (e.g. `USDT -> USDC`).
pub fn parse_native(
    form: NativeForm,
    native: &str,
    quote_equivalence: &HashMap<String, String>,
) -> Option<(String, String, String)> {
    let (base, quote, kind) = match form {
        NativeForm::ColonSuffixedPair => {
            let (pair, kind) = native.split_once(':')?;
            let (base, quote) = pair.split_once('/')?;
            (base.to_string(), quote.to_string(), kind.to_string())
        }
        NativeForm::UnderscoreTriple => {
            let mut parts = native.split('_');
            let base = parts.next()?.to_string();
            let quote = parts.next()?.to_string();
            let kind = parts.next()?.to_string();
            if parts.next().is_some() {
                return None;
            }
            (base, quote, kind)
        }
    };
    let canonical_quote = quote_equivalence.get(&quote).cloned().unwrap_or(quote);
    Some((base, canonical_quote, kind))
}

#[derive(Debug, Default)]
pub struct SymbolRegistry {
    canonical_of: HashMap<(VenueId, VenueSymbol), CanonicalId>,
    native_of: HashMap<(CanonicalId, VenueId), VenueSymbol>,
    venues_for: HashMap<CanonicalId, HashSet<VenueId>>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: registering the same `(venue, native, id)` twice is a
    /// no-op; registering a conflicting id for an existing `(venue, native)`
    /// fails with `CanonicalConflict` (spec §4.1).
    pub fn register(
        &mut self,
        venue: VenueId,
        native: VenueSymbol,
        id: CanonicalId,
    ) -> Result<(), RegistryError> {
        let key = (venue.clone(), native.clone());
        if let Some(existing) = self.canonical_of.get(&key) {
            if *existing != id {
                return Err(RegistryError::CanonicalConflict {
                    venue,
                    native: native.as_str().to_string(),
                    existing: existing.clone(),
                    attempted: id,
                });
            }
            return Ok(());
        }
        self.canonical_of.insert(key, id.clone());
        self.native_of.insert((id.clone(), venue.clone()), native);
        self.venues_for.entry(id).or_default().insert(venue);
        Ok(())
    }

    pub fn canonical_of(&self, venue: &VenueId, native: &VenueSymbol) -> Result<CanonicalId, RegistryError> {
        self.canonical_of
            .get(&(venue.clone(), native.clone()))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                venue: venue.clone(),
                native: native.as_str().to_string(),
            })
    }

    pub fn native_of(&self, id: &CanonicalId, venue: &VenueId) -> Result<VenueSymbol, RegistryError> {
        self.native_of
            .get(&(id.clone(), venue.clone()))
            .cloned()
            .ok_or_else(|| RegistryError::NotListed {
                id: id.clone(),
                venue: venue.clone(),
            })
    }

    pub fn venues_for(&self, id: &CanonicalId) -> HashSet<VenueId> {
        self.venues_for.get(id).cloned().unwrap_or_default()
    }
}
