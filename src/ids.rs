//! Process-wide identity types (spec §3).
//!
//! `CanonicalId` and `VenueId` are validated at construction and are `Copy`-ish
//! cheap to clone (`Arc<str>` backed) since they flow through every message on
//! the bus. `VenueSymbol` stays a plain owned `String` — it must never leak
//! out of the `registry`/`adapter` boundary (spec §3).

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::ConfigError;

/// `BASE-QUOTE-KIND`, e.g. `BTC-USDC-PERP`. Stable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CanonicalId(Arc<str>);

impl CanonicalId {
    /// Parses and validates the `BASE-QUOTE-KIND` grammar.
    pub fn parse(s: impl AsRef<str>) -> Result<Self, ConfigError> {
        let s = s.as_ref();
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(ConfigError::MalformedCanonicalId(s.to_string()));
        }
        Ok(Self(Arc::from(s)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn base(&self) -> &str {
        self.0.split('-').next().unwrap_or_default()
    }

    pub fn quote(&self) -> &str {
        self.0.split('-').nth(1).unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.0.split('-').nth(2).unwrap_or_default()
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short lowercase venue identifier, finite and known at startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct VenueId(Arc<str>);

impl VenueId {
    pub fn new(s: impl AsRef<str>) -> Result<Self, ConfigError> {
        let s = s.as_ref();
        if s.is_empty() || s.len() > 32 || !s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
            return Err(ConfigError::UnknownVenue(s.to_string()));
        }
        Ok(Self(Arc::from(s)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Venue-native symbol string. Confined to the registry and adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VenueSymbol(String);

impl VenueSymbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Subscription channel kind for a (venue, instrument) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Book,
    Trade,
}
