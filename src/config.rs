//! Process configuration (spec §6, SPEC_FULL §10).
//!
//! Loaded from environment variables with documented defaults, in the same
//! style as the teacher crate's `models::Config::from_env`. File-format
//! config parsing (TOML/YAML) is explicitly out of scope (spec §1); this is
//! the minimal ambient loader every other component needs regardless.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;
use crate::ids::{CanonicalId, VenueId};

#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub id: VenueId,
    pub anchor: bool,
}

#[derive(Debug, Clone)]
pub struct FreshnessConfig {
    pub green: Duration,
    pub amber: Duration,
    pub stale_after: Duration,
}

#[derive(Debug, Clone)]
pub struct SpreadConfig {
    pub elevated_pct: Decimal,
    pub arbitrage_pct: Decimal,
    pub arb_dwell: Duration,
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_failures_window: u32,
    pub backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub base: Duration,
    pub cap: Duration,
    pub stability: Duration,
}

#[derive(Debug, Clone)]
pub struct TimeoutsConfig {
    pub handshake: Duration,
    pub heartbeat: Duration,
    pub rest: Duration,
}

/// Top-level configuration table (spec §6).
#[derive(Debug, Clone)]
pub struct Config {
    pub venues: Vec<VenueConfig>,
    pub universe: Vec<CanonicalId>,
    pub quote_equivalence: HashMap<String, String>,
    pub freshness: FreshnessConfig,
    pub spread: SpreadConfig,
    pub poll: PollConfig,
    pub reconnect: ReconnectConfig,
    pub timeouts: TimeoutsConfig,
    pub fanout_channel_capacity: usize,
    pub decimal_scale: u32,
}

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

impl Config {
    /// Example values from spec §6 scenario 1-4.
    pub fn example_two_venue(venue_a: &str, venue_b: &str, universe: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            venues: vec![
                VenueConfig { id: VenueId::new(venue_a)?, anchor: true },
                VenueConfig { id: VenueId::new(venue_b)?, anchor: false },
            ],
            universe: vec![CanonicalId::parse(universe)?],
            quote_equivalence: HashMap::from([("USDT".to_string(), "USDC".to_string())]),
            freshness: FreshnessConfig {
                green: Duration::from_secs(2),
                amber: Duration::from_secs(5),
                stale_after: Duration::from_secs(30),
            },
            spread: SpreadConfig {
                elevated_pct: dec!(0.1),
                arbitrage_pct: dec!(0.5),
                arb_dwell: Duration::from_millis(1000),
            },
            poll: PollConfig {
                interval: Duration::from_millis(500),
                max_failures_window: 5,
                backoff: Duration::from_secs(5),
            },
            reconnect: ReconnectConfig {
                base: Duration::from_millis(200),
                cap: Duration::from_secs(30),
                stability: Duration::from_secs(10),
            },
            timeouts: TimeoutsConfig {
                handshake: Duration::from_secs(5),
                heartbeat: Duration::from_secs(10),
                rest: Duration::from_secs(3),
            },
            fanout_channel_capacity: 256,
            decimal_scale: 8,
        })
    }

    /// Loads from environment variables, falling back to `example_two_venue`'s
    /// shape when unset. Mirrors the teacher's `Config::from_env` pattern.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::example_two_venue("a", "b", "BTC-USDC-PERP")?;

        if let Ok(v) = std::env::var("SPREADWATCH_ELEVATED_PCT") {
            cfg.spread.elevated_pct = v
                .parse()
                .map_err(|_| ConfigError::InvalidEnvVar("SPREADWATCH_ELEVATED_PCT", v))?;
        }
        if let Ok(v) = std::env::var("SPREADWATCH_ARBITRAGE_PCT") {
            cfg.spread.arbitrage_pct = v
                .parse()
                .map_err(|_| ConfigError::InvalidEnvVar("SPREADWATCH_ARBITRAGE_PCT", v))?;
        }
        if let Ok(v) = std::env::var("SPREADWATCH_POLL_INTERVAL_MS") {
            let ms: u64 = v
                .parse()
                .map_err(|_| ConfigError::InvalidEnvVar("SPREADWATCH_POLL_INTERVAL_MS", v))?;
            cfg.poll.interval = Duration::from_millis(ms);
        }
        if let Ok(v) = std::env::var("SPREADWATCH_FANOUT_CAPACITY") {
            cfg.fanout_channel_capacity = v
                .parse()
                .map_err(|_| ConfigError::InvalidEnvVar("SPREADWATCH_FANOUT_CAPACITY", v))?;
        }

        if cfg.venues.iter().all(|v| !v.anchor) {
            return Err(ConfigError::MissingAnchor(
                cfg.venues.iter().map(|v| v.id.as_str().to_string()).collect(),
            ));
        }

        Ok(cfg)
    }

    pub fn anchor_venue(&self) -> Option<&VenueId> {
        self.venues.iter().find(|v| v.anchor).map(|v| &v.id)
    }
}
