//! Health snapshot (SPEC_FULL §2 ambient additions).
//!
//! A point-in-time view of every component the Supervisor owns, serialized
//! for the optional HTTP route in `bin/pushd.rs`. Grounded on the teacher's
//! `main.rs` health endpoint, which returns a flat JSON object of the same
//! kind of per-subsystem counters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

use crate::bus::SessionState;
use crate::ids::{CanonicalId, VenueId};

#[derive(Debug, Clone, Serialize)]
pub struct VenueHealth {
    pub venue: VenueId,
    pub state: SessionState,
    pub desired_sub_count: usize,
    pub actual_sub_count: usize,
    pub unmapped_count: u64,
    pub last_error: Option<String>,
    /// Accepted stream writes per second (spec §4.7 health contract).
    pub ingest_rate: f64,
    /// Accepted snapshot polls per second against this venue, zero when no
    /// assignment is currently armed (spec §4.7 health contract).
    pub poll_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollingAssignmentHealth {
    pub id: CanonicalId,
    pub venue: VenueId,
    #[serde(skip)]
    pub started_at: Instant,
    pub armed_for_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// Wall-clock capture time; the only place in the crate that cares about
    /// `DateTime<Utc>` rather than monotonic `Instant` (spec core data stays
    /// monotonic-timed, per SPEC_FULL §3).
    pub generated_at: DateTime<Utc>,
    pub venues: Vec<VenueHealth>,
    pub subscriber_count: usize,
    pub armed_assignments: Vec<PollingAssignmentHealth>,
    pub tracked_ids: usize,
}

impl HealthSnapshot {
    pub fn venue_map(&self) -> HashMap<&str, &VenueHealth> {
        self.venues.iter().map(|v| (v.venue.as_str(), v)).collect()
    }
}
