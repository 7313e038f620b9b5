//! Typed error taxonomy (spec §7).
//!
//! Component-local errors are recovered locally; only `Configuration` and
//! `Invariant` are meant to propagate out of the supervisor and terminate the
//! process. Everything else drives a state machine or increments a counter.

use thiserror::Error;

use crate::ids::{CanonicalId, VenueId};

/// Errors raised while loading or validating startup configuration.
///
/// Fatal: the supervisor exits the process on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown venue referenced: {0}")]
    UnknownVenue(String),

    #[error("malformed canonical id `{0}`, expected BASE-QUOTE-KIND")]
    MalformedCanonicalId(String),

    #[error("no anchor venue configured among: {0:?}")]
    MissingAnchor(Vec<String>),

    #[error("missing or invalid environment variable `{0}`: {1}")]
    InvalidEnvVar(&'static str, String),
}

/// Errors raised by the Symbol Registry.
///
/// Never fatal; callers drop the offending event and increment a counter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no canonical id registered for {venue}:{native}")]
    NotFound { venue: VenueId, native: String },

    #[error("{id} is not listed on venue {venue}")]
    NotListed { id: CanonicalId, venue: VenueId },

    #[error("{venue}:{native} already maps to {existing}, cannot also map to {attempted}")]
    CanonicalConflict {
        venue: VenueId,
        native: String,
        existing: CanonicalId,
        attempted: CanonicalId,
    },
}

/// Transient network failures; drive the venue state machine or poller backoff.
#[derive(Debug, Error, Clone)]
pub enum TransientError {
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("heartbeat timed out after {0:?}")]
    HeartbeatTimeout(std::time::Duration),

    #[error("REST fetch timed out after {0:?}")]
    RestTimeout(std::time::Duration),

    #[error("stream closed: {0}")]
    StreamClosed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// An inbound event failed normalization invariants (e.g. bid > ask).
#[derive(Debug, Error, Clone)]
#[error("protocol error from {venue} for {id:?}: {reason}")]
pub struct ProtocolError {
    pub venue: VenueId,
    pub id: Option<CanonicalId>,
    pub reason: String,
}

/// A bug: an internal invariant was violated. Intentionally fatal (spec §7).
#[derive(Debug, Error)]
pub enum InvariantViolation {
    #[error("seq regression for ({venue}, {id}): stored={stored} incoming={incoming}")]
    SeqRegression {
        venue: VenueId,
        id: CanonicalId,
        stored: u64,
        incoming: u64,
    },

    #[error("book store invariant violated: {0}")]
    BookStore(String),
}
