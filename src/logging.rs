//! Structured logging init (spec §9: replaces "a single process-wide logger
//! captured by global side effect" with explicit, filterable context).
//!
//! Grounded on the teacher's `init_tracing` in `main.rs`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spreadwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
