//! `spreadwatch` binary: wires a [`Supervisor`] from configuration, runs it
//! until Ctrl-C, and prints a final health snapshot. Mirrors the shape of the
//! teacher's `main.rs` entrypoint, minus the axum server (that lives in
//! `bin/pushd.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use spreadwatch::adapter::demo::{book_event, ScriptedAdapter};
use spreadwatch::adapter::{Snapshot, VenueAdapter};
use spreadwatch::config::Config;
use spreadwatch::decimal::Price;
use spreadwatch::ids::{CanonicalId, VenueId, VenueSymbol};
use spreadwatch::registry::SymbolRegistry;
use spreadwatch::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "spreadwatch")]
struct Args {
    /// First venue id (anchor).
    #[arg(long, default_value = "a", env = "SPREADWATCH_VENUE_A")]
    venue_a: String,

    /// Second venue id.
    #[arg(long, default_value = "b", env = "SPREADWATCH_VENUE_B")]
    venue_b: String,

    /// Canonical instrument to watch.
    #[arg(long, default_value = "BTC-USDC-PERP", env = "SPREADWATCH_UNIVERSE")]
    universe: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    spreadwatch::logging::init();
    let args = Args::parse();

    let mut config = Config::from_env()?;
    config.venues[0].id = VenueId::new(&args.venue_a)?;
    config.venues[1].id = VenueId::new(&args.venue_b)?;
    config.universe = vec![CanonicalId::parse(&args.universe)?];

    let venue_a = config.venues[0].id.clone();
    let venue_b = config.venues[1].id.clone();
    let id = config.universe[0].clone();

    // Demo adapters with a scripted two-venue quiet quote; a real deployment
    // swaps these for concrete `VenueAdapter` implementations per venue.
    let adapter_a = Arc::new(ScriptedAdapter::new(vec![VenueSymbol::new("BTC_USDC_PERP")]));
    let adapter_b = Arc::new(ScriptedAdapter::new(vec![VenueSymbol::new("BTC_USDC_PERP")]));
    adapter_a.set_snapshot(Snapshot {
        bid: Price::parse("50000"),
        bid_size: None,
        ask: Price::parse("50002"),
        ask_size: None,
        event_time: std::time::Instant::now(),
    });
    adapter_a.push_event(book_event("BTC_USDC_PERP", "50000", "50002"));
    adapter_b.push_event(book_event("BTC_USDC_PERP", "50010", "50012"));

    let mut adapters: HashMap<VenueId, Arc<dyn VenueAdapter>> = HashMap::new();
    adapters.insert(venue_a.clone(), adapter_a.clone());
    adapters.insert(venue_b.clone(), adapter_b.clone());

    let mut native_symbols = HashMap::new();
    native_symbols.insert((venue_a.clone(), id.clone()), VenueSymbol::new("BTC_USDC_PERP"));
    native_symbols.insert((venue_b.clone(), id.clone()), VenueSymbol::new("BTC_USDC_PERP"));

    let registry = SymbolRegistry::new();
    let supervisor = Arc::new(Supervisor::build(config, registry, adapters, &native_symbols));

    let cancel = CancellationToken::new();
    let run_handle = {
        let supervisor = supervisor.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { supervisor.run(cancel).await })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
        }
    }
    cancel.cancel();
    let _ = run_handle.await;

    let health = supervisor.health().await;
    info!(?health, "final health snapshot");

    Ok(())
}
