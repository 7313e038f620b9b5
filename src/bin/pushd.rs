//! Ambient push-socket broadcaster (SPEC_FULL §2).
//!
//! A small standalone axum server that relays every Fan-out Bus `Update` to
//! connected WebSocket clients as JSON, plus a `/healthz` route. Grounded on
//! the teacher's `main.rs` axum WS handler and `edge::receiver::EdgeReceiver`;
//! not part of the spec's core, carried because the ambient stack still
//! needs an outward-facing transport for the bus.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use spreadwatch::adapter::demo::{book_event, ScriptedAdapter};
use spreadwatch::adapter::VenueAdapter;
use spreadwatch::bus::Update;
use spreadwatch::config::Config;
use spreadwatch::ids::{CanonicalId, VenueId, VenueSymbol};
use spreadwatch::registry::SymbolRegistry;
use spreadwatch::supervisor::Supervisor;

#[derive(Serialize)]
#[serde(tag = "type")]
enum WireUpdate {
    #[serde(rename = "book")]
    Book { venue: String, id: String, bid: Option<String>, ask: Option<String>, seq: u64 },
    #[serde(rename = "spread")]
    Spread { id: String, classification: String, max_spread_pct: Option<String> },
    #[serde(rename = "session")]
    Session { venue: String, from: String, to: String, reason: String },
}

fn to_wire(update: &Update) -> WireUpdate {
    match update {
        Update::BookUpdate(entry, _) => WireUpdate::Book {
            venue: entry.venue.as_str().to_string(),
            id: entry.id.as_str().to_string(),
            bid: entry.bid.map(|p| p.to_string()),
            ask: entry.ask.map(|p| p.to_string()),
            seq: entry.seq,
        },
        Update::SpreadUpdate(summary) => WireUpdate::Spread {
            id: summary.id.as_str().to_string(),
            classification: format!("{:?}", summary.classification),
            max_spread_pct: summary.max_spread_pct.map(|p| p.to_string()),
        },
        Update::SessionUpdate(venue, from, to, reason) => WireUpdate::Session {
            venue: venue.as_str().to_string(),
            from: format!("{from:?}"),
            to: format!("{to:?}"),
            reason: reason.clone(),
        },
    }
}

#[derive(Clone)]
struct AppState {
    supervisor: Arc<Supervisor>,
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.supervisor.health().await)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut sub = state.supervisor.bus().subscribe(|_| true);
    loop {
        tokio::select! {
            update = sub.recv() => {
                let Some(update) = update else { break };
                let wire = to_wire(&update);
                let Ok(text) = serde_json::to_string(&wire) else { continue };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                if msg.is_none() {
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    spreadwatch::logging::init();

    let config = Config::from_env()?;
    let venue_a = config.venues[0].id.clone();
    let venue_b = config.venues[1].id.clone();
    let id = config.universe[0].clone();

    let adapter_a = Arc::new(ScriptedAdapter::new(vec![VenueSymbol::new("BTC_USDC_PERP")]));
    let adapter_b = Arc::new(ScriptedAdapter::new(vec![VenueSymbol::new("BTC_USDC_PERP")]));
    adapter_a.push_event(book_event("BTC_USDC_PERP", "50000", "50002"));
    adapter_b.push_event(book_event("BTC_USDC_PERP", "50010", "50012"));

    let mut adapters: HashMap<VenueId, Arc<dyn VenueAdapter>> = HashMap::new();
    adapters.insert(venue_a.clone(), adapter_a);
    adapters.insert(venue_b.clone(), adapter_b);

    let mut native_symbols: HashMap<(VenueId, CanonicalId), VenueSymbol> = HashMap::new();
    native_symbols.insert((venue_a, id.clone()), VenueSymbol::new("BTC_USDC_PERP"));
    native_symbols.insert((venue_b, id), VenueSymbol::new("BTC_USDC_PERP"));

    let registry = SymbolRegistry::new();
    let supervisor = Arc::new(Supervisor::build(config, registry, adapters, &native_symbols));

    let cancel = CancellationToken::new();
    let run_handle = {
        let supervisor = supervisor.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { supervisor.run(cancel).await })
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(AppState { supervisor: supervisor.clone() });

    let addr: SocketAddr = std::env::var("SPREADWATCH_PUSHD_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;
    info!(%addr, "pushd listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::select! {
        r = axum::serve(listener, app) => { if let Err(e) = r { warn!(error = %e, "server error"); } }
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
        }
    }

    cancel.cancel();
    let _ = run_handle.await;
    Ok(())
}
