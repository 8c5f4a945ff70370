//! Connection handling for the relay server

use std::env;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use watchparty_core::sync::{ClientMessage, ServerMessage};

use crate::metrics::{LogLevel, Metrics, ServerStatus};
use crate::session::SessionStore;

/// Default listen port when PORT is unset
const DEFAULT_PORT: u16 = 5000;

/// Events sent from network to dashboard
#[derive(Debug)]
#[allow(dead_code)]
pub enum NetworkEvent {
    Ready { addr: String },
}

/// Shared state handed to every connection handler
struct AppState {
    store: SessionStore,
    metrics: Arc<RwLock<Metrics>>,
}

/// Get the listen port from the environment
fn listen_port() -> u16 {
    env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Run the relay with dashboard integration
pub async fn run_with_dashboard(
    metrics: Arc<RwLock<Metrics>>,
    event_tx: mpsc::UnboundedSender<NetworkEvent>,
) -> Result<(), Box<dyn std::error::Error>> {
    let port = listen_port();

    {
        let mut m = metrics.write();
        m.port = port;
    }

    let state = Arc::new(AppState {
        store: SessionStore::new(),
        metrics: Arc::clone(&metrics),
    });

    // Any origin may connect; the only real surface is the websocket upgrade
    let app = Router::new()
        .route("/", get(|| async { "WatchParty relay" }))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    let addr = listener.local_addr()?;
    info!("Relay listening on {}", addr);

    let _ = event_tx.send(NetworkEvent::Ready {
        addr: addr.to_string(),
    });
    {
        let mut m = metrics.write();
        m.status = ServerStatus::Running;
        m.log(LogLevel::Info, format!("Listening on {}", addr));
    }

    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let viewer_id = state.metrics.write().viewer_joined();
    info!("Viewer {} connected", viewer_id);

    let (mut sender, mut receiver) = socket.split();

    // Subscribe before snapshotting so no event between the two is lost
    let mut events = state.store.subscribe();

    // A joining viewer gets the current state, never message history
    let sync_state = ServerMessage::SyncState(state.store.snapshot());
    match serde_json::to_string(&sync_state) {
        Ok(json) => {
            if sender.send(Message::Text(json.into())).await.is_err() {
                state.metrics.write().viewer_left(viewer_id);
                return;
            }
        }
        Err(e) => warn!("Failed to encode sync_state: {}", e),
    }

    // Outbound: broadcast events to this socket
    let mut send_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(msg) => {
                    let Ok(json) = serde_json::to_string(&msg) else {
                        continue;
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                // Skipped events are fine: each broadcast carries the full state
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Viewer lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Inbound: control messages into the store
    let recv_state = Arc::clone(&state);
    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    debug!("Websocket error from viewer {}: {}", viewer_id, e);
                    break;
                }
            };

            match message {
                Message::Text(text) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Control(control)) => {
                            debug!("Received control from viewer {}: {:?}", viewer_id, control);
                            match recv_state.store.apply(&control) {
                                Some(event) => {
                                    recv_state.metrics.write().control_applied(viewer_id, &event);
                                }
                                None => {
                                    recv_state
                                        .metrics
                                        .write()
                                        .log(LogLevel::Warning, "Rejected malformed control");
                                }
                            }
                        }
                        // Unknown or undecodable controls are dropped, never applied
                        Err(e) => {
                            warn!("Undecodable message from viewer {}: {}", viewer_id, e);
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("Viewer {} disconnected", viewer_id);
    state.metrics.write().viewer_left(viewer_id);
}

/// Run with plain logging (no dashboard)
pub async fn run_with_logging(
    metrics: Arc<RwLock<Metrics>>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging mode
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("watchparty_relay=info".parse()?)
                .add_directive("watchparty_core=info".parse()?)
                .add_directive("tower_http=warn".parse()?),
        )
        .init();

    let (tx, _rx) = mpsc::unbounded_channel();
    run_with_dashboard(metrics, tx).await
}
