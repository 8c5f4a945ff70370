//! Relay Connection
//!
//! Owns the websocket to the relay in a background task and exposes a
//! command/event channel pair to the rest of the client. Messages are
//! fire-and-forget: there is no retry or reconnect logic, and a fresh
//! connection receives a fresh `sync_state` from the relay.

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::client::ControlSink;
use crate::sync::{ClientMessage, ControlMessage, ServerMessage};

/// Errors establishing the relay connection
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// Events emitted by the relay connection task
#[derive(Debug)]
pub enum RelayEvent {
    /// Connection is established and messages may flow
    Connected,
    /// A message from the relay
    Message(ServerMessage),
    /// Transport-level error; the connection is going down
    Error(String),
    /// The connection ended
    Disconnected,
}

/// Commands sent to the relay connection task
#[derive(Debug)]
pub enum RelayCommand {
    /// Send a control message to the relay
    Send(ControlMessage),
    /// Close the connection
    Shutdown,
}

/// Handle to the running relay connection
#[derive(Clone)]
pub struct RelayHandle {
    command_tx: mpsc::UnboundedSender<RelayCommand>,
}

impl RelayHandle {
    pub fn send(&self, command: RelayCommand) {
        if self.command_tx.send(command).is_err() {
            warn!("Relay task closed, dropping command");
        }
    }

    pub fn shutdown(&self) {
        self.send(RelayCommand::Shutdown);
    }
}

impl ControlSink for RelayHandle {
    fn send_control(&self, msg: ControlMessage) {
        self.send(RelayCommand::Send(msg));
    }
}

/// Connect to the relay and spawn the connection task
pub async fn connect(
    url: &str,
) -> Result<(RelayHandle, mpsc::UnboundedReceiver<RelayEvent>), RelayError> {
    let (ws, _) = connect_async(url).await?;
    info!("Connected to relay at {}", url);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let _ = event_tx.send(RelayEvent::Connected);
    tokio::spawn(run(ws, event_tx, command_rx));

    Ok((RelayHandle { command_tx }, event_rx))
}

async fn run(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    event_tx: mpsc::UnboundedSender<RelayEvent>,
    mut command_rx: mpsc::UnboundedReceiver<RelayCommand>,
) {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(msg) => {
                            let _ = event_tx.send(RelayEvent::Message(msg));
                        }
                        Err(e) => warn!("Undecodable relay message: {}", e),
                    }
                }
                Some(Ok(tungstenite::Message::Close(_))) | None => break,
                // Ping/pong is handled by the library
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = event_tx.send(RelayEvent::Error(e.to_string()));
                    break;
                }
            },
            command = command_rx.recv() => match command {
                Some(RelayCommand::Send(msg)) => {
                    let payload = match serde_json::to_string(&ClientMessage::Control(msg)) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!("Failed to encode control: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(tungstenite::Message::Text(payload.into())).await {
                        let _ = event_tx.send(RelayEvent::Error(e.to_string()));
                        break;
                    }
                }
                Some(RelayCommand::Shutdown) | None => break,
            },
        }
    }

    debug!("Relay connection task ended");
    let _ = event_tx.send(RelayEvent::Disconnected);
}
