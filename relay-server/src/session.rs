//! Session Store
//!
//! Single owner of the authoritative playback session. Every mutation goes
//! through [`SessionStore::apply`], which updates the session under the
//! lock and broadcasts the resulting state to every subscribed connection,
//! the sender included (echo suppression is the client's job, not the
//! relay's).

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use watchparty_core::sync::{ControlEvent, ControlMessage, ServerMessage, Session, SessionSnapshot};

/// Broadcast buffer; a viewer lagging this far behind starts missing
/// events and catches up with the next one, since every broadcast carries
/// the full session state
const EVENT_BUFFER: usize = 64;

pub struct SessionStore {
    session: Mutex<Session>,
    events: broadcast::Sender<ServerMessage>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            session: Mutex::new(Session::new()),
            events,
        }
    }

    /// Snapshot for a joining viewer (final state, never message history)
    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().snapshot()
    }

    /// Subscribe to state broadcasts
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.events.subscribe()
    }

    /// Apply a control message and broadcast the resulting state to all
    /// subscribers.
    ///
    /// Returns the broadcast event, or None when the message was rejected
    /// (nothing is mutated or broadcast in that case).
    pub fn apply(&self, msg: &ControlMessage) -> Option<ControlEvent> {
        let snapshot = {
            let mut session = self.session.lock();
            if !session.apply_control(msg) {
                return None;
            }
            session.snapshot()
        };

        let event = ControlEvent {
            session: snapshot,
            kind: msg.kind,
        };
        // A send error just means nobody is connected right now
        let _ = self.events.send(ServerMessage::ControlEvent(event.clone()));
        debug!("Applied {:?}, broadcasting", msg.kind);
        Some(event)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
