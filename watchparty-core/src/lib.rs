//! WatchParty - Core Library
//!
//! This library provides the core functionality for keeping video playback
//! synchronized across viewers through a central relay: the wire protocol,
//! the authoritative session state, and the per-viewer reconciliation
//! engine with echo suppression.

pub mod client;
pub mod net;
pub mod player;
pub mod sync;
pub mod time_cache;
pub mod video_id;

// Re-exports for convenience
pub use client::{ControlSink, SyncClient};
pub use net::{RelayEvent, RelayHandle};
pub use player::{Player, PlayerError, PlayerState, SafePlayer};
pub use sync::{ControlKind, ControlMessage, ServerMessage, Session, SessionSnapshot};
pub use video_id::VideoId;
