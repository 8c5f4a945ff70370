//! Player Capability
//!
//! The embedded video player is an external dependency that may be only
//! partially initialized at any point: methods can be transiently missing
//! and position reads can be garbage right after a transition. Calls from
//! the sync engine go through [`SafePlayer`], which degrades to cached
//! values or logged no-ops instead of propagating failures.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::time_cache::{usable, TimeCache};

/// Errors surfaced by a player implementation
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("player is not initialized")]
    NotInitialized,

    #[error("player method unavailable: {0}")]
    Unavailable(&'static str),

    #[error("player call failed: {0}")]
    Failed(String),
}

/// Playback states reported by the player's change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Unstarted,
    Ended,
    Playing,
    Paused,
    Buffering,
    Cued,
}

/// Narrow interface over the embedded video player.
///
/// Every call can fail; implementations must report failure rather than
/// panic when the underlying widget is not ready.
pub trait Player: Send + Sync {
    /// Id of the currently loaded video, empty when none
    fn video_id(&self) -> Result<String, PlayerError>;

    /// Current playback position in seconds
    fn current_time(&self) -> Result<f64, PlayerError>;

    /// Current playback state
    fn player_state(&self) -> Result<PlayerState, PlayerError>;

    fn play(&self) -> Result<(), PlayerError>;

    fn pause(&self) -> Result<(), PlayerError>;

    fn seek_to(&self, time: f64, allow_seek_ahead: bool) -> Result<(), PlayerError>;

    fn load_video(&self, video_id: &str, start_time: f64) -> Result<(), PlayerError>;
}

/// Player wrapper that never fails: reads fall back to cached values and
/// commands degrade to logged no-ops.
#[derive(Clone)]
pub struct SafePlayer {
    inner: Arc<dyn Player>,
    time_cache: Arc<Mutex<TimeCache>>,
}

impl SafePlayer {
    pub fn new(player: Arc<dyn Player>) -> Self {
        Self {
            inner: player,
            time_cache: Arc::new(Mutex::new(TimeCache::new())),
        }
    }

    /// Current video id, empty string on failure
    pub fn video_id(&self) -> String {
        match self.inner.video_id() {
            Ok(id) => id,
            Err(e) => {
                warn!("video_id read failed: {}", e);
                String::new()
            }
        }
    }

    /// Current position with retry-once and cache fallback.
    ///
    /// A reading of 0 (or an invalid value) right after a transition is
    /// retried once; if the retry is no better, the last cached positive
    /// position is returned. Never reports a negative or non-finite value.
    pub fn current_time(&self) -> f64 {
        let mut cache = self.time_cache.lock();
        match self.inner.current_time() {
            Ok(time) if usable(time) => cache.accept(time),
            Ok(_) => match self.inner.current_time() {
                Ok(retry) if usable(retry) => cache.accept(retry),
                _ => cache.last_valid(),
            },
            Err(e) => {
                warn!("current_time read failed: {}", e);
                cache.last_valid()
            }
        }
    }

    /// Current playback state, None on failure
    pub fn player_state(&self) -> Option<PlayerState> {
        match self.inner.player_state() {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("player_state read failed: {}", e);
                None
            }
        }
    }

    /// Feed an externally known position (e.g. a server snapshot) into the
    /// cache
    pub fn record_time(&self, time: f64) {
        self.time_cache.lock().accept(time);
    }

    pub fn play(&self) {
        if let Err(e) = self.inner.play() {
            warn!("play failed: {}", e);
        }
    }

    pub fn pause(&self) {
        if let Err(e) = self.inner.pause() {
            warn!("pause failed: {}", e);
        }
    }

    pub fn seek_to(&self, time: f64, allow_seek_ahead: bool) {
        if let Err(e) = self.inner.seek_to(time, allow_seek_ahead) {
            warn!("seek_to({:.1}) failed: {}", time, e);
        }
    }

    pub fn load_video(&self, video_id: &str, start_time: f64) {
        if let Err(e) = self.inner.load_video(video_id, start_time) {
            warn!("load_video({}) failed: {}", video_id, e);
        }
    }
}
