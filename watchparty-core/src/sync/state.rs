//! Authoritative Session State

use tracing::warn;

use super::protocol::{ControlKind, ControlMessage, SessionSnapshot};

/// The single authoritative playback state held by the relay.
///
/// Mutations are last-write-wins in arrival order; `last_update_ts` is
/// informational and never used for conflict resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Current video id, empty when none loaded
    pub video_id: String,
    /// Playback intent
    pub playing: bool,
    /// Last known playback position in seconds
    pub time: f64,
    /// Timestamp of the last mutation (ms since epoch)
    pub last_update_ts: u64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            video_id: String::new(),
            playing: false,
            time: 0.0,
            last_update_ts: current_time_ms(),
        }
    }

    /// Apply a control message.
    ///
    /// Returns false when the message is malformed (no mutation happened);
    /// callers must not broadcast in that case.
    pub fn apply_control(&mut self, msg: &ControlMessage) -> bool {
        match msg.kind {
            ControlKind::ChangeVideo => {
                let Some(video_id) = msg.video_id.as_ref().filter(|id| !id.is_empty()) else {
                    warn!("Ignoring change_video without a video id");
                    return false;
                };
                // Always reset position and playback, even for the same id
                self.video_id = video_id.clone();
                self.time = 0.0;
                self.playing = false;
            }
            ControlKind::Play => {
                self.playing = true;
                self.time = clamp_time(msg.target_time);
                if let Some(id) = msg.video_id.as_ref().filter(|id| !id.is_empty()) {
                    self.video_id = id.clone();
                }
            }
            ControlKind::Pause => {
                self.playing = false;
                self.time = clamp_time(msg.target_time);
                if let Some(id) = msg.video_id.as_ref().filter(|id| !id.is_empty()) {
                    self.video_id = id.clone();
                }
            }
        }

        self.last_update_ts = current_time_ms();
        true
    }

    /// Wire snapshot of the current state
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            video_id: self.video_id.clone(),
            playing: self.playing,
            time: self.time,
            last_update_ts: self.last_update_ts,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Positions are non-negative seconds; anything else is a misreport
fn clamp_time(time: f64) -> f64 {
    if time.is_finite() && time > 0.0 {
        time
    } else {
        0.0
    }
}

/// Get current time in milliseconds since UNIX epoch
pub fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
