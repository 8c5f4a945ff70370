//! Sync Protocol Messages

use serde::{Deserialize, Serialize};

/// Kind of playback control requested by a viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// Start or resume playback
    Play,
    /// Pause playback
    Pause,
    /// Load a different video (resets position and playback)
    ChangeVideo,
}

/// A control message sent by a viewer to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlMessage {
    /// Requested transition
    #[serde(rename = "type")]
    pub kind: ControlKind,
    /// Requested/observed playback position in seconds
    pub target_time: f64,
    /// Video id; required for `change_video`, optional otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
}

impl ControlMessage {
    pub fn play(target_time: f64, video_id: Option<String>) -> Self {
        Self {
            kind: ControlKind::Play,
            target_time,
            video_id,
        }
    }

    pub fn pause(target_time: f64, video_id: Option<String>) -> Self {
        Self {
            kind: ControlKind::Pause,
            target_time,
            video_id,
        }
    }

    /// A video change always starts at position 0
    pub fn change_video(video_id: impl Into<String>) -> Self {
        Self {
            kind: ControlKind::ChangeVideo,
            target_time: 0.0,
            video_id: Some(video_id.into()),
        }
    }
}

/// Snapshot of the authoritative session, as sent on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Current video id, empty when none loaded
    pub video_id: String,
    /// Playback intent
    pub playing: bool,
    /// Authoritative playback position in seconds
    pub time: f64,
    /// Timestamp of the last mutation (ms since epoch), informational only
    pub last_update_ts: u64,
}

/// A state change broadcast to every viewer after a control was applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEvent {
    #[serde(flatten)]
    pub session: SessionSnapshot,
    /// The control kind that produced this state
    #[serde(rename = "type")]
    pub kind: ControlKind,
}

/// Messages sent from a viewer to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Playback control request
    Control(ControlMessage),
}

/// Messages sent from the relay to viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full session snapshot, sent to a joining viewer only
    SyncState(SessionSnapshot),
    /// Applied control plus the resulting session, sent to all viewers
    ControlEvent(ControlEvent),
}

impl ServerMessage {
    /// The session snapshot carried by this message
    pub fn snapshot(&self) -> &SessionSnapshot {
        match self {
            ServerMessage::SyncState(snapshot) => snapshot,
            ServerMessage::ControlEvent(event) => &event.session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_event_wire_format() {
        let event = ServerMessage::ControlEvent(ControlEvent {
            session: SessionSnapshot {
                video_id: "abc123xyz_-".to_string(),
                playing: true,
                time: 12.3,
                last_update_ts: 1700000000000,
            },
            kind: ControlKind::Play,
        });

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(value["event"], "control_event");
        assert_eq!(value["type"], "play");
        assert_eq!(value["videoId"], "abc123xyz_-");
        assert_eq!(value["playing"], true);
        assert_eq!(value["time"], 12.3);
        assert_eq!(value["lastUpdateTs"], 1700000000000u64);
    }

    #[test]
    fn parse_control_message() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"event":"control","type":"change_video","targetTime":0,"videoId":"dQw4w9WgXcQ"}"#,
        )
        .unwrap();
        let ClientMessage::Control(control) = msg;
        assert_eq!(control.kind, ControlKind::ChangeVideo);
        assert_eq!(control.video_id.as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(control.target_time, 0.0);
    }

    #[test]
    fn unknown_control_kind_is_rejected() {
        let result: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"event":"control","type":"rewind","targetTime":3.0}"#);
        assert!(result.is_err());
    }
}
