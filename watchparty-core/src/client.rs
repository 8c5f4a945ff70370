//! Viewer Reconciliation Engine
//!
//! Bridges the local player and the relay: local user actions become
//! outgoing control messages, incoming authoritative state becomes local
//! player calls. Three asynchronous signals meet here (player readiness,
//! server pushes, local user actions); the suppression window keeps a
//! server update applied to the player from being re-emitted as a new
//! user action.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::net::RelayEvent;
use crate::player::{Player, PlayerState, SafePlayer};
use crate::sync::{ControlKind, ControlMessage, ServerMessage, SessionSnapshot};
use crate::video_id::{VideoId, VideoUrlError};

/// Delay before reading the position after a player transition, letting
/// the reported time stabilize
const EMIT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Suppression window after applying a server update; must outlast the
/// player notifications triggered by the apply
const SERVER_APPLY_SUPPRESS: Duration = Duration::from_millis(1500);

/// Suppression window after a manual control send, where only the local
/// play/pause transition has to be absorbed
const MANUAL_SEND_SUPPRESS: Duration = Duration::from_millis(700);

/// Position difference below which the local player is left alone
const SEEK_TOLERANCE_SECS: f64 = 0.5;

/// Outgoing side of the broadcast channel to the relay
pub trait ControlSink: Send + Sync {
    fn send_control(&self, msg: ControlMessage);
}

/// Where the viewer stands in the reconciliation lifecycle.
///
/// Emission toward the relay is only possible in `Idle`: a viewer that has
/// never seen an authoritative state, or is currently applying one, cannot
/// emit by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncPhase {
    /// Player not ready yet; the latest server state is stashed until it is
    Uninitialized,
    /// Player ready, no authoritative state received yet
    AwaitingFirstSync,
    /// Synced and quiescent
    Idle,
    /// A server update or a just-sent manual control is settling; player
    /// notifications are muted. `synced` remembers whether an authoritative
    /// state has ever been applied, so a manual send before the first sync
    /// does not fake one.
    Suppressed { synced: bool },
}

struct ClientState {
    phase: SyncPhase,
    /// Server state received before the player was ready
    pending: Option<SessionSnapshot>,
    /// Whether the user has genuinely acted on the video at least once
    has_interacted: bool,
}

/// Per-viewer sync engine.
///
/// All entry points are callbacks from the embedding environment (player
/// readiness, player state changes, UI buttons) or from the relay event
/// stream; internal state is lock-protected and timers run as spawned
/// tasks, so a tokio runtime must be current.
pub struct SyncClient {
    player: SafePlayer,
    state: Mutex<ClientState>,
    sink: Arc<dyn ControlSink>,
}

impl SyncClient {
    pub fn new(player: Arc<dyn Player>, sink: Arc<dyn ControlSink>) -> Arc<Self> {
        Arc::new(Self {
            player: SafePlayer::new(player),
            state: Mutex::new(ClientState {
                phase: SyncPhase::Uninitialized,
                pending: None,
                has_interacted: false,
            }),
            sink,
        })
    }

    /// Player readiness callback. Applies any server state received early.
    pub fn on_player_ready(self: &Arc<Self>) {
        let pending = {
            let mut state = self.state.lock();
            if state.phase != SyncPhase::Uninitialized {
                // Readiness can re-fire; later ones change nothing
                return;
            }
            state.phase = SyncPhase::AwaitingFirstSync;
            state.pending.take()
        };

        info!("Player ready");
        if let Some(snapshot) = pending {
            debug!("Applying stashed server state");
            self.apply_server_state(snapshot);
        }
    }

    /// Incoming message from the relay. `sync_state` and `control_event`
    /// drive the same reconciliation path.
    pub fn apply_server_message(self: &Arc<Self>, msg: ServerMessage) {
        let snapshot = match msg {
            ServerMessage::SyncState(snapshot) => snapshot,
            ServerMessage::ControlEvent(event) => event.session,
        };
        self.apply_server_state(snapshot);
    }

    /// Reflect an authoritative server state into the local player.
    pub fn apply_server_state(self: &Arc<Self>, snapshot: SessionSnapshot) {
        {
            let mut state = self.state.lock();
            if state.phase == SyncPhase::Uninitialized {
                debug!("Player not ready, stashing server state");
                state.pending = Some(snapshot);
                return;
            }
            state.phase = SyncPhase::Suppressed { synced: true };
        }

        if snapshot.time > 0.0 {
            self.player.record_time(snapshot.time);
        }

        let current_id = self.player.video_id();
        if !snapshot.video_id.is_empty() && snapshot.video_id != current_id {
            debug!("Loading video {} at {:.1}s", snapshot.video_id, snapshot.time);
            self.player.load_video(&snapshot.video_id, snapshot.time);
        } else {
            let current_time = self.player.current_time();
            if (current_time - snapshot.time).abs() > SEEK_TOLERANCE_SECS {
                debug!("Seeking {:.1}s -> {:.1}s", current_time, snapshot.time);
                self.player.seek_to(snapshot.time, true);
            }
        }

        // Play/pause intent is applied unconditionally
        if snapshot.playing {
            self.player.play();
        } else {
            self.player.pause();
        }

        self.release_suppression_after(SERVER_APPLY_SUPPRESS);
    }

    /// Player state-change notification.
    ///
    /// Only play/pause transitions can turn into outgoing controls, and
    /// only after a short debounce during which the suppression and
    /// first-sync gates are re-checked.
    pub fn on_player_state_change(self: &Arc<Self>, player_state: PlayerState) {
        {
            let state = self.state.lock();
            match state.phase {
                SyncPhase::Uninitialized => return,
                SyncPhase::Suppressed { .. } => {
                    debug!("Suppressed state change");
                    return;
                }
                SyncPhase::AwaitingFirstSync | SyncPhase::Idle => {}
            }
        }

        let kind = match player_state {
            PlayerState::Playing => ControlKind::Play,
            PlayerState::Paused => ControlKind::Pause,
            _ => return,
        };

        let client = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(EMIT_DEBOUNCE).await;
            client.emit_after_debounce(kind);
        });
    }

    fn emit_after_debounce(&self, kind: ControlKind) {
        let current_time = self.player.current_time();
        {
            let mut state = self.state.lock();
            match state.phase {
                SyncPhase::Uninitialized | SyncPhase::AwaitingFirstSync => {
                    debug!("Waiting for initial sync before emitting");
                    return;
                }
                SyncPhase::Suppressed { .. } => {
                    debug!("Suppression became active during debounce, skipping");
                    return;
                }
                SyncPhase::Idle => {}
            }

            // The very first buffering at position 0 is the player loading a
            // video, not the user pausing at 0s
            if !state.has_interacted
                && current_time == 0.0
                && matches!(
                    self.player.player_state(),
                    Some(PlayerState::Buffering) | Some(PlayerState::Cued)
                )
            {
                debug!("Ignoring initial buffering at time 0");
                return;
            }

            state.has_interacted = true;
        }

        let video_id = self.player.video_id();
        let msg = ControlMessage {
            kind,
            target_time: current_time,
            video_id: (!video_id.is_empty()).then_some(video_id),
        };
        debug!("Emitting {:?} at {:.1}s", kind, msg.target_time);
        self.sink.send_control(msg);
    }

    /// Manual play button (UI), independent of player-change detection
    pub fn send_play(self: &Arc<Self>) {
        self.send_manual(ControlKind::Play);
    }

    /// Manual pause button (UI), independent of player-change detection
    pub fn send_pause(self: &Arc<Self>) {
        self.send_manual(ControlKind::Pause);
    }

    fn send_manual(self: &Arc<Self>, kind: ControlKind) {
        {
            let state = self.state.lock();
            if state.phase == SyncPhase::Uninitialized {
                return;
            }
        }

        let time = self.player.current_time();
        // A position of exactly 0 means nothing is really playing yet
        if time == 0.0 {
            warn!("Not sending {:?}: position reads 0", kind);
            return;
        }

        let video_id = self.player.video_id();

        // Apply locally first for immediate feedback; the player
        // notification this triggers must not be re-emitted
        {
            let mut state = self.state.lock();
            let synced = matches!(
                state.phase,
                SyncPhase::Idle | SyncPhase::Suppressed { synced: true }
            );
            state.phase = SyncPhase::Suppressed { synced };
        }
        match kind {
            ControlKind::Play => self.player.play(),
            ControlKind::Pause => self.player.pause(),
            ControlKind::ChangeVideo => {}
        }
        self.release_suppression_after(MANUAL_SEND_SUPPRESS);

        let msg = ControlMessage {
            kind,
            target_time: time,
            video_id: (!video_id.is_empty()).then_some(video_id),
        };
        debug!("Manual {:?} at {:.1}s", kind, msg.target_time);
        self.sink.send_control(msg);
    }

    /// Validate a pasted video URL and ask the relay to switch everyone to
    /// it. Rejected synchronously when no id can be extracted; nothing is
    /// sent in that case.
    pub fn request_video_change(&self, url: &str) -> Result<VideoId, VideoUrlError> {
        let id = VideoId::from_url(url)?;
        info!("Requesting video change to {}", id);
        self.sink
            .send_control(ControlMessage::change_video(id.as_str()));
        Ok(id)
    }

    /// Clear the suppression window after `delay`.
    ///
    /// Windows are deliberately not cancelled when a newer one starts: a
    /// release racing a window opened later will clear it early. This is
    /// the timer-based baseline the protocol is specified with; see
    /// DESIGN.md for the sequence-number alternative.
    fn release_suppression_after(self: &Arc<Self>, delay: Duration) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = client.state.lock();
            if let SyncPhase::Suppressed { synced } = state.phase {
                debug!("Suppression released");
                state.phase = if synced {
                    SyncPhase::Idle
                } else {
                    SyncPhase::AwaitingFirstSync
                };
            }
        });
    }

    /// Drive the engine from a relay event stream until it ends
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<RelayEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                RelayEvent::Connected => info!("Connected to relay"),
                RelayEvent::Message(msg) => self.apply_server_message(msg),
                RelayEvent::Error(e) => warn!("Relay error: {}", e),
                RelayEvent::Disconnected => {
                    info!("Relay disconnected");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::PlayerError;
    use crate::sync::ControlEvent;
    use parking_lot::RwLock;

    /// What the engine asked the player to do
    #[derive(Debug, Clone, PartialEq)]
    enum PlayerCall {
        Play,
        Pause,
        SeekTo(f64),
        LoadVideo(String, f64),
    }

    /// Controllable player double
    struct FakePlayer {
        video_id: RwLock<String>,
        time: RwLock<f64>,
        state: RwLock<PlayerState>,
        calls: Mutex<Vec<PlayerCall>>,
    }

    impl FakePlayer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                video_id: RwLock::new(String::new()),
                time: RwLock::new(0.0),
                state: RwLock::new(PlayerState::Unstarted),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn set_time(&self, time: f64) {
            *self.time.write() = time;
        }

        fn set_video_id(&self, id: &str) {
            *self.video_id.write() = id.to_string();
        }

        fn set_state(&self, state: PlayerState) {
            *self.state.write() = state;
        }

        fn calls(&self) -> Vec<PlayerCall> {
            self.calls.lock().clone()
        }
    }

    impl Player for FakePlayer {
        fn video_id(&self) -> Result<String, PlayerError> {
            Ok(self.video_id.read().clone())
        }

        fn current_time(&self) -> Result<f64, PlayerError> {
            Ok(*self.time.read())
        }

        fn player_state(&self) -> Result<PlayerState, PlayerError> {
            Ok(*self.state.read())
        }

        fn play(&self) -> Result<(), PlayerError> {
            self.calls.lock().push(PlayerCall::Play);
            Ok(())
        }

        fn pause(&self) -> Result<(), PlayerError> {
            self.calls.lock().push(PlayerCall::Pause);
            Ok(())
        }

        fn seek_to(&self, time: f64, _allow_seek_ahead: bool) -> Result<(), PlayerError> {
            self.calls.lock().push(PlayerCall::SeekTo(time));
            Ok(())
        }

        fn load_video(&self, video_id: &str, start_time: f64) -> Result<(), PlayerError> {
            self.calls
                .lock()
                .push(PlayerCall::LoadVideo(video_id.to_string(), start_time));
            // Loading makes the player report the new video
            *self.video_id.write() = video_id.to_string();
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<ControlMessage>>,
    }

    impl RecordingSink {
        fn sent(&self) -> Vec<ControlMessage> {
            self.sent.lock().clone()
        }
    }

    impl ControlSink for RecordingSink {
        fn send_control(&self, msg: ControlMessage) {
            self.sent.lock().push(msg);
        }
    }

    fn snapshot(video_id: &str, playing: bool, time: f64) -> SessionSnapshot {
        SessionSnapshot {
            video_id: video_id.to_string(),
            playing,
            time,
            last_update_ts: 0,
        }
    }

    fn engine() -> (Arc<SyncClient>, Arc<FakePlayer>, Arc<RecordingSink>) {
        let player = FakePlayer::new();
        let sink = Arc::new(RecordingSink::default());
        let client = SyncClient::new(
            Arc::clone(&player) as Arc<dyn Player>,
            Arc::clone(&sink) as Arc<dyn ControlSink>,
        );
        (client, player, sink)
    }

    /// Let spawned timer tasks get polled under the paused clock
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(duration: Duration) {
        settle().await;
        tokio::time::advance(duration).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn server_state_is_not_echoed_during_suppression() {
        let (client, player, sink) = engine();
        client.on_player_ready();

        client.apply_server_state(snapshot("abc123xyz_-", true, 10.0));
        assert!(player.calls().contains(&PlayerCall::Play));

        // The player reacts to the applied update inside the window
        player.set_time(10.0);
        player.set_state(PlayerState::Playing);
        client.on_player_state_change(PlayerState::Playing);
        advance(EMIT_DEBOUNCE).await;
        assert!(sink.sent().is_empty());

        // After the window, a fresh user transition is relayed
        advance(SERVER_APPLY_SUPPRESS).await;
        player.set_time(14.0);
        player.set_state(PlayerState::Paused);
        client.on_player_state_change(PlayerState::Paused);
        advance(EMIT_DEBOUNCE).await;

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, ControlKind::Pause);
        assert_eq!(sent[0].target_time, 14.0);
        assert_eq!(sent[0].video_id.as_deref(), Some("abc123xyz_-"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_emission_before_first_sync() {
        let (client, player, sink) = engine();
        client.on_player_ready();

        player.set_time(5.0);
        player.set_state(PlayerState::Playing);
        client.on_player_state_change(PlayerState::Playing);
        advance(EMIT_DEBOUNCE).await;

        assert!(sink.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_state_applied_on_readiness() {
        let (client, player, _sink) = engine();

        client.apply_server_state(snapshot("abc123xyz_-", false, 3.0));
        assert!(player.calls().is_empty());

        client.on_player_ready();
        let calls = player.calls();
        assert!(calls.contains(&PlayerCall::LoadVideo("abc123xyz_-".to_string(), 3.0)));
        assert!(calls.contains(&PlayerCall::Pause));
    }

    #[tokio::test(start_paused = true)]
    async fn video_switch_loads_small_drift_is_ignored_large_drift_seeks() {
        let (client, player, _sink) = engine();
        client.on_player_ready();

        // Different id: load at the server time
        client.apply_server_state(snapshot("abc123xyz_-", true, 10.0));
        assert!(player
            .calls()
            .contains(&PlayerCall::LoadVideo("abc123xyz_-".to_string(), 10.0)));
        advance(SERVER_APPLY_SUPPRESS).await;

        // Same id, within tolerance: no seek
        player.set_time(10.3);
        client.apply_server_state(snapshot("abc123xyz_-", true, 10.0));
        assert!(!player.calls().iter().any(|c| matches!(c, PlayerCall::SeekTo(_))));
        advance(SERVER_APPLY_SUPPRESS).await;

        // Same id, past tolerance: seek to the server time
        player.set_time(20.0);
        client.apply_server_state(snapshot("abc123xyz_-", true, 10.0));
        assert!(player.calls().contains(&PlayerCall::SeekTo(10.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn first_buffering_at_zero_is_not_relayed() {
        let (client, player, sink) = engine();
        client.on_player_ready();
        client.apply_server_state(snapshot("", false, 0.0));
        advance(SERVER_APPLY_SUPPRESS).await;

        // The player settles into buffering at 0 while loading
        player.set_time(0.0);
        player.set_state(PlayerState::Buffering);
        client.on_player_state_change(PlayerState::Playing);
        advance(EMIT_DEBOUNCE).await;
        assert!(sink.sent().is_empty());

        // A genuine transition afterwards is relayed
        player.set_time(6.0);
        player.set_state(PlayerState::Playing);
        client.on_player_state_change(PlayerState::Playing);
        advance(EMIT_DEBOUNCE).await;
        assert_eq!(sink.sent().len(), 1);
        assert_eq!(sink.sent()[0].kind, ControlKind::Play);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_state_and_control_event_drive_the_same_path() {
        let (client, player, _sink) = engine();
        client.on_player_ready();

        client.apply_server_message(ServerMessage::SyncState(snapshot("abc123xyz_-", false, 3.0)));
        assert!(player
            .calls()
            .contains(&PlayerCall::LoadVideo("abc123xyz_-".to_string(), 3.0)));
        advance(SERVER_APPLY_SUPPRESS).await;

        client.apply_server_message(ServerMessage::ControlEvent(ControlEvent {
            session: snapshot("zyx987cba_-", true, 0.0),
            kind: ControlKind::Play,
        }));
        let calls = player.calls();
        assert!(calls.contains(&PlayerCall::LoadVideo("zyx987cba_-".to_string(), 0.0)));
        assert!(calls.contains(&PlayerCall::Play));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_send_rejected_at_time_zero() {
        let (client, player, sink) = engine();
        client.on_player_ready();

        player.set_time(0.0);
        client.send_play();
        assert!(sink.sent().is_empty());
        assert!(player.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_send_applies_locally_and_suppresses_echo() {
        let (client, player, sink) = engine();
        client.on_player_ready();
        client.apply_server_state(snapshot("abc123xyz_-", false, 42.0));
        advance(SERVER_APPLY_SUPPRESS).await;

        player.set_time(42.0);
        client.send_play();

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, ControlKind::Play);
        assert_eq!(sent[0].target_time, 42.0);
        assert!(player.calls().contains(&PlayerCall::Play));

        // The local transition fired by the manual apply is muted
        player.set_state(PlayerState::Playing);
        client.on_player_state_change(PlayerState::Playing);
        advance(EMIT_DEBOUNCE).await;
        assert_eq!(sink.sent().len(), 1);

        // After the short window the next transition flows again
        advance(MANUAL_SEND_SUPPRESS).await;
        player.set_state(PlayerState::Paused);
        client.on_player_state_change(PlayerState::Paused);
        advance(EMIT_DEBOUNCE).await;
        assert_eq!(sink.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_send_before_first_sync_does_not_fake_one() {
        let (client, player, sink) = engine();
        client.on_player_ready();

        player.set_time(9.0);
        client.send_play();
        assert_eq!(sink.sent().len(), 1);

        // Once the window clears the viewer is still awaiting first sync,
        // so player transitions stay blocked
        advance(MANUAL_SEND_SUPPRESS).await;
        player.set_state(PlayerState::Paused);
        client.on_player_state_change(PlayerState::Paused);
        advance(EMIT_DEBOUNCE).await;
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_video_url_sends_nothing() {
        let (client, _player, sink) = engine();
        client.on_player_ready();

        assert!(client.request_video_change("not a url").is_err());
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn valid_video_url_emits_change_video() {
        let (client, _player, sink) = engine();

        let id = client
            .request_video_change("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .unwrap();
        assert_eq!(id.as_str(), "dQw4w9WgXcQ");

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, ControlKind::ChangeVideo);
        assert_eq!(sent[0].target_time, 0.0);
        assert_eq!(sent[0].video_id.as_deref(), Some("dQw4w9WgXcQ"));
    }

    /// Documents the timer-window race inherited from the baseline design:
    /// a window opened inside an earlier one is cleared by the earlier
    /// window's timer.
    #[tokio::test(start_paused = true)]
    async fn later_window_is_cleared_by_earlier_timer() {
        let (client, player, sink) = engine();
        client.on_player_ready();

        client.apply_server_state(snapshot("abc123xyz_-", true, 10.0));
        advance(Duration::from_millis(1000)).await;

        // Second update 1000ms in: its window nominally runs to +2500ms
        client.apply_server_state(snapshot("abc123xyz_-", true, 30.0));

        // 600ms later the FIRST window's timer fires and clears suppression
        advance(Duration::from_millis(600)).await;
        player.set_time(30.0);
        player.set_state(PlayerState::Playing);
        client.on_player_state_change(PlayerState::Playing);
        advance(EMIT_DEBOUNCE).await;

        // The echo of the second update leaks out
        assert_eq!(sink.sent().len(), 1);
    }
}
