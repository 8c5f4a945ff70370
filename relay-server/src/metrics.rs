//! Metrics tracking for the relay server

use chrono::{DateTime, Local};
use std::collections::VecDeque;

use watchparty_core::sync::{ControlEvent, ControlKind};

/// Maximum number of log entries to keep
const MAX_LOG_ENTRIES: usize = 100;

/// A log entry for the dashboard
#[derive(Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Clone, Copy, PartialEq)]
#[allow(dead_code)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Connection,
    Control,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Connection => "CONN",
            LogLevel::Control => "CTRL",
        }
    }
}

/// A mirror of the authoritative session for display
#[derive(Clone, Default)]
pub struct SessionView {
    pub video_id: String,
    pub playing: bool,
    pub time: f64,
}

/// Server metrics
pub struct Metrics {
    /// Server start time
    pub start_time: DateTime<Local>,

    /// Listen port
    pub port: u16,

    /// Current number of connected viewers
    pub connected_viewers: usize,

    /// Total connections since start
    pub total_connections: u64,

    /// Peak simultaneous viewers
    pub peak_viewers: usize,

    /// Controls applied and rebroadcast since start
    pub controls_relayed: u64,

    /// Per-kind control counts
    pub plays: u64,
    pub pauses: u64,
    pub video_changes: u64,

    /// Current session state (for display)
    pub session: SessionView,

    /// Connected viewers (for display)
    pub viewer_list: Vec<ViewerInfo>,

    /// Log entries
    pub logs: VecDeque<LogEntry>,

    /// Server status
    pub status: ServerStatus,

    /// Next viewer id to hand out
    next_viewer_id: u64,
}

#[derive(Clone)]
#[allow(dead_code)]
pub struct ViewerInfo {
    pub viewer_id: u64,
    pub connected_at: DateTime<Local>,
}

#[derive(Clone, Copy, PartialEq)]
#[allow(dead_code)]
pub enum ServerStatus {
    Starting,
    Running,
    Error,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Local::now(),
            port: 5000,
            connected_viewers: 0,
            total_connections: 0,
            peak_viewers: 0,
            controls_relayed: 0,
            plays: 0,
            pauses: 0,
            video_changes: 0,
            session: SessionView::default(),
            viewer_list: Vec::new(),
            logs: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            status: ServerStatus::Starting,
            next_viewer_id: 1,
        }
    }

    /// Add a log entry
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.logs.len() >= MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        });
    }

    /// Record a new viewer connection, returning its id
    pub fn viewer_joined(&mut self) -> u64 {
        let viewer_id = self.next_viewer_id;
        self.next_viewer_id += 1;

        self.connected_viewers += 1;
        self.total_connections += 1;
        if self.connected_viewers > self.peak_viewers {
            self.peak_viewers = self.connected_viewers;
        }

        self.viewer_list.push(ViewerInfo {
            viewer_id,
            connected_at: Local::now(),
        });

        self.log(LogLevel::Connection, format!("Viewer #{} joined", viewer_id));
        viewer_id
    }

    /// Record a viewer disconnection
    pub fn viewer_left(&mut self, viewer_id: u64) {
        if !self.viewer_list.iter().any(|v| v.viewer_id == viewer_id) {
            return;
        }

        self.connected_viewers = self.connected_viewers.saturating_sub(1);
        self.viewer_list.retain(|v| v.viewer_id != viewer_id);

        self.log(LogLevel::Connection, format!("Viewer #{} left", viewer_id));
    }

    /// Record an applied control and mirror the resulting session
    pub fn control_applied(&mut self, viewer_id: u64, event: &ControlEvent) {
        self.controls_relayed += 1;
        match event.kind {
            ControlKind::Play => self.plays += 1,
            ControlKind::Pause => self.pauses += 1,
            ControlKind::ChangeVideo => self.video_changes += 1,
        }

        self.session = SessionView {
            video_id: event.session.video_id.clone(),
            playing: event.session.playing,
            time: event.session.time,
        };

        let description = match event.kind {
            ControlKind::Play => format!("play at {:.1}s", event.session.time),
            ControlKind::Pause => format!("pause at {:.1}s", event.session.time),
            ControlKind::ChangeVideo => format!("video -> {}", event.session.video_id),
        };
        self.log(
            LogLevel::Control,
            format!("Viewer #{}: {}", viewer_id, description),
        );
    }

    /// Get uptime as formatted string
    pub fn uptime(&self) -> String {
        let duration = Local::now().signed_duration_since(self.start_time);
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            let hours = secs / 3600;
            let mins = (secs % 3600) / 60;
            format!("{}h {}m", hours, mins)
        }
    }
}
