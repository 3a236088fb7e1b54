use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::billing::BillingOutcome;
use crate::documentation::ChannelStatus;
use crate::rtc::Uid;

/// Call lifecycle: `Idle → Joining → Active → Ending → Ended`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Joining,
    Active,
    Ending,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Events the view layer reacts to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StatusChanged { status: SessionStatus },
    ParticipantsChanged { count: usize },
    TimerStarted { remaining_secs: u64 },
    TimerStopped { remaining_secs: u64 },
    Tick { remaining_secs: u64 },
    DocumentationStatus { status: ChannelStatus },
    /// Transient toast/snackbar
    Notification { level: NotificationLevel, message: String },
    /// The call is over; the view should leave the call screen
    NavigateAway,
}

/// Snapshot of a consultation session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub status: SessionStatus,
    pub channel_id: String,
    pub appointment_id: String,

    /// Assigned by the documentation backend
    pub review_id: Option<String>,

    /// Set when the second participant first joined
    pub started_at: Option<DateTime<Utc>>,

    pub remaining_secs: u64,
    pub timer_running: bool,

    /// Local user plus remote peers
    pub participants: usize,
    pub remote_uids: Vec<Uid>,

    pub video_enabled: Option<bool>,
    pub documentation: Option<ChannelStatus>,
    pub transcript_entries: usize,
    pub billing: Option<BillingOutcome>,
}
