// ================
// crates/backend-lib/src/messages.rs
// ================
//! Events delivered to watch processes.
use std::time::Duration;

use chrono::NaiveDateTime;
use meetwatch_common::{FeatureFlags, MEETING_TIME_FORMAT};
use tracing::warn;

/// Rendered when a duration can't be computed
pub const UNKNOWN_DURATION: &str = "Unknown";

/// Meeting state change derived from a raw update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeetingUpdate {
    ParticipantJoined {
        meeting_name: String,
        roster: String,
    },
    ParticipantLeft {
        meeting_name: String,
        roster: String,
    },
    MeetingEnded {
        meeting_name: String,
        duration: Option<Duration>,
        total_participants: usize,
    },
}

impl MeetingUpdate {
    pub fn meeting_name(&self) -> &str {
        match self {
            MeetingUpdate::ParticipantJoined { meeting_name, .. }
            | MeetingUpdate::ParticipantLeft { meeting_name, .. }
            | MeetingUpdate::MeetingEnded { meeting_name, .. } => meeting_name,
        }
    }
}

/// Everything a watch process can receive on its delivery channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Data event for the watched meeting
    Update(MeetingUpdate),
    /// New option set for this watch only
    FlagsUpdated(FeatureFlags),
    /// The watch was canceled; terminal
    Canceled,
    /// The process is shutting down without a healthy peer; terminal
    Shutdown,
}

impl WatchEvent {
    /// Whether the consumer must stop after this event
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatchEvent::Canceled | WatchEvent::Shutdown)
    }

    pub fn label(&self) -> &'static str {
        match self {
            WatchEvent::Update(MeetingUpdate::ParticipantJoined { .. }) => "participant-joined",
            WatchEvent::Update(MeetingUpdate::ParticipantLeft { .. }) => "participant-left",
            WatchEvent::Update(MeetingUpdate::MeetingEnded { .. }) => "meeting-ended",
            WatchEvent::FlagsUpdated(_) => "flags-updated",
            WatchEvent::Canceled => "watch-canceled",
            WatchEvent::Shutdown => "system-shutdown",
        }
    }
}

/// Best-effort meeting duration from platform timestamps
pub fn meeting_duration(start: Option<&str>, end: Option<&str>) -> Option<Duration> {
    let parse = |label: &str, value: Option<&str>| {
        let value = value?;
        NaiveDateTime::parse_from_str(value, MEETING_TIME_FORMAT)
            .map_err(|e| warn!(%value, error = %e, "could not parse meeting {label} time"))
            .ok()
    };

    let start = parse("start", start);
    let end = parse("end", end);
    (end? - start?).to_std().ok()
}

/// Render a duration as `1h2m3s`, or [`UNKNOWN_DURATION`]
pub fn format_duration(duration: Option<Duration>) -> String {
    let Some(duration) = duration else {
        return UNKNOWN_DURATION.to_string();
    };

    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&format!("{seconds}s"));
    out
}
