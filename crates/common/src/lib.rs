// ================
// common/src/lib.rs
// ================
//! Common types shared between the meeting-watch routing core, its HTTP
//! boundary and the peer instance.
//!
//! This module defines the raw update shape produced by the webhook boundary,
//! the per-watch feature flags and the persisted watch record.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscriber scope (chat server) identifier
pub type GroupId = String;
/// External meeting identifier
pub type MeetingId = String;
/// Chat channel a watch renders into
pub type ChannelId = String;
/// Participant identifier reported by the meeting platform
pub type ParticipantId = String;

/// Event name the meeting platform uses to verify a webhook endpoint
pub const ENDPOINT_VALIDATION: &str = "endpoint.url_validation";

/// Timestamp layout used by the meeting platform for start/end times
pub const MEETING_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Kind of raw event the core knows how to apply
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEventKind {
    #[serde(rename = "meeting.participant_joined")]
    ParticipantJoined,
    #[serde(rename = "meeting.participant_left")]
    ParticipantLeft,
    #[serde(rename = "meeting.ended")]
    MeetingEnded,
}

impl RawEventKind {
    /// Map a platform event name onto a known kind
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "meeting.participant_joined" => Some(Self::ParticipantJoined),
            "meeting.participant_left" => Some(Self::ParticipantLeft),
            "meeting.ended" => Some(Self::MeetingEnded),
            _ => None,
        }
    }

    pub fn event_name(self) -> &'static str {
        match self {
            Self::ParticipantJoined => "meeting.participant_joined",
            Self::ParticipantLeft => "meeting.participant_left",
            Self::MeetingEnded => "meeting.ended",
        }
    }
}

impl fmt::Display for RawEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// A raw update entering the routing core.
///
/// Produced by the webhook boundary (`silent = false`) or replayed by the peer
/// instance for synchronization (`silent = true`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RawUpdate {
    /// What happened
    pub kind: RawEventKind,
    /// Meeting the event belongs to
    pub meeting_id: MeetingId,
    /// Meeting topic as last reported
    #[serde(default)]
    pub meeting_name: String,
    #[serde(default)]
    pub participant_id: Option<ParticipantId>,
    #[serde(default)]
    pub participant_name: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    /// Apply to shared state without notifying subscribers
    #[serde(default)]
    pub silent: bool,
}

impl RawUpdate {
    pub fn joined(meeting_id: &str, participant_id: &str, participant_name: &str) -> Self {
        Self {
            kind: RawEventKind::ParticipantJoined,
            meeting_id: meeting_id.to_string(),
            meeting_name: String::new(),
            participant_id: Some(participant_id.to_string()),
            participant_name: Some(participant_name.to_string()),
            start_time: None,
            end_time: None,
            silent: false,
        }
    }

    pub fn left(meeting_id: &str, participant_id: &str, participant_name: &str) -> Self {
        Self {
            kind: RawEventKind::ParticipantLeft,
            ..Self::joined(meeting_id, participant_id, participant_name)
        }
    }

    pub fn ended(meeting_id: &str, start_time: &str, end_time: &str) -> Self {
        Self {
            kind: RawEventKind::MeetingEnded,
            meeting_id: meeting_id.to_string(),
            meeting_name: String::new(),
            participant_id: None,
            participant_name: None,
            start_time: Some(start_time.to_string()),
            end_time: Some(end_time.to_string()),
            silent: false,
        }
    }

    #[must_use]
    pub fn with_meeting_name(mut self, name: &str) -> Self {
        self.meeting_name = name.to_string();
        self
    }

    #[must_use]
    pub fn silenced(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// How long old status messages stay visible in the channel
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryLevel {
    /// Every meeting occurrence keeps its own message
    Full,
    /// The last occurrence stays until the next one starts
    #[default]
    Partial,
    /// A single message is edited for the lifetime of the watch
    Minimal,
}

impl HistoryLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "Full",
            Self::Partial => "Partial",
            Self::Minimal => "Minimal",
        }
    }
}

impl fmt::Display for HistoryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown history level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownHistoryLevel(pub String);

impl fmt::Display for UnknownHistoryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown history level: {}", self.0)
    }
}

impl std::error::Error for UnknownHistoryLevel {}

impl FromStr for HistoryLevel {
    type Err = UnknownHistoryLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "partial" => Ok(Self::Partial),
            "minimal" => Ok(Self::Minimal),
            _ => Err(UnknownHistoryLevel(s.to_string())),
        }
    }
}

/// Options selected for a single watch
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Post status messages without notifying the channel
    pub silent: bool,
    /// Link for others to join the meeting
    #[serde(default)]
    pub join_link: Option<String>,
    /// Show duration and participant count after the meeting ends
    pub summaries: bool,
    #[serde(default)]
    pub history_level: HistoryLevel,
    /// Command a user can run to restart this watch by hand
    #[serde(default)]
    pub restart_command: String,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            silent: true,
            join_link: None,
            summaries: true,
            history_level: HistoryLevel::default(),
            restart_command: String::new(),
        }
    }
}

impl FeatureFlags {
    /// Build the `/watch` invocation that recreates a watch with these flags
    pub fn restart_command_for(&self, meeting_id: &str) -> String {
        let mut command = format!(
            "/watch meeting_id:{meeting_id} silent:{} summary:{} keep_history:{}",
            self.silent, self.summaries, self.history_level
        );
        if let Some(link) = &self.join_link {
            command.push_str(" join_link:");
            command.push_str(link);
        }
        command
    }

    /// Refresh the cached restart command for `meeting_id`
    #[must_use]
    pub fn with_restart_command(mut self, meeting_id: &str) -> Self {
        self.restart_command = self.restart_command_for(meeting_id);
        self
    }
}

/// Persisted description of a watch, enough to rebuild it after a restart
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WatchRecord {
    pub meeting_id: MeetingId,
    pub group_id: GroupId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub meeting_topic: String,
    pub flags: FeatureFlags,
}

/// Envelope of every webhook delivery from the meeting platform
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub event_ts: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// `payload` wrapper around the meeting object
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MeetingPayload {
    #[serde(default)]
    pub object: MeetingObject,
}

/// Meeting as described inside a webhook payload
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MeetingObject {
    #[serde(deserialize_with = "string_or_number", default)]
    pub id: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub participant: Option<ParticipantObject>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ParticipantObject {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
}

/// Endpoint URL validation challenge and its answer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UrlValidation {
    #[serde(rename = "plainToken")]
    pub plain_token: String,
    #[serde(rename = "encryptedToken", default, skip_serializing_if = "Option::is_none")]
    pub encrypted_token: Option<String>,
}

// Meeting IDs arrive as JSON numbers from some event types.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, found {other}"
        ))),
    }
}
