//! User-facing watch commands.
//!
//! Each handler validates its input before touching any state and returns
//! the text to show the invoking user. Delivering that text is left to the
//! chat client.
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use meetwatch_common::{ChannelId, FeatureFlags, HistoryLevel, MeetingId, WatchRecord};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::fanout::WatchKey;
use crate::orchestrator::Orchestrator;
use crate::sink::StatusSink;
use crate::watch::{WatchMachine, WatchProcess, WatchState};

pub const NOTHING_TO_CANCEL: &str = "Nothing to cancel: there is no ongoing watch on this meeting.";
pub const NO_WATCHES_TO_CANCEL: &str = "Nothing to cancel: there are no ongoing watches in this server.";
pub const NO_WATCHES: &str = "There are no ongoing watches in this server. Get one started with `/watch`!";

/// Rejected command input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Please supply a meeting ID to watch.")]
    MissingMeetingId,

    #[error("Invalid join link provided. Please ensure your URL is correct and starts with \"https://\"")]
    InvalidJoinLink(String),

    #[error("Unknown history level `{0}`. Choose one of Full, Partial or Minimal.")]
    UnknownHistoryLevel(String),

    #[error("Watch on meeting ID `{0}` is already ongoing.")]
    AlreadyWatched(MeetingId),

    #[error("Nothing to update: meeting ID `{0}` isn't being watched in this server.")]
    NotWatched(MeetingId),
}

/// Options accepted by `/watch` and `/update`. Unset options take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    pub silent: Option<bool>,
    pub join_link: Option<String>,
    pub summary: Option<bool>,
    pub keep_history: Option<String>,
}

impl WatchOptions {
    /// Validate and turn into a flag set for `meeting_id`
    pub fn into_flags(self, meeting_id: &str) -> Result<FeatureFlags, CommandError> {
        let defaults = FeatureFlags::default();

        let join_link = match self.join_link.filter(|link| !link.is_empty()) {
            Some(link) => Some(validate_join_link(link)?),
            None => None,
        };

        let history_level = match self.keep_history {
            Some(level) => level
                .parse::<HistoryLevel>()
                .map_err(|_| CommandError::UnknownHistoryLevel(level))?,
            None => defaults.history_level,
        };

        let flags = FeatureFlags {
            silent: self.silent.unwrap_or(defaults.silent),
            join_link,
            summaries: self.summary.unwrap_or(defaults.summaries),
            history_level,
            restart_command: String::new(),
        };
        Ok(flags.with_restart_command(meeting_id))
    }
}

fn validate_join_link(link: String) -> Result<String, CommandError> {
    match reqwest::Url::parse(&link) {
        Ok(url) if url.scheme() == "https" && url.host_str().is_some() => Ok(link),
        _ => Err(CommandError::InvalidJoinLink(link)),
    }
}

fn required_meeting_id(meeting_id: &str) -> Result<&str, CommandError> {
    let meeting_id = meeting_id.trim();
    if meeting_id.is_empty() {
        return Err(CommandError::MissingMeetingId);
    }
    Ok(meeting_id)
}

fn title_case(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Command handlers bound to one orchestrator and chat client
pub struct Commands {
    orchestrator: Arc<Orchestrator>,
    sink: Arc<dyn StatusSink>,
    records: DashMap<WatchKey, WatchRecord>,
    tasks: Mutex<JoinSet<WatchState>>,
}

impl Commands {
    pub fn new(orchestrator: Arc<Orchestrator>, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            orchestrator,
            sink,
            records: DashMap::new(),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn sink(&self) -> &Arc<dyn StatusSink> {
        &self.sink
    }

    /// Register the watch described by `record` and spawn its process.
    /// Used for new watches and for watches restored after a restart.
    /// Returns `false` without spawning when the watch is already running.
    pub fn launch(&self, record: WatchRecord) -> bool {
        let Some(subscription) = self
            .orchestrator
            .start_watch(&record.group_id, &record.meeting_id, &record.meeting_topic)
        else {
            return false;
        };
        let key = subscription.key().clone();
        let machine = WatchMachine::new(
            key.clone(),
            record.flags.clone(),
            self.orchestrator.persistence_enabled(),
            &record.meeting_topic,
        );
        let process = WatchProcess::new(machine, &record.channel_id, self.sink.clone());
        self.records.insert(key, record);
        self.tasks.lock().spawn(process.run(subscription));
        true
    }

    /// Wait up to `timeout` for every launched watch process to stop.
    /// Returns how many stopped in time.
    pub async fn wait_for_watches(&self, timeout: Duration) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let mut stopped = 0;
        let joined = tokio::time::timeout(timeout, async {
            while let Some(result) = tasks.join_next().await {
                match result {
                    Ok(state) => {
                        debug!(?state, "watch process joined");
                        stopped += 1;
                    },
                    Err(e) => warn!(error = %e, "watch process panicked or was aborted"),
                }
            }
        })
        .await;
        if joined.is_err() {
            warn!(remaining = tasks.len(), "watch processes still running after timeout");
        }
        stopped
    }

    /// `/watch`
    pub async fn watch(
        &self,
        group: &str,
        channel: &str,
        meeting_id: &str,
        options: WatchOptions,
    ) -> Result<String, CommandError> {
        let meeting_id = required_meeting_id(meeting_id)?;
        let flags = options.into_flags(meeting_id)?;

        let record = WatchRecord {
            meeting_id: meeting_id.to_string(),
            group_id: group.to_string(),
            channel_id: channel.to_string(),
            meeting_topic: self.orchestrator.meeting_name(meeting_id),
            flags,
        };
        if !self.launch(record.clone()) {
            return Err(CommandError::AlreadyWatched(meeting_id.to_string()));
        }
        self.orchestrator.save_watch(&record).await;

        info!(%group, %channel, meeting = %meeting_id, "watch command accepted");
        Ok(format!(
            "Initiating watch on meeting ID `{meeting_id}`!\nStop at any time with `/cancel`"
        ))
    }

    /// `/cancel`. Without a meeting ID, lists what can be canceled.
    pub async fn cancel(&self, group: &str, meeting_id: Option<&str>) -> String {
        let Some(meeting_id) = meeting_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return self.cancel_prompt(group);
        };

        if !self.orchestrator.is_ongoing_watch(group, meeting_id) {
            return NOTHING_TO_CANCEL.to_string();
        }
        self.cancel_one(group, meeting_id).await;
        format!("Canceled watch on meeting ID `{meeting_id}`.")
    }

    /// Selection reply to a `/cancel` prompt
    pub async fn cancel_many(&self, group: &str, meeting_ids: &[String]) -> String {
        match meeting_ids {
            [] => NOTHING_TO_CANCEL.to_string(),
            [single] => {
                self.cancel_one(group, single).await;
                format!("Canceled watch on meeting ID `{single}`.")
            },
            many => {
                let mut reply = String::from("Canceled watches on the following meetings:");
                for meeting_id in many {
                    self.cancel_one(group, meeting_id).await;
                    reply.push_str(&format!("\n- `{meeting_id}`"));
                }
                reply
            },
        }
    }

    /// Cancelable watches of `group` as `(meeting ID, label)` pairs
    pub fn cancel_choices(&self, group: &str) -> Vec<(MeetingId, String)> {
        self.orchestrator
            .group_meetings(group)
            .into_iter()
            .map(|meeting_id| {
                let label = self.label(&meeting_id);
                (meeting_id, label)
            })
            .collect()
    }

    fn cancel_prompt(&self, group: &str) -> String {
        let choices = self.cancel_choices(group);
        if choices.is_empty() {
            return NO_WATCHES_TO_CANCEL.to_string();
        }
        let mut reply = String::from("Which ongoing meeting watches would you like to cancel?");
        for (_, label) in choices {
            reply.push_str(&format!("\n- {label}"));
        }
        reply
    }

    async fn cancel_one(&self, group: &str, meeting_id: &str) {
        self.orchestrator.cancel_watch(group, meeting_id).await;
        self.records.remove(&WatchKey::new(group, meeting_id));
    }

    /// `/status`
    pub fn status(&self, group: &str) -> String {
        let meetings = self.orchestrator.group_meetings(group);
        match meetings.as_slice() {
            [] => NO_WATCHES.to_string(),
            [single] => format!("There is an ongoing watch on meeting ID {}.", self.label(single)),
            many => {
                let mut reply = String::from("The following meeting IDs have ongoing watches:");
                for meeting_id in many {
                    reply.push_str(&format!("\n- {}", self.label(meeting_id)));
                }
                reply
            },
        }
    }

    /// `/update`
    pub async fn update(&self, group: &str, meeting_id: &str, options: WatchOptions) -> Result<String, CommandError> {
        let meeting_id = required_meeting_id(meeting_id)?;
        if !self.orchestrator.is_ongoing_watch(group, meeting_id) {
            return Err(CommandError::NotWatched(meeting_id.to_string()));
        }
        let flags = options.into_flags(meeting_id)?;

        self.orchestrator.update_flags(group, meeting_id, flags.clone());

        let record = self.records.get_mut(&WatchKey::new(group, meeting_id)).map(|mut record| {
            record.flags = flags.clone();
            let topic = self.orchestrator.meeting_name(meeting_id);
            if !topic.is_empty() {
                record.meeting_topic = topic;
            }
            record.value().clone()
        });
        match record {
            Some(record) => {
                self.orchestrator.save_watch(&record).await;
            },
            None => warn!(%group, meeting = %meeting_id, "no record for updated watch, not persisted"),
        }

        let join_link = flags
            .join_link
            .as_ref()
            .map_or_else(|| "n/a".to_string(), |link| format!("`{link}`"));
        Ok(format!(
            "Successfully updated! The watch on meeting ID `{meeting_id}` now has the following options selected:\n\n\
             **Silent**: `{}`\n**Join link**: {join_link}\n**Summaries**: `{}`\n**History level**: `{}`",
            title_case(flags.silent),
            title_case(flags.summaries),
            flags.history_level,
        ))
    }

    /// Record of a running watch, if this instance launched it
    pub fn record(&self, group: &str, meeting_id: &str) -> Option<WatchRecord> {
        self.records
            .get(&WatchKey::new(group, meeting_id))
            .map(|record| record.value().clone())
    }

    /// Channel a running watch renders into
    pub fn channel_of(&self, group: &str, meeting_id: &str) -> Option<ChannelId> {
        self.record(group, meeting_id).map(|record| record.channel_id)
    }

    fn label(&self, meeting_id: &str) -> String {
        let name = self.orchestrator.meeting_name(meeting_id);
        if name.is_empty() {
            format!("`{meeting_id}`")
        } else {
            format!("`{meeting_id}` ({name})")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::NoPeer;
    use crate::sink::LogSink;
    use crate::storage::DisabledWatchStore;

    fn commands() -> Commands {
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(DisabledWatchStore), Arc::new(NoPeer)));
        Commands::new(orchestrator, Arc::new(LogSink))
    }

    #[test]
    fn test_option_defaults() {
        let flags = WatchOptions::default().into_flags("m1").unwrap();
        assert!(flags.silent);
        assert!(flags.summaries);
        assert_eq!(flags.history_level, HistoryLevel::Partial);
        assert_eq!(flags.join_link, None);
        assert_eq!(
            flags.restart_command,
            "/watch meeting_id:m1 silent:true summary:true keep_history:Partial"
        );
    }

    #[test]
    fn test_option_validation() {
        let http = WatchOptions {
            join_link: Some("http://example.com/j/1".to_string()),
            ..WatchOptions::default()
        };
        assert!(matches!(http.into_flags("m1"), Err(CommandError::InvalidJoinLink(_))));

        let garbage = WatchOptions {
            join_link: Some("not a url".to_string()),
            ..WatchOptions::default()
        };
        assert!(matches!(garbage.into_flags("m1"), Err(CommandError::InvalidJoinLink(_))));

        let level = WatchOptions {
            keep_history: Some("forever".to_string()),
            ..WatchOptions::default()
        };
        assert_eq!(
            level.into_flags("m1"),
            Err(CommandError::UnknownHistoryLevel("forever".to_string()))
        );

        let ok = WatchOptions {
            silent: Some(false),
            join_link: Some("https://example.com/j/1".to_string()),
            keep_history: Some("minimal".to_string()),
            ..WatchOptions::default()
        };
        let flags = ok.into_flags("m1").unwrap();
        assert!(!flags.silent);
        assert_eq!(flags.history_level, HistoryLevel::Minimal);
    }

    #[tokio::test]
    async fn test_watch_rejects_before_mutation() {
        let c = commands();
        assert_eq!(
            c.watch("g1", "c1", "  ", WatchOptions::default()).await,
            Err(CommandError::MissingMeetingId)
        );
        let bad_link = WatchOptions {
            join_link: Some("ftp://example.com".to_string()),
            ..WatchOptions::default()
        };
        assert!(c.watch("g1", "c1", "m1", bad_link).await.is_err());
        assert!(!c.orchestrator().is_watched_meeting("m1"));
    }

    #[tokio::test]
    async fn test_watch_and_duplicate() {
        let c = commands();
        let reply = c.watch("g1", "c1", "m1", WatchOptions::default()).await.unwrap();
        assert!(reply.contains("`m1`"));
        assert!(c.orchestrator().is_ongoing_watch("g1", "m1"));
        assert_eq!(c.channel_of("g1", "m1").as_deref(), Some("c1"));

        assert_eq!(
            c.watch("g1", "c1", "m1", WatchOptions::default()).await,
            Err(CommandError::AlreadyWatched("m1".to_string()))
        );
        assert!(c.watch("g2", "c9", "m1", WatchOptions::default()).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_watch_starts_one_process() {
        for round in 0..100 {
            let c = Arc::new(commands());
            let meeting = format!("m{round}");
            let barrier = Arc::new(tokio::sync::Barrier::new(2));

            let attempts: Vec<_> = (0..2)
                .map(|_| {
                    let c = c.clone();
                    let barrier = barrier.clone();
                    let meeting = meeting.clone();
                    tokio::spawn(async move {
                        barrier.wait().await;
                        c.watch("g1", "c1", &meeting, WatchOptions::default()).await
                    })
                })
                .collect();

            let mut accepted = 0;
            for attempt in attempts {
                match attempt.await.unwrap() {
                    Ok(_) => accepted += 1,
                    Err(e) => assert_eq!(e, CommandError::AlreadyWatched(meeting.clone())),
                }
            }
            assert_eq!(accepted, 1);
            assert_eq!(c.tasks.lock().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_cancel_paths() {
        let c = commands();
        assert_eq!(c.cancel("g1", None).await, NO_WATCHES_TO_CANCEL);
        assert_eq!(c.cancel("g1", Some("m1")).await, NOTHING_TO_CANCEL);

        c.watch("g1", "c1", "m1", WatchOptions::default()).await.unwrap();
        c.watch("g1", "c1", "m2", WatchOptions::default()).await.unwrap();
        let prompt = c.cancel("g1", None).await;
        assert!(prompt.contains("`m1`") && prompt.contains("`m2`"));

        assert_eq!(c.cancel("g1", Some("m1")).await, "Canceled watch on meeting ID `m1`.");
        assert!(!c.orchestrator().is_ongoing_watch("g1", "m1"));
        assert!(c.record("g1", "m1").is_none());
    }

    #[tokio::test]
    async fn test_cancel_many() {
        let c = commands();
        for id in ["m1", "m2", "m3"] {
            c.watch("g1", "c1", id, WatchOptions::default()).await.unwrap();
        }
        let reply = c.cancel_many("g1", &["m1".to_string(), "m3".to_string()]).await;
        assert_eq!(reply, "Canceled watches on the following meetings:\n- `m1`\n- `m3`");
        assert_eq!(c.orchestrator().group_meetings("g1"), vec!["m2".to_string()]);
    }

    #[tokio::test]
    async fn test_status() {
        let c = commands();
        assert_eq!(c.status("g1"), NO_WATCHES);
        c.watch("g1", "c1", "m1", WatchOptions::default()).await.unwrap();
        assert_eq!(c.status("g1"), "There is an ongoing watch on meeting ID `m1`.");
        c.watch("g1", "c1", "m2", WatchOptions::default()).await.unwrap();
        assert_eq!(
            c.status("g1"),
            "The following meeting IDs have ongoing watches:\n- `m1`\n- `m2`"
        );
    }

    #[tokio::test]
    async fn test_update() {
        let c = commands();
        assert_eq!(
            c.update("g1", "m1", WatchOptions::default()).await,
            Err(CommandError::NotWatched("m1".to_string()))
        );

        c.watch("g1", "c1", "m1", WatchOptions::default()).await.unwrap();
        let options = WatchOptions {
            silent: Some(false),
            keep_history: Some("Full".to_string()),
            ..WatchOptions::default()
        };
        let reply = c.update("g1", "m1", options).await.unwrap();
        assert!(reply.contains("**Silent**: `False`"));
        assert!(reply.contains("**Join link**: n/a"));
        assert!(reply.contains("**History level**: `Full`"));

        let record = c.record("g1", "m1").unwrap();
        assert!(!record.flags.silent);
        assert_eq!(record.flags.history_level, HistoryLevel::Full);
    }
}
