//! Watch process: one consumer per active watch key.
//!
//! [`WatchMachine`] turns events into lifecycle transitions and render plans
//! without touching the chat client; [`WatchProcess`] drives it from a
//! delivery channel and performs the rendering through a [`StatusSink`].
use std::sync::Arc;

use meetwatch_common::{ChannelId, FeatureFlags};
use tracing::{debug, info, warn};

use crate::fanout::{Subscription, WatchKey};
use crate::messages::{format_duration, MeetingUpdate, WatchEvent};
use crate::retention::{self, MessageAction, Phase};
use crate::sink::{MessageRef, StatusMessage, StatusSink};

pub const IN_PROGRESS_TEXT: &str = "This meeting is in progress.";
pub const ENDED_TEXT: &str = "This meeting ended.";
pub const CANCELED_TEXT: &str = "**Status Unknown**\nThe watch on this meeting was canceled.";
pub const RESUME_TEXT: &str =
    "**Status Unknown**\nThe bot is restarting. This watch will resume automatically once it is back.";

pub const PARTICIPANTS_FIELD: &str = "Current Participants";
pub const JOIN_LINK_FIELD: &str = "Join Link";
pub const DURATION_FIELD: &str = "Duration";
pub const TOTAL_FIELD: &str = "Total Participants";

/// Lifecycle of a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    InProgress,
    Ended,
    Canceled,
    ShutdownNotice,
}

impl WatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WatchState::Canceled | WatchState::ShutdownNotice)
    }
}

/// A render the process should perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPlan {
    pub action: MessageAction,
    pub content: StatusMessage,
    /// Keep the message reference after rendering
    pub retain: bool,
}

/// Result of feeding one event to the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub render: Option<RenderPlan>,
    pub stop: bool,
}

/// Pure watch state machine
#[derive(Debug, Clone)]
pub struct WatchMachine {
    key: WatchKey,
    state: WatchState,
    flags: FeatureFlags,
    persistence_enabled: bool,
    meeting_name: String,
}

impl WatchMachine {
    pub fn new(key: WatchKey, flags: FeatureFlags, persistence_enabled: bool, meeting_name: &str) -> Self {
        Self {
            key,
            state: WatchState::Idle,
            flags,
            persistence_enabled,
            meeting_name: meeting_name.to_string(),
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn flags(&self) -> &FeatureFlags {
        &self.flags
    }

    pub fn key(&self) -> &WatchKey {
        &self.key
    }

    /// Advance on `event`. `has_message` tells whether a status message is retained.
    pub fn step(&mut self, event: &WatchEvent, has_message: bool) -> Step {
        if self.state.is_terminal() {
            return Step { render: None, stop: true };
        }

        match event {
            WatchEvent::Update(update) => {
                if !update.meeting_name().is_empty() {
                    self.meeting_name = update.meeting_name().to_string();
                }
                let render = self.on_update(update, has_message);
                Step { render: Some(render), stop: false }
            },
            WatchEvent::FlagsUpdated(flags) => {
                self.flags = flags.clone();
                Step { render: None, stop: false }
            },
            WatchEvent::Canceled => {
                self.state = WatchState::Canceled;
                Step {
                    render: Some(self.terminal_plan(CANCELED_TEXT.to_string(), has_message)),
                    stop: true,
                }
            },
            WatchEvent::Shutdown => {
                self.state = WatchState::ShutdownNotice;
                let text = if self.persistence_enabled {
                    RESUME_TEXT.to_string()
                } else {
                    format!(
                        "**Status Unknown**\nThe watch stopped due to bot shutdown. Please restart with `{}` when available.",
                        self.restart_command()
                    )
                };
                Step {
                    render: Some(self.terminal_plan(text, has_message)),
                    stop: true,
                }
            },
        }
    }

    fn on_update(&mut self, update: &MeetingUpdate, has_message: bool) -> RenderPlan {
        match update {
            MeetingUpdate::ParticipantJoined { roster, .. } | MeetingUpdate::ParticipantLeft { roster, .. } => {
                let phase = if self.state == WatchState::InProgress {
                    Phase::Continuing
                } else {
                    Phase::Starting
                };
                self.state = WatchState::InProgress;

                let mut fields = vec![(PARTICIPANTS_FIELD.to_string(), roster.clone())];
                if let Some(link) = &self.flags.join_link {
                    fields.push((JOIN_LINK_FIELD.to_string(), link.clone()));
                }
                self.plan(phase, has_message, IN_PROGRESS_TEXT.to_string(), fields)
            },
            MeetingUpdate::MeetingEnded {
                duration,
                total_participants,
                ..
            } => {
                self.state = WatchState::Ended;
                let fields = if self.flags.summaries {
                    vec![
                        (DURATION_FIELD.to_string(), format_duration(*duration)),
                        (TOTAL_FIELD.to_string(), total_participants.to_string()),
                    ]
                } else {
                    Vec::new()
                };
                self.plan(Phase::Ended, has_message, ENDED_TEXT.to_string(), fields)
            },
        }
    }

    fn terminal_plan(&self, description: String, has_message: bool) -> RenderPlan {
        self.plan(Phase::Terminal, has_message, description, Vec::new())
    }

    fn plan(&self, phase: Phase, has_message: bool, description: String, fields: Vec<(String, String)>) -> RenderPlan {
        let level = self.flags.history_level;
        RenderPlan {
            action: retention::plan(level, has_message, phase),
            content: StatusMessage {
                title: self.title(),
                description,
                fields,
                silent: self.flags.silent,
            },
            retain: retention::retain_after(level, phase),
        }
    }

    fn title(&self) -> String {
        if self.meeting_name.is_empty() {
            format!("Meeting {}", self.key.meeting)
        } else {
            self.meeting_name.clone()
        }
    }

    fn restart_command(&self) -> String {
        if self.flags.restart_command.is_empty() {
            self.flags.restart_command_for(&self.key.meeting)
        } else {
            self.flags.restart_command.clone()
        }
    }
}

/// Long-lived task consuming one delivery channel
pub struct WatchProcess {
    machine: WatchMachine,
    channel_id: ChannelId,
    message: Option<MessageRef>,
    sink: Arc<dyn StatusSink>,
}

impl WatchProcess {
    pub fn new(machine: WatchMachine, channel_id: &str, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            machine,
            channel_id: channel_id.to_string(),
            message: None,
            sink,
        }
    }

    /// Consume events until a terminal one arrives or the channel closes
    pub async fn run(mut self, subscription: Subscription) -> WatchState {
        let key = self.machine.key().clone();
        info!(%key, channel = %self.channel_id, "watch process running");

        loop {
            let Some(event) = subscription.recv().await else {
                debug!(%key, "delivery channel closed");
                break;
            };
            debug!(%key, event = event.label(), "watch event received");

            let step = self.machine.step(&event, self.message.is_some());
            if let Some(plan) = step.render {
                self.render(plan).await;
            }
            if step.stop {
                break;
            }
        }

        let state = self.machine.state();
        info!(%key, ?state, "watch process stopped");
        state
    }

    async fn render(&mut self, plan: RenderPlan) {
        let previous = self.message.take();
        let rendered = match (plan.action, previous) {
            (MessageAction::Edit, Some(existing)) => {
                match self.sink.edit(&existing, &plan.content).await {
                    Ok(updated) => Some(updated),
                    Err(e) => {
                        warn!(error = %e, "could not edit status message");
                        Some(existing)
                    },
                }
            },
            (MessageAction::Replace, Some(existing)) => {
                if let Err(e) = self.sink.delete(&existing).await {
                    warn!(error = %e, "could not delete previous status message");
                }
                self.post(&plan.content).await
            },
            (_, _) => self.post(&plan.content).await,
        };

        self.message = if plan.retain { rendered } else { None };
    }

    async fn post(&self, content: &StatusMessage) -> Option<MessageRef> {
        self.sink
            .send(&self.channel_id, content)
            .await
            .map_err(|e| warn!(channel = %self.channel_id, error = %e, "could not send status message"))
            .ok()
    }
}
