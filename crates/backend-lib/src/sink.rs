//! Boundary to the chat client that renders status messages.
use async_trait::async_trait;
use meetwatch_common::ChannelId;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;

/// Handle to a status message the chat client already posted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: String,
}

/// Content of a status message, independent of any chat platform
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusMessage {
    /// Meeting topic
    pub title: String,
    pub description: String,
    /// Named fields in display order
    pub fields: Vec<(String, String)>,
    /// Post without notifying the channel
    pub silent: bool,
}

impl StatusMessage {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }
}

#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Post a new status message
    async fn send(&self, channel: &str, message: &StatusMessage) -> Result<MessageRef, AppError>;

    /// Replace the content of an existing message
    async fn edit(&self, message_ref: &MessageRef, message: &StatusMessage) -> Result<MessageRef, AppError>;

    async fn delete(&self, message_ref: &MessageRef) -> Result<(), AppError>;

    /// Plain notice, e.g. after a restart
    async fn notify(&self, channel: &str, text: &str) -> Result<(), AppError>;
}

/// Sink that only logs what it would render
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl StatusSink for LogSink {
    async fn send(&self, channel: &str, message: &StatusMessage) -> Result<MessageRef, AppError> {
        let message_ref = MessageRef {
            channel_id: channel.to_string(),
            message_id: Uuid::new_v4().to_string(),
        };
        info!(
            channel = %channel,
            message_id = %message_ref.message_id,
            title = %message.title,
            description = %message.description,
            fields = ?message.fields,
            silent = message.silent,
            "status message sent"
        );
        Ok(message_ref)
    }

    async fn edit(&self, message_ref: &MessageRef, message: &StatusMessage) -> Result<MessageRef, AppError> {
        info!(
            channel = %message_ref.channel_id,
            message_id = %message_ref.message_id,
            title = %message.title,
            description = %message.description,
            fields = ?message.fields,
            "status message edited"
        );
        Ok(message_ref.clone())
    }

    async fn delete(&self, message_ref: &MessageRef) -> Result<(), AppError> {
        info!(
            channel = %message_ref.channel_id,
            message_id = %message_ref.message_id,
            "status message deleted"
        );
        Ok(())
    }

    async fn notify(&self, channel: &str, text: &str) -> Result<(), AppError> {
        info!(%channel, %text, "notice sent");
        Ok(())
    }
}
