//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backend_lib::commands::Commands;
use backend_lib::error::AppError;
use backend_lib::orchestrator::Orchestrator;
use backend_lib::peer::PeerLink;
use backend_lib::sink::{MessageRef, StatusMessage, StatusSink};
use backend_lib::storage::WatchStore;
use meetwatch_common::{FeatureFlags, RawUpdate, WatchRecord};
use parking_lot::Mutex;

/// Durable store kept in memory
#[derive(Default)]
pub struct MemoryWatchStore {
    records: Mutex<BTreeMap<(String, String), WatchRecord>>,
}

impl MemoryWatchStore {
    pub fn with_records(records: Vec<WatchRecord>) -> Self {
        let store = Self::default();
        {
            let mut map = store.records.lock();
            for record in records {
                map.insert((record.group_id.clone(), record.meeting_id.clone()), record);
            }
        }
        store
    }

    pub fn get(&self, group: &str, meeting: &str) -> Option<WatchRecord> {
        self.records
            .lock()
            .get(&(group.to_string(), meeting.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }
}

#[async_trait]
impl WatchStore for MemoryWatchStore {
    async fn list_active_watches(&self) -> Result<Vec<WatchRecord>, AppError> {
        Ok(self.records.lock().values().cloned().collect())
    }

    async fn save_watch(&self, record: &WatchRecord) -> Result<(), AppError> {
        self.records
            .lock()
            .insert((record.group_id.clone(), record.meeting_id.clone()), record.clone());
        Ok(())
    }

    async fn delete_watch(&self, group: &str, meeting: &str) -> Result<(), AppError> {
        self.records.lock().remove(&(group.to_string(), meeting.to_string()));
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}

/// Peer with a fixed health answer that records forwarded updates
#[derive(Default)]
pub struct FixedPeer {
    healthy: bool,
    forwarded: Mutex<Vec<RawUpdate>>,
}

impl FixedPeer {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            ..Self::default()
        }
    }

    pub fn unhealthy() -> Self {
        Self::default()
    }

    pub fn forwarded(&self) -> Vec<RawUpdate> {
        self.forwarded.lock().clone()
    }
}

#[async_trait]
impl PeerLink for FixedPeer {
    async fn is_healthy(&self) -> bool {
        self.healthy
    }

    async fn forward(&self, update: &RawUpdate) -> Result<(), AppError> {
        self.forwarded.lock().push(update.clone());
        Ok(())
    }
}

/// One call made against a [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Send { channel: String, id: String, message: StatusMessage },
    Edit { id: String, message: StatusMessage },
    Delete { id: String },
    Notify { channel: String, text: String },
}

/// Sink remembering every call; message ids are `msg-1`, `msg-2`, ...
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    next_id: AtomicUsize,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    pub fn notices(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Notify { channel, text } => Some((channel, text)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn send(&self, channel: &str, message: &StatusMessage) -> Result<MessageRef, AppError> {
        let id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.calls.lock().push(SinkCall::Send {
            channel: channel.to_string(),
            id: id.clone(),
            message: message.clone(),
        });
        Ok(MessageRef {
            channel_id: channel.to_string(),
            message_id: id,
        })
    }

    async fn edit(&self, message_ref: &MessageRef, message: &StatusMessage) -> Result<MessageRef, AppError> {
        self.calls.lock().push(SinkCall::Edit {
            id: message_ref.message_id.clone(),
            message: message.clone(),
        });
        Ok(message_ref.clone())
    }

    async fn delete(&self, message_ref: &MessageRef) -> Result<(), AppError> {
        self.calls.lock().push(SinkCall::Delete {
            id: message_ref.message_id.clone(),
        });
        Ok(())
    }

    async fn notify(&self, channel: &str, text: &str) -> Result<(), AppError> {
        self.calls.lock().push(SinkCall::Notify {
            channel: channel.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Commands over an orchestrator wired to the given doubles
pub fn commands_with(store: Arc<dyn WatchStore>, peer: Arc<dyn PeerLink>, sink: Arc<RecordingSink>) -> Commands {
    let orchestrator = Arc::new(Orchestrator::new(store, peer));
    Commands::new(orchestrator, sink)
}

pub fn record(group: &str, channel: &str, meeting: &str, topic: &str) -> WatchRecord {
    WatchRecord {
        meeting_id: meeting.to_string(),
        group_id: group.to_string(),
        channel_id: channel.to_string(),
        meeting_topic: topic.to_string(),
        flags: FeatureFlags::default().with_restart_command(meeting),
    }
}
