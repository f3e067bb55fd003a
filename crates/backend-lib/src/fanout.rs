//! Event fan-out registry.
//!
//! One delivery channel per watch key. The registry owns the sending half and
//! is the only place a channel is closed; closing always follows a terminal
//! event so consumers learn why they stopped.
//!
//! ```text
//!   publish(m1, ev) ──► slots[m1] ──┬──► (g1, m1) ──► watch process
//!                                   └──► (g2, m1) ──► watch process
//! ```
//!
//! Channels are unbounded, so a send never suspends while the registry lock
//! is held.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use meetwatch_common::{GroupId, MeetingId};
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::messages::WatchEvent;

/// Unique (group, meeting) subscription identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchKey {
    pub group: GroupId,
    pub meeting: MeetingId,
}

impl WatchKey {
    pub fn new(group: &str, meeting: &str) -> Self {
        Self {
            group: group.to_string(),
            meeting: meeting.to_string(),
        }
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.meeting)
    }
}

/// Why a subscription is being retired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    Canceled,
    Shutdown,
}

impl From<TerminalReason> for WatchEvent {
    fn from(reason: TerminalReason) -> Self {
        match reason {
            TerminalReason::Canceled => WatchEvent::Canceled,
            TerminalReason::Shutdown => WatchEvent::Shutdown,
        }
    }
}

type SharedReceiver = Arc<Mutex<mpsc::UnboundedReceiver<WatchEvent>>>;

/// Receiving end of a delivery channel.
///
/// Subscribing twice to the same key yields two handles onto the same
/// channel.
#[derive(Clone)]
pub struct Subscription {
    key: WatchKey,
    rx: SharedReceiver,
}

impl Subscription {
    pub fn key(&self) -> &WatchKey {
        &self.key
    }

    /// Wait for the next event; `None` once the channel is closed and drained
    pub async fn recv(&self) -> Option<WatchEvent> {
        self.rx.lock().await.recv().await
    }

    /// Non-waiting receive, `None` if nothing is queued or another task is reading
    pub fn try_recv(&self) -> Option<WatchEvent> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    pub fn same_channel(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.rx, &other.rx)
    }
}

/// Sending end handed out for a one-pass broadcast
#[derive(Clone)]
pub struct DeliveryHandle {
    pub key: WatchKey,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl DeliveryHandle {
    /// Queue `event`; `false` when the consumer is gone
    pub fn send(&self, event: WatchEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

struct Slot {
    tx: mpsc::UnboundedSender<WatchEvent>,
    rx: SharedReceiver,
}

/// Delivery channels keyed by meeting, then group
#[derive(Default)]
pub struct FanoutRegistry {
    slots: RwLock<HashMap<MeetingId, HashMap<GroupId, Slot>>>,
}

impl FanoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the channel for `(group, meeting)`, creating it if needed.
    pub fn subscribe(&self, group: &str, meeting: &str) -> Subscription {
        let key = WatchKey::new(group, meeting);
        let mut slots = self.slots.write();
        let slot = slots
            .entry(meeting.to_string())
            .or_default()
            .entry(group.to_string())
            .or_insert_with(|| {
                debug!(%key, "delivery channel created");
                let (tx, rx) = mpsc::unbounded_channel();
                Slot {
                    tx,
                    rx: Arc::new(Mutex::new(rx)),
                }
            });

        Subscription {
            key,
            rx: slot.rx.clone(),
        }
    }

    /// Deliver `event` to every channel of `meeting`. Returns how many accepted it.
    pub fn publish(&self, meeting: &str, event: &WatchEvent) -> usize {
        let slots = self.slots.read();
        let Some(groups) = slots.get(meeting) else {
            return 0;
        };

        let mut delivered = 0;
        for (group, slot) in groups {
            if slot.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(%group, %meeting, "consumer gone, event dropped");
            }
        }
        delivered
    }

    /// Deliver `event` to a single channel. `false` when the key is not registered.
    pub fn send_to(&self, group: &str, meeting: &str, event: WatchEvent) -> bool {
        self.slots
            .read()
            .get(meeting)
            .and_then(|groups| groups.get(group))
            .is_some_and(|slot| slot.tx.send(event).is_ok())
    }

    /// Deliver the terminal event, then close and deregister the channel.
    ///
    /// Returns `false` when nothing was registered for the key.
    pub fn retire(&self, group: &str, meeting: &str, reason: TerminalReason) -> bool {
        let mut slots = self.slots.write();
        let Some(groups) = slots.get_mut(meeting) else {
            return false;
        };
        let Some(slot) = groups.remove(group) else {
            return false;
        };
        if groups.is_empty() {
            slots.remove(meeting);
        }

        // Dropping the only sender closes the channel after the terminal event.
        let _ = slot.tx.send(reason.into());
        debug!(%group, %meeting, ?reason, "delivery channel retired");
        true
    }

    /// Every registered channel, for pushing a shutdown sentinel in one pass
    pub fn broadcast_shutdown(&self) -> Vec<DeliveryHandle> {
        self.slots
            .read()
            .iter()
            .flat_map(|(meeting, groups)| {
                groups.iter().map(move |(group, slot)| DeliveryHandle {
                    key: WatchKey::new(group, meeting),
                    tx: slot.tx.clone(),
                })
            })
            .collect()
    }

    pub fn is_registered(&self, group: &str, meeting: &str) -> bool {
        self.slots
            .read()
            .get(meeting)
            .is_some_and(|groups| groups.contains_key(group))
    }

    /// Number of live channels
    pub fn len(&self) -> usize {
        self.slots.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
