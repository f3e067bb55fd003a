//! Per-meeting presence tracking.
//!
//! Leaving marks a participant absent instead of deleting it, so duplicate
//! leave events are harmless and a quick leave/rejoin keeps the cached name.
//! Only [`Roster::drain`] deletes records.
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use meetwatch_common::MeetingId;
use parking_lot::{Mutex, MutexGuard, RwLock};

/// Placeholder rendered when nobody is known to be present
pub const UNKNOWN_ROSTER: &str = "Unknown";

#[derive(Debug, Clone)]
struct Participant {
    name: String,
    present: bool,
    /// First-seen order, used to render a stable roster
    order: u64,
}

#[derive(Default)]
struct RosterInner {
    participants: HashMap<String, Participant>,
    next_order: u64,
}

/// Participants of a single meeting
#[derive(Default)]
pub struct Roster {
    inner: RwLock<RosterInner>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a participant. An empty `name` keeps the cached one.
    pub fn upsert(&self, participant_id: &str, name: &str, present: bool) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        if let Some(existing) = inner.participants.get_mut(participant_id) {
            if !name.is_empty() {
                existing.name = name.to_string();
            }
            existing.present = present;
            return;
        }

        inner.participants.insert(
            participant_id.to_string(),
            Participant {
                name: name.to_string(),
                present,
                order: inner.next_order,
            },
        );
        inner.next_order += 1;
    }

    /// Mark a participant as gone. Unknown participants are recorded absent.
    pub fn mark_absent(&self, participant_id: &str) {
        self.upsert(participant_id, "", false);
    }

    /// Newline-joined names of present participants in first-seen order
    pub fn render(&self) -> String {
        let inner = self.inner.read();
        let mut present: Vec<&Participant> =
            inner.participants.values().filter(|p| p.present).collect();
        if present.is_empty() {
            return UNKNOWN_ROSTER.to_string();
        }
        present.sort_by_key(|p| p.order);
        present
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Clear every record and return how many distinct participants were seen
    pub fn drain(&self) -> usize {
        let mut inner = self.inner.write();
        let count = inner.participants.len();
        inner.participants.clear();
        inner.next_order = 0;
        count
    }

    pub fn present_count(&self) -> usize {
        self.inner
            .read()
            .participants
            .values()
            .filter(|p| p.present)
            .count()
    }
}

/// A watched meeting: its display name and roster
pub struct Meeting {
    id: MeetingId,
    name: RwLock<String>,
    roster: Roster,
    updates: Mutex<()>,
}

impl Meeting {
    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: RwLock::new(name.to_string()),
            roster: Roster::new(),
            updates: Mutex::new(()),
        }
    }

    /// Serializes updates to this meeting while the guard lives
    pub fn lock_updates(&self) -> MutexGuard<'_, ()> {
        self.updates.lock()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Last write wins; empty names never overwrite a known one
    pub fn set_name(&self, name: &str) {
        if name.is_empty() {
            return;
        }
        let mut current = self.name.write();
        if *current != name {
            *current = name.to_string();
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }
}

/// All meetings known to this instance
#[derive(Default)]
pub struct MeetingStore {
    meetings: DashMap<MeetingId, Arc<Meeting>>,
}

impl MeetingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a meeting, or return the existing one.
    pub fn ensure(&self, meeting_id: &str, known_name: &str) -> Arc<Meeting> {
        let meeting = self
            .meetings
            .entry(meeting_id.to_string())
            .or_insert_with(|| Arc::new(Meeting::new(meeting_id, known_name)))
            .value()
            .clone();
        if meeting.name().is_empty() {
            meeting.set_name(known_name);
        }
        meeting
    }

    pub fn get(&self, meeting_id: &str) -> Option<Arc<Meeting>> {
        self.meetings.get(meeting_id).map(|entry| entry.value().clone())
    }

    /// Display name of a meeting, empty when unknown
    pub fn name(&self, meeting_id: &str) -> String {
        self.get(meeting_id).map(|m| m.name()).unwrap_or_default()
    }

    pub fn contains(&self, meeting_id: &str) -> bool {
        self.meetings.contains_key(meeting_id)
    }

    /// Drop a meeting unless `keep` says it is still needed. `keep` runs under
    /// the entry's shard lock, so a concurrent [`MeetingStore::ensure`] either
    /// sees the old entry or recreates it afterwards.
    pub fn evict_unless(&self, meeting_id: &str, keep: impl FnOnce() -> bool) -> bool {
        self.meetings.remove_if(meeting_id, |_, _| !keep()).is_some()
    }
}
