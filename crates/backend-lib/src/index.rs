//! Bidirectional watch index.
//!
//! Tracks which meetings a group watches and which groups watch a meeting.
//! Both directions live behind one lock so they can never disagree:
//! `m ∈ forward[g]` iff `g ∈ backward[m]`.
use std::collections::{HashMap, HashSet};

use meetwatch_common::{GroupId, MeetingId};
use parking_lot::RwLock;

#[derive(Default)]
struct Maps {
    forward: HashMap<GroupId, HashSet<MeetingId>>,
    backward: HashMap<MeetingId, HashSet<GroupId>>,
}

/// Index of active watch keys
#[derive(Default)]
pub struct WatchIndex {
    maps: RwLock<Maps>,
}

impl WatchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `(group, meeting)`. Returns `false` if the pair was already present,
    /// in which case nothing changes.
    pub fn add(&self, group: &str, meeting: &str) -> bool {
        let mut maps = self.maps.write();
        let inserted = maps
            .forward
            .entry(group.to_string())
            .or_default()
            .insert(meeting.to_string());
        if inserted {
            maps.backward
                .entry(meeting.to_string())
                .or_default()
                .insert(group.to_string());
        }
        inserted
    }

    /// Forget `(group, meeting)`. Removing an absent pair is a no-op.
    pub fn remove(&self, group: &str, meeting: &str) {
        let mut maps = self.maps.write();

        if let Some(meetings) = maps.forward.get_mut(group) {
            meetings.remove(meeting);
            if meetings.is_empty() {
                maps.forward.remove(group);
            }
        }
        if let Some(groups) = maps.backward.get_mut(meeting) {
            groups.remove(group);
            if groups.is_empty() {
                maps.backward.remove(meeting);
            }
        }
    }

    pub fn exists(&self, group: &str, meeting: &str) -> bool {
        self.maps
            .read()
            .forward
            .get(group)
            .is_some_and(|meetings| meetings.contains(meeting))
    }

    /// Meetings watched by `group`, sorted
    pub fn meetings_of(&self, group: &str) -> Vec<MeetingId> {
        let maps = self.maps.read();
        let mut meetings: Vec<MeetingId> = maps
            .forward
            .get(group)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        meetings.sort();
        meetings
    }

    /// Groups watching `meeting`, sorted
    pub fn groups_of(&self, meeting: &str) -> Vec<GroupId> {
        let maps = self.maps.read();
        let mut groups: Vec<GroupId> = maps
            .backward
            .get(meeting)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        groups.sort();
        groups
    }

    /// Whether at least one group watches `meeting`
    pub fn is_active(&self, meeting: &str) -> bool {
        self.maps
            .read()
            .backward
            .get(meeting)
            .is_some_and(|groups| !groups.is_empty())
    }
}
