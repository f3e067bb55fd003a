//! Facade over the watch index, presence store, fan-out registry,
//! persistence and peer link. The only routing object other layers touch.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use meetwatch_common::{FeatureFlags, GroupId, MeetingId, RawEventKind, RawUpdate, WatchRecord};
use tracing::{debug, error, info, warn};

use crate::fanout::{FanoutRegistry, Subscription, TerminalReason};
use crate::index::WatchIndex;
use crate::messages::{meeting_duration, MeetingUpdate, WatchEvent};
use crate::peer::PeerLink;
use crate::presence::MeetingStore;
use crate::storage::WatchStore;

/// What [`Orchestrator::shutdown`] decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The peer answered healthy and keeps serving; nobody was notified
    PeerTookOver,
    /// This many watch processes received the shutdown sentinel
    Notified(usize),
}

pub struct Orchestrator {
    index: WatchIndex,
    meetings: MeetingStore,
    fanout: FanoutRegistry,
    store: Arc<dyn WatchStore>,
    peer: Arc<dyn PeerLink>,
    shutting_down: AtomicBool,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn WatchStore>, peer: Arc<dyn PeerLink>) -> Self {
        Self {
            index: WatchIndex::new(),
            meetings: MeetingStore::new(),
            fanout: FanoutRegistry::new(),
            store,
            peer,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Whether the given meeting is being monitored by any group
    pub fn is_watched_meeting(&self, meeting: &str) -> bool {
        self.index.is_active(meeting)
    }

    /// Whether the given meeting has an ongoing watch in the given group
    pub fn is_ongoing_watch(&self, group: &str, meeting: &str) -> bool {
        self.index.exists(group, meeting)
    }

    /// Lists all meetings being watched by a given group
    pub fn group_meetings(&self, group: &str) -> Vec<MeetingId> {
        self.index.meetings_of(group)
    }

    /// Lists all groups watching a given meeting
    pub fn meeting_groups(&self, meeting: &str) -> Vec<GroupId> {
        self.index.groups_of(meeting)
    }

    /// Topic of a meeting if known, empty otherwise
    pub fn meeting_name(&self, meeting: &str) -> String {
        self.meetings.name(meeting)
    }

    /// Rendered roster of a meeting, `None` if the meeting is unknown
    pub fn meeting_roster(&self, meeting: &str) -> Option<String> {
        self.meetings.get(meeting).map(|m| m.roster().render())
    }

    pub fn persistence_enabled(&self) -> bool {
        self.store.is_durable()
    }

    pub fn peer(&self) -> Arc<dyn PeerLink> {
        self.peer.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Register a watch and hand back its delivery channel, or `None` if the
    /// key is already active. Only the caller that gets `Some` may run a process.
    ///
    /// Does not persist; call [`Orchestrator::save_watch`] once the request
    /// has been validated.
    pub fn start_watch(&self, group: &str, meeting: &str, known_name: &str) -> Option<Subscription> {
        if !self.index.add(group, meeting) {
            debug!(%group, %meeting, "watch already active");
            return None;
        }
        self.meetings.ensure(meeting, known_name);
        let subscription = self.fanout.subscribe(group, meeting);
        info!(%group, %meeting, "watch started");
        Some(subscription)
    }

    /// Persist a watch record. Failures are logged and reported as `false`.
    pub async fn save_watch(&self, record: &WatchRecord) -> bool {
        match self.store.save_watch(record).await {
            Ok(()) => true,
            Err(e) => {
                error!(group = %record.group_id, meeting = %record.meeting_id, error = %e, "could not save watch");
                false
            },
        }
    }

    /// Every persisted watch, empty on failure or when persistence is off
    pub async fn saved_watches(&self) -> Vec<WatchRecord> {
        self.store.list_active_watches().await.unwrap_or_else(|e| {
            error!(error = %e, "could not list saved watches");
            Vec::new()
        })
    }

    /// Apply a raw event to presence state and notify every subscriber of the
    /// meeting, unless the update is silent. Returns how many channels received it.
    pub fn apply_update(&self, update: &RawUpdate) -> usize {
        let meeting_id = update.meeting_id.as_str();
        let Some(meeting) = self.meetings.get(meeting_id) else {
            debug!(meeting = %meeting_id, event = %update.kind, "update for unknown meeting dropped");
            return 0;
        };
        // Held through publish so subscribers see updates in the order applied
        let _serial = meeting.lock_updates();
        meeting.set_name(&update.meeting_name);
        let meeting_name = meeting.name();

        let derived = match update.kind {
            RawEventKind::ParticipantJoined | RawEventKind::ParticipantLeft => {
                let Some(participant_id) = update.participant_id.as_deref() else {
                    warn!(meeting = %meeting_id, event = %update.kind, "participant event without participant id dropped");
                    return 0;
                };
                let name = update.participant_name.as_deref().unwrap_or_default();
                if update.kind == RawEventKind::ParticipantJoined {
                    meeting.roster().upsert(participant_id, name, true);
                    MeetingUpdate::ParticipantJoined {
                        meeting_name,
                        roster: meeting.roster().render(),
                    }
                } else {
                    meeting.roster().mark_absent(participant_id);
                    MeetingUpdate::ParticipantLeft {
                        meeting_name,
                        roster: meeting.roster().render(),
                    }
                }
            },
            RawEventKind::MeetingEnded => MeetingUpdate::MeetingEnded {
                meeting_name,
                duration: meeting_duration(update.start_time.as_deref(), update.end_time.as_deref()),
                total_participants: meeting.roster().drain(),
            },
        };

        if update.silent {
            debug!(meeting = %meeting_id, event = %update.kind, "silent update applied");
            return 0;
        }

        let delivered = self.fanout.publish(meeting_id, &WatchEvent::Update(derived));
        debug!(meeting = %meeting_id, event = %update.kind, delivered, "update published");
        delivered
    }

    /// Push new flags to the single addressed watch. `false` if it isn't running.
    pub fn update_flags(&self, group: &str, meeting: &str, flags: FeatureFlags) -> bool {
        let sent = self.fanout.send_to(group, meeting, WatchEvent::FlagsUpdated(flags));
        if sent {
            info!(%group, %meeting, "watch flags updated");
        } else {
            warn!(%group, %meeting, "flags update for missing watch dropped");
        }
        sent
    }

    /// Stop a watch for good: storage first, then the terminal event, then the index.
    /// The meeting's presence state goes with its last watch.
    pub async fn cancel_watch(&self, group: &str, meeting: &str) -> bool {
        let existed = self.index.exists(group, meeting);

        if let Err(e) = self.store.delete_watch(group, meeting).await {
            error!(%group, %meeting, error = %e, "could not delete saved watch");
        }
        self.fanout.retire(group, meeting, TerminalReason::Canceled);
        self.index.remove(group, meeting);
        if self.meetings.evict_unless(meeting, || self.index.is_active(meeting)) {
            debug!(%meeting, "presence state dropped with last watch");
        }

        info!(%group, %meeting, existed, "watch canceled");
        existed
    }

    /// Tell every watch process the instance is going away, unless the peer
    /// is healthy and will keep serving.
    ///
    /// The health flag flips before the probe so two peers shutting down
    /// together both notify instead of both deferring.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        self.shutting_down.store(true, Ordering::SeqCst);

        if self.peer.is_healthy().await {
            info!("peer instance is healthy, leaving watches to it");
            return ShutdownOutcome::PeerTookOver;
        }

        let handles = self.fanout.broadcast_shutdown();
        let notified = handles
            .iter()
            .filter(|handle| handle.send(WatchEvent::Shutdown))
            .count();
        info!(notified, "shutdown sentinel sent to watch processes");
        ShutdownOutcome::Notified(notified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::NoPeer;
    use crate::storage::DisabledWatchStore;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(DisabledWatchStore), Arc::new(NoPeer))
    }

    #[tokio::test]
    async fn test_join_leave_roster() {
        let o = orchestrator();
        let sub = o.start_watch("g1", "m1", "").unwrap();

        o.apply_update(&RawUpdate::joined("m1", "p1", "Alice").with_meeting_name("Standup"));
        o.apply_update(&RawUpdate::joined("m1", "p2", "Bob").with_meeting_name("Standup"));
        o.apply_update(&RawUpdate::left("m1", "p1", "Alice"));

        assert_eq!(
            sub.recv().await,
            Some(WatchEvent::Update(MeetingUpdate::ParticipantJoined {
                meeting_name: "Standup".to_string(),
                roster: "Alice".to_string(),
            }))
        );
        sub.recv().await;
        assert_eq!(
            sub.recv().await,
            Some(WatchEvent::Update(MeetingUpdate::ParticipantLeft {
                meeting_name: "Standup".to_string(),
                roster: "Bob".to_string(),
            }))
        );
    }

    #[tokio::test]
    async fn test_meeting_end_reports_summary() {
        let o = orchestrator();
        let sub = o.start_watch("g1", "m1", "Standup").unwrap();
        for (id, name) in [("p1", "Alice"), ("p2", "Bob"), ("p3", "Carol")] {
            o.apply_update(&RawUpdate::joined("m1", id, name).silenced());
        }

        o.apply_update(&RawUpdate::ended("m1", "2024-05-01T10:00:00Z", "not a time"));

        assert_eq!(
            sub.recv().await,
            Some(WatchEvent::Update(MeetingUpdate::MeetingEnded {
                meeting_name: "Standup".to_string(),
                duration: None,
                total_participants: 3,
            }))
        );
        assert_eq!(o.meeting_roster("m1").as_deref(), Some("Unknown"));
    }

    #[tokio::test]
    async fn test_participant_event_without_id_is_dropped() {
        let o = orchestrator();
        let sub = o.start_watch("g1", "m1", "").unwrap();
        let mut update = RawUpdate::joined("m1", "p1", "Alice");
        update.participant_id = None;

        assert_eq!(o.apply_update(&update), 0);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_update_for_unknown_meeting_is_dropped() {
        let o = orchestrator();
        assert_eq!(o.apply_update(&RawUpdate::joined("nope", "p1", "Alice")), 0);
        assert_eq!(o.meeting_roster("nope"), None);
    }

    #[tokio::test]
    async fn test_update_flags_missing_watch() {
        let o = orchestrator();
        assert!(!o.update_flags("g1", "m1", FeatureFlags::default()));
    }

    #[tokio::test]
    async fn test_start_watch_twice_yields_one_subscription() {
        let o = orchestrator();
        assert!(o.start_watch("g1", "m1", "").is_some());
        assert!(o.start_watch("g1", "m1", "").is_none());
        assert!(o.start_watch("g2", "m1", "").is_some());
    }

    #[test]
    fn test_concurrent_joins_publish_latest_roster_last() {
        for _ in 0..200 {
            let o = Arc::new(orchestrator());
            let sub = o.start_watch("g1", "m1", "").unwrap();
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let workers: Vec<_> = [("p1", "Alice"), ("p2", "Bob")]
                .into_iter()
                .map(|(id, name)| {
                    let o = o.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        o.apply_update(&RawUpdate::joined("m1", id, name));
                    })
                })
                .collect();
            for worker in workers {
                worker.join().unwrap();
            }

            let mut last = None;
            while let Some(event) = sub.try_recv() {
                last = Some(event);
            }
            match last {
                Some(WatchEvent::Update(MeetingUpdate::ParticipantJoined { roster, .. })) => {
                    assert_eq!(roster.lines().count(), 2, "stale roster delivered last: {roster:?}");
                },
                other => panic!("unexpected last event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_last_cancel_drops_presence_state() {
        let o = orchestrator();
        o.start_watch("g1", "m1", "").unwrap();
        o.start_watch("g2", "m1", "").unwrap();
        o.apply_update(&RawUpdate::joined("m1", "p1", "Alice"));

        o.cancel_watch("g1", "m1").await;
        assert_eq!(o.meeting_roster("m1").as_deref(), Some("Alice"));

        o.cancel_watch("g2", "m1").await;
        assert_eq!(o.meeting_roster("m1"), None);
        assert_eq!(o.apply_update(&RawUpdate::joined("m1", "p2", "Bob")), 0);

        // Watching again starts from an empty roster
        o.start_watch("g1", "m1", "").unwrap();
        assert_eq!(o.meeting_roster("m1").as_deref(), Some("Unknown"));
    }

    #[tokio::test]
    async fn test_shutdown_marks_instance_unhealthy() {
        let o = orchestrator();
        assert!(!o.is_shutting_down());
        assert_eq!(o.shutdown().await, ShutdownOutcome::Notified(0));
        assert!(o.is_shutting_down());
    }
}
