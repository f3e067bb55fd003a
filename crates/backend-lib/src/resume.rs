//! Restore persisted watches after a restart.
use std::collections::BTreeMap;

use meetwatch_common::{ChannelId, MeetingId};
use tracing::{info, warn};

use crate::commands::Commands;

/// Relaunch every saved watch and post one notice per channel.
/// Returns how many watches were resumed.
pub async fn resume_watches(commands: &Commands) -> usize {
    let records = commands.orchestrator().saved_watches().await;
    if records.is_empty() {
        info!("no saved watches to resume");
        return 0;
    }

    let mut by_channel: BTreeMap<ChannelId, Vec<MeetingId>> = BTreeMap::new();
    let mut resumed = 0;
    for record in records {
        let (group, channel, meeting) = (
            record.group_id.clone(),
            record.channel_id.clone(),
            record.meeting_id.clone(),
        );
        if !commands.launch(record) {
            warn!(%group, %meeting, "saved watch already running, skipped");
            continue;
        }
        by_channel.entry(channel).or_default().push(meeting);
        resumed += 1;
    }

    for (channel, meetings) in &by_channel {
        let text = resume_notice(meetings);
        if let Err(e) = commands.sink().notify(channel, &text).await {
            warn!(%channel, error = %e, "could not post resume notice");
        }
    }

    info!(resumed, channels = by_channel.len(), "saved watches resumed");
    resumed
}

/// Text of the notice posted in a channel whose watches were resumed
pub fn resume_notice(meetings: &[MeetingId]) -> String {
    match meetings {
        [single] => format!("The bot restarted and resumed the watch on meeting ID `{single}`."),
        many => {
            let mut text = String::from("The bot restarted and resumed watches on the following meetings:");
            for meeting in many {
                text.push_str(&format!("\n- `{meeting}`"));
            }
            text
        },
    }
}
