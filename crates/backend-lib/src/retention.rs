//! History-retention policy for status messages.
//!
//! | Level   | New occurrence, message retained | After meeting end |
//! |---------|----------------------------------|-------------------|
//! | Full    | post new                         | drop reference    |
//! | Partial | delete old, post new             | keep reference    |
//! | Minimal | edit in place                    | keep reference    |
//!
//! Every other render edits the retained message, or posts one if none is
//! retained. Nothing here performs I/O.
use meetwatch_common::HistoryLevel;

/// Point in the watch lifecycle a render happens at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// First update of a new meeting occurrence
    Starting,
    /// Further updates while the meeting runs
    Continuing,
    /// Meeting just ended
    Ended,
    /// Cancel or shutdown notice
    Terminal,
}

/// What to do with the externally visible message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAction {
    /// Post a new message, leaving any old one alone
    Post,
    /// Edit the retained message in place
    Edit,
    /// Delete the retained message, then post a new one
    Replace,
}

/// Decide how to render at `phase`
pub fn plan(level: HistoryLevel, has_message: bool, phase: Phase) -> MessageAction {
    if !has_message {
        return MessageAction::Post;
    }
    match (phase, level) {
        (Phase::Starting, HistoryLevel::Full) => MessageAction::Post,
        (Phase::Starting, HistoryLevel::Partial) => MessageAction::Replace,
        (Phase::Starting, HistoryLevel::Minimal) => MessageAction::Edit,
        (Phase::Continuing | Phase::Ended | Phase::Terminal, _) => MessageAction::Edit,
    }
}

/// Whether the message reference survives the render at `phase`
pub fn retain_after(level: HistoryLevel, phase: Phase) -> bool {
    !(phase == Phase::Ended && level == HistoryLevel::Full)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEVELS: [HistoryLevel; 3] = [HistoryLevel::Full, HistoryLevel::Partial, HistoryLevel::Minimal];

    #[test]
    fn test_without_message_always_posts() {
        for level in LEVELS {
            for phase in [Phase::Starting, Phase::Continuing, Phase::Ended, Phase::Terminal] {
                assert_eq!(plan(level, false, phase), MessageAction::Post);
            }
        }
    }

    #[test]
    fn test_new_occurrence_per_level() {
        assert_eq!(plan(HistoryLevel::Full, true, Phase::Starting), MessageAction::Post);
        assert_eq!(plan(HistoryLevel::Partial, true, Phase::Starting), MessageAction::Replace);
        assert_eq!(plan(HistoryLevel::Minimal, true, Phase::Starting), MessageAction::Edit);
    }

    #[test]
    fn test_terminal_notices_never_delete() {
        for level in LEVELS {
            assert_eq!(plan(level, true, Phase::Terminal), MessageAction::Edit);
            assert!(retain_after(level, Phase::Terminal));
        }
    }

    #[test]
    fn test_only_full_history_drops_after_end() {
        assert!(!retain_after(HistoryLevel::Full, Phase::Ended));
        assert!(retain_after(HistoryLevel::Partial, Phase::Ended));
        assert!(retain_after(HistoryLevel::Minimal, Phase::Ended));
        assert!(retain_after(HistoryLevel::Full, Phase::Continuing));
    }
}
