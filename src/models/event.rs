use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One inbound message event from the chat-platform collaborator. The caller
/// filters on `author_is_self` and `in_results_channel` before handing the
/// event to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub message_id: u64,
    pub content: String,
    pub author_is_self: bool,
    pub in_results_channel: bool,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
}

/// Side effects the engine wants executed. The engine never performs these
/// itself; the platform collaborator does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    GrantRole(u64),
    RevokeRole(u64),
    RefreshLeaderboard {
        rendered_view: String,
        serialized_state: String,
    },
    LogEvent { kind: LogKind, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    UnresolvedMention,
    EditIgnored,
    Recalculated,
    KingExpired,
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogKind::UnresolvedMention => write!(f, "unresolved_mention"),
            LogKind::EditIgnored => write!(f, "edit_ignored"),
            LogKind::Recalculated => write!(f, "recalculated"),
            LogKind::KingExpired => write!(f, "king_expired"),
        }
    }
}

/// How one applied outcome moved the king state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    Crowned { king: u64 },
    Defended { king: u64, streak: u32 },
    Dethroned { old_king: u64, new_king: u64 },
    NoOp,
}

/// Classification of a whole message against the dedup window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Stored fingerprint matches; nothing to do.
    Unchanged,
    /// Not previously seen, or seen with different content but no winner flip.
    New,
    /// At least one already-recorded result now names a different winner.
    Changed,
}

/// Per-outcome processing result. Invalid input is a variant, not an error,
/// so callers can count and log exclusions without special-casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeDisposition {
    Applied(TransitionEffect),
    Excluded(ExclusionReason),
    /// Resolution was handed to the edit reconciler (or deliberately skipped
    /// for an edit outside the recency window).
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    /// A mentioned participant could not be resolved to a known member.
    UnresolvedMention {
        winner_mention: u64,
        loser_mention: u64,
    },
    /// The result key is already recorded with the same winner; ego values on
    /// such reprocessed results are intentionally ignored.
    AlreadyRecorded,
}

/// Everything the engine has to say about one processed event.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub class: MessageClass,
    pub dispositions: Vec<OutcomeDisposition>,
    pub intents: Vec<Intent>,
}

impl ProcessReport {
    pub fn skipped(class: MessageClass) -> Self {
        ProcessReport {
            class,
            dispositions: Vec::new(),
            intents: Vec::new(),
        }
    }

    pub fn applied_count(&self) -> usize {
        self.dispositions
            .iter()
            .filter(|d| matches!(d, OutcomeDisposition::Applied(_)))
            .count()
    }
}
