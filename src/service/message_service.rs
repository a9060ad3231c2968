use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::models::{
    parse_outcomes, ExclusionReason, Intent, Leaderboard, LogKind, MessageClass, MessageEvent,
    Outcome, OutcomeDisposition, ProcessReport, RetainedMessage, Snapshot, TransitionEffect,
};
use crate::service::king_service;

/// Platform-resolved participant identities. The collaborator knows who is
/// actually in the arena; the engine only asks.
pub trait MemberDirectory {
    fn is_member(&self, user_id: u64) -> bool;
}

/// SHA-256 fingerprint of normalized message content, hex encoded.
pub fn content_fingerprint(content: &str) -> String {
    let digest = Sha256::digest(content.trim().as_bytes());
    format!("{digest:x}")
}

fn log_intent(kind: LogKind, detail: String) -> Intent {
    debug!(kind = %kind, %detail, "engine event");
    Intent::LogEvent { kind, detail }
}

/// Result reconciliation engine for one arena. Owns the full state
/// exclusively; callers serialize access per arena and execute the returned
/// intents themselves.
pub struct ScrimEngine {
    config: EngineConfig,
    board: Leaderboard,
    // Competitors whose role grant failed on the platform side; retried on
    // the next transition affecting them. Not persisted.
    pending_role_grants: HashSet<u64>,
}

impl ScrimEngine {
    pub fn new(config: EngineConfig) -> Self {
        ScrimEngine {
            config,
            board: Leaderboard::default(),
            pending_role_grants: HashSet::new(),
        }
    }

    /// Rebuild an engine from a recovered state message, falling back to the
    /// empty initial state when there is none or it fails to decode.
    pub fn recover(config: EngineConfig, state_message: Option<&str>) -> Self {
        let board = match state_message {
            Some(content) => match Leaderboard::from_state_message(content) {
                Ok(board) => {
                    info!(
                        tracked_messages = board.window.tracked_len(),
                        king = ?board.current_king_id,
                        "recovered engine state from state message"
                    );
                    board
                }
                Err(e) => {
                    warn!(error = %e, "failed to decode state message, starting fresh");
                    Leaderboard::default()
                }
            },
            None => Leaderboard::default(),
        };

        ScrimEngine {
            config,
            board,
            pending_role_grants: HashSet::new(),
        }
    }

    pub fn board(&self) -> &Leaderboard {
        &self.board
    }

    pub fn snapshot(&self) -> Snapshot {
        self.board.to_snapshot()
    }

    pub fn state_message(&self) -> String {
        self.board.to_state_message()
    }

    pub fn leaderboard_view(&self) -> String {
        self.board.render(&self.config)
    }

    /// The platform rejected a role grant for this competitor. The internal
    /// state already committed; the grant is re-emitted on the next
    /// transition affecting them.
    pub fn note_role_failure(&mut self, user_id: u64) {
        warn!(user_id, "role assignment failed, will retry on next transition");
        self.pending_role_grants.insert(user_id);
    }

    /// Process one inbound message event: classify it against the dedup
    /// window, then apply outcomes, reconcile an edit, or skip.
    pub fn process(
        &mut self,
        event: &MessageEvent,
        directory: &dyn MemberDirectory,
        now: DateTime<Utc>,
    ) -> ProcessReport {
        // Caller contract: own-message and channel filtering happen upstream.
        debug_assert!(!event.author_is_self);
        debug_assert!(event.in_results_channel);

        let fingerprint = content_fingerprint(&event.content);
        if self
            .board
            .window
            .is_unchanged(event.message_id, &fingerprint)
        {
            debug!(
                message_id = event.message_id,
                "already processed with same content, skipping"
            );
            return ProcessReport::skipped(MessageClass::Unchanged);
        }

        let outcomes: Vec<Outcome> =
            parse_outcomes(&event.content, event.message_id, event.created_at).collect();
        if outcomes.is_empty() {
            debug!(message_id = event.message_id, "no game results in message");
            return ProcessReport::skipped(MessageClass::New);
        }

        // A recorded key with a different winner marks the whole message as
        // changed. An edit to a message that has scrolled out of the window
        // has no recorded keys left to compare against; the `edited` flag
        // plus its position before the window is what routes it to the
        // reconciler (which ignores it). An edited message the window never
        // held and never evicted (e.g. a typo'd report fixed by its author)
        // is still a new report and falls through to the normal path.
        let winner_changed = outcomes.iter().any(|outcome| {
            self.board
                .window
                .previous_winner(&outcome.result_key())
                .is_some_and(|prev| prev != outcome.winner_id)
        });
        let evicted_history = event.edited
            && !self.board.window.contains(event.message_id)
            && self
                .board
                .window
                .predates_window(event.message_id, self.config.recent_window);
        if winner_changed || evicted_history {
            return self.reconcile_edit(event, &fingerprint, &outcomes, directory);
        }

        // An expired king must be vacant before the next outcome is applied,
        // so that it crowns fresh rather than defending a stale streak.
        let mut intents = Vec::new();
        let mut state_changed = false;
        if king_service::should_expire(&self.board, now, self.config.king_timeout_days) {
            if let Some(vacated) = king_service::expire_king(&mut self.board) {
                state_changed = true;
                intents.push(Intent::RevokeRole(vacated));
                intents.push(log_intent(
                    LogKind::KingExpired,
                    format!(
                        "king <@{vacated}> vacated after {} days of inactivity",
                        self.config.king_timeout_days
                    ),
                ));
            }
        }

        let mut dispositions = Vec::with_capacity(outcomes.len());
        for outcome in &outcomes {
            dispositions.push(self.apply_single(outcome, directory, &mut intents, &mut state_changed));
        }

        self.board.window.admit(
            event.message_id,
            fingerprint,
            RetainedMessage {
                content: event.content.clone(),
                created_at: event.created_at,
            },
            self.config.recent_window,
        );

        if state_changed {
            intents.push(self.refresh_intent());
        }

        ProcessReport {
            class: MessageClass::New,
            dispositions,
            intents,
        }
    }

    /// A result message was deleted on the platform. If it is still tracked,
    /// its games no longer happened: drop the window entry and re-derive
    /// current state through the same bounded replay used for edits.
    /// Deletions of untracked messages are history and change nothing.
    pub fn process_delete(
        &mut self,
        message_id: u64,
        directory: &dyn MemberDirectory,
    ) -> ProcessReport {
        if !self.board.window.contains(message_id) {
            debug!(message_id, "deleted message was not tracked, nothing to do");
            return ProcessReport::skipped(MessageClass::Unchanged);
        }

        info!(message_id, "tracked result message deleted, recalculating");
        self.board.window.remove(message_id);
        let intents = self.recalculate(directory);
        ProcessReport {
            class: MessageClass::Changed,
            dispositions: Vec::new(),
            intents,
        }
    }

    fn apply_single(
        &mut self,
        outcome: &Outcome,
        directory: &dyn MemberDirectory,
        intents: &mut Vec<Intent>,
        state_changed: &mut bool,
    ) -> OutcomeDisposition {
        if !directory.is_member(outcome.winner_id) || !directory.is_member(outcome.loser_id) {
            warn!(
                winner = outcome.winner_id,
                loser = outcome.loser_id,
                "could not resolve mentioned players, skipping result"
            );
            intents.push(log_intent(
                LogKind::UnresolvedMention,
                format!(
                    "winner=<@{}> loser=<@{}>",
                    outcome.winner_id, outcome.loser_id
                ),
            ));
            return OutcomeDisposition::Excluded(ExclusionReason::UnresolvedMention {
                winner_mention: outcome.winner_id,
                loser_mention: outcome.loser_id,
            });
        }

        let key = outcome.result_key();
        if self.board.window.previous_winner(&key).is_some() {
            // Same winner as recorded (winner flips were routed to the
            // reconciler). Edited ego values never reopen a recorded result.
            debug!(%key, "result already recorded, skipping");
            return OutcomeDisposition::Excluded(ExclusionReason::AlreadyRecorded);
        }

        let effect = king_service::apply_outcome(&mut self.board, outcome);
        self.board.window.record_result(key, outcome.winner_id);
        *state_changed = true;
        self.emit_role_intents(effect, intents);
        OutcomeDisposition::Applied(effect)
    }

    fn emit_role_intents(&mut self, effect: TransitionEffect, intents: &mut Vec<Intent>) {
        match effect {
            TransitionEffect::Crowned { king } => {
                self.pending_role_grants.remove(&king);
                intents.push(Intent::GrantRole(king));
            }
            TransitionEffect::Defended { king, .. } => {
                // Opportunistic retry of a grant the platform rejected.
                if self.pending_role_grants.remove(&king) {
                    intents.push(Intent::GrantRole(king));
                }
            }
            TransitionEffect::Dethroned { old_king, new_king } => {
                intents.push(Intent::RevokeRole(old_king));
                self.pending_role_grants.remove(&new_king);
                intents.push(Intent::GrantRole(new_king));
            }
            TransitionEffect::NoOp => {}
        }
    }

    /// A previously recorded result now names a different winner. Recent
    /// messages trigger a bounded recalculation; anything older is history
    /// and only gets its fingerprint refreshed so it never re-triggers.
    fn reconcile_edit(
        &mut self,
        event: &MessageEvent,
        fingerprint: &str,
        outcomes: &[Outcome],
        directory: &dyn MemberDirectory,
    ) -> ProcessReport {
        let dispositions = vec![OutcomeDisposition::Deferred; outcomes.len()];

        let intents = if self.board.window.contains(event.message_id) {
            info!(
                message_id = event.message_id,
                "winner changed in recent message, recalculating"
            );
            let retained = RetainedMessage {
                content: event.content.clone(),
                created_at: event.created_at,
            };
            self.board
                .window
                .update_entry(event.message_id, fingerprint.to_string(), retained);
            self.recalculate(directory)
        } else {
            info!(
                message_id = event.message_id,
                "winner changed in old message, ignoring edit"
            );
            // Store the fingerprint so the edit never re-triggers, without
            // displacing live history or leaving replayable text behind.
            self.board
                .window
                .admit_stale(event.message_id, fingerprint.to_string());
            vec![log_intent(
                LogKind::EditIgnored,
                format!(
                    "winner-change edit on message {} outside the recency window",
                    event.message_id
                ),
            )]
        };

        ProcessReport {
            class: MessageClass::Changed,
            dispositions,
            intents,
        }
    }

    /// Bounded recalculation: discard the current king state (best records
    /// survive) and re-derive it by replaying every outcome in the recency
    /// window in game-time order, assuming no king before the window.
    fn recalculate(&mut self, directory: &dyn MemberDirectory) -> Vec<Intent> {
        let old_king = self.board.current_king_id;
        self.board.reset_king();
        self.board.last_activity = None;
        self.board.window.clear_results();

        let entries = self.board.window.replayable_messages();
        info!(messages = entries.len(), "replaying recency window");

        let mut intents = Vec::new();
        let mut replayed = 0usize;
        for (message_id, retained) in entries {
            let outcomes: Vec<Outcome> =
                parse_outcomes(&retained.content, message_id, retained.created_at).collect();
            for outcome in outcomes {
                if !directory.is_member(outcome.winner_id)
                    || !directory.is_member(outcome.loser_id)
                {
                    warn!(
                        winner = outcome.winner_id,
                        loser = outcome.loser_id,
                        "could not resolve mentioned players during replay"
                    );
                    intents.push(log_intent(
                        LogKind::UnresolvedMention,
                        format!(
                            "winner=<@{}> loser=<@{}>",
                            outcome.winner_id, outcome.loser_id
                        ),
                    ));
                    continue;
                }
                king_service::apply_outcome(&mut self.board, &outcome);
                self.board
                    .window
                    .record_result(outcome.result_key(), outcome.winner_id);
                replayed += 1;
            }
        }

        let new_king = self.board.current_king_id;
        if let Some(old) = old_king {
            if new_king != Some(old) {
                intents.push(Intent::RevokeRole(old));
            }
        }
        if let Some(new) = new_king {
            // Re-granting to an unchanged king restores a role the platform
            // may have lost along the way.
            self.pending_role_grants.remove(&new);
            intents.push(Intent::GrantRole(new));
        }

        info!(?old_king, ?new_king, replayed, "recalculation complete");
        intents.push(log_intent(
            LogKind::Recalculated,
            format!("replayed {replayed} results; king {old_king:?} -> {new_king:?}"),
        ));
        intents.push(self.refresh_intent());
        intents
    }

    fn refresh_intent(&self) -> Intent {
        Intent::RefreshLeaderboard {
            rendered_view: self.board.render(&self.config),
            serialized_state: self.board.serialize_state(),
        }
    }
}
