use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashSet;

use crate::config::EngineConfig;
use crate::models::{
    ExclusionReason, Intent, LogKind, MessageClass, MessageEvent, OutcomeDisposition, ResultKey,
    TransitionEffect,
};
use crate::service::message_service::{MemberDirectory, ScrimEngine};

/// Directory where every mentioned id resolves.
struct AllMembers;

impl MemberDirectory for AllMembers {
    fn is_member(&self, _user_id: u64) -> bool {
        true
    }
}

/// Directory with a fixed roster.
struct Roster(HashSet<u64>);

impl Roster {
    fn of(ids: &[u64]) -> Self {
        Roster(ids.iter().copied().collect())
    }
}

impl MemberDirectory for Roster {
    fn is_member(&self, user_id: u64) -> bool {
        self.0.contains(&user_id)
    }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn event(message_id: u64, content: &str, secs: i64) -> MessageEvent {
    MessageEvent {
        message_id,
        content: content.to_string(),
        author_is_self: false,
        in_results_channel: true,
        created_at: base_time() + Duration::seconds(secs),
        edited: false,
    }
}

fn edited(message_id: u64, content: &str, secs: i64) -> MessageEvent {
    MessageEvent {
        edited: true,
        ..event(message_id, content, secs)
    }
}

fn engine() -> ScrimEngine {
    ScrimEngine::new(EngineConfig::default())
}

fn has_grant(intents: &[Intent], user_id: u64) -> bool {
    intents.contains(&Intent::GrantRole(user_id))
}

fn has_revoke(intents: &[Intent], user_id: u64) -> bool {
    intents.contains(&Intent::RevokeRole(user_id))
}

fn has_log(intents: &[Intent], expected: LogKind) -> bool {
    intents
        .iter()
        .any(|i| matches!(i, Intent::LogEvent { kind, .. } if *kind == expected))
}

fn has_refresh(intents: &[Intent]) -> bool {
    intents
        .iter()
        .any(|i| matches!(i, Intent::RefreshLeaderboard { .. }))
}

#[test]
fn test_first_outcome_crowns_winner() {
    let mut engine = engine();
    let report = engine.process(&event(1, "<@100> 5-3 <@200> 85", 0), &AllMembers, base_time());

    assert_eq!(report.class, MessageClass::New);
    assert_eq!(
        report.dispositions,
        vec![OutcomeDisposition::Applied(TransitionEffect::Crowned {
            king: 100
        })]
    );
    assert!(has_grant(&report.intents, 100));
    assert!(has_refresh(&report.intents));

    let board = engine.board();
    assert_eq!(board.current_king_id, Some(100));
    assert_eq!(board.current_streak, 1);
    assert_eq!(board.current_king_ego_floor, Some(85));
}

#[test]
fn test_refeed_identical_message_is_idempotent() {
    let mut engine = engine();
    let msg = event(1, "<@100> 5-3 <@200> 85", 0);
    engine.process(&msg, &AllMembers, base_time());
    let before = engine.board().serialize_state();

    let report = engine.process(&msg, &AllMembers, base_time());
    assert_eq!(report.class, MessageClass::Unchanged);
    assert!(report.intents.is_empty());
    assert!(report.dispositions.is_empty());
    assert_eq!(engine.board().serialize_state(), before);
}

#[test]
fn test_dethroned_king_keeps_best_record() {
    let mut engine = engine();
    // King 100 builds a streak of 4 with ego floor 85.
    engine.process(&event(1, "<@100> 5-3 <@200> 85", 0), &AllMembers, base_time());
    engine.process(&event(2, "<@100> 5-2 <@300> 90", 10), &AllMembers, base_time());
    engine.process(&event(3, "<@100> 5-1 <@200> 88", 20), &AllMembers, base_time());
    engine.process(&event(4, "<@100> 5-4 <@300> 92", 30), &AllMembers, base_time());
    assert_eq!(engine.board().current_streak, 4);
    assert_eq!(engine.board().current_king_ego_floor, Some(85));

    let report = engine.process(&event(5, "<@200> 5-3 <@100> 90", 40), &AllMembers, base_time());
    assert_eq!(
        report.dispositions,
        vec![OutcomeDisposition::Applied(TransitionEffect::Dethroned {
            old_king: 100,
            new_king: 200
        })]
    );
    assert!(has_revoke(&report.intents, 100));
    assert!(has_grant(&report.intents, 200));

    let board = engine.board();
    assert_eq!(board.current_king_id, Some(200));
    assert_eq!(board.current_streak, 1);
    assert_eq!(board.current_king_ego_floor, Some(90));
    assert_eq!(board.best_streaks[&100], 4);
    assert_eq!(board.best_streak_egos[&100], 85);
}

#[test]
fn test_ego_only_edit_is_ignored() {
    let mut engine = engine();
    engine.process(
        &event(1, "<@100> 5-3 <@200> (80/90)", 0),
        &AllMembers,
        base_time(),
    );
    assert_eq!(engine.board().current_king_ego_floor, Some(80));

    // Same message, same winner, different ego: no transition, floor kept.
    let report = engine.process(
        &edited(1, "<@100> 5-3 <@200> (80/95)", 0),
        &AllMembers,
        base_time(),
    );
    assert_eq!(report.class, MessageClass::New);
    assert_eq!(
        report.dispositions,
        vec![OutcomeDisposition::Excluded(ExclusionReason::AlreadyRecorded)]
    );
    assert!(!has_refresh(&report.intents));
    assert_eq!(engine.board().current_streak, 1);
    assert_eq!(engine.board().current_king_ego_floor, Some(80));
}

#[test]
fn test_edit_adding_new_line_applies_only_the_new_line() {
    let mut engine = engine();
    engine.process(&event(1, "<@100> 5-3 <@200> 85", 0), &AllMembers, base_time());

    let report = engine.process(
        &edited(1, "<@100> 5-3 <@200> 85\n<@100> 5-2 <@300> 90", 0),
        &AllMembers,
        base_time(),
    );
    assert_eq!(report.dispositions.len(), 2);
    assert_eq!(
        report.dispositions[0],
        OutcomeDisposition::Excluded(ExclusionReason::AlreadyRecorded)
    );
    assert!(matches!(
        report.dispositions[1],
        OutcomeDisposition::Applied(TransitionEffect::Defended { king: 100, streak: 2 })
    ));
    assert_eq!(engine.board().current_streak, 2);
}

#[test]
fn test_winner_flip_in_recent_message_recalculates() {
    let mut engine = engine();
    engine.process(&event(1, "<@100> 5-3 <@200> 85", 0), &AllMembers, base_time());
    engine.process(&event(2, "<@100> 5-2 <@300> 90", 10), &AllMembers, base_time());
    engine.process(&event(3, "<@100> 5-1 <@200> 88", 20), &AllMembers, base_time());
    assert_eq!(engine.board().current_streak, 3);
    let best_before = engine.board().best_streaks[&100];

    // The last report flips: 200 actually won that game.
    let report = engine.process(
        &edited(3, "<@100> 1-5 <@200> 88", 20),
        &AllMembers,
        base_time(),
    );
    assert_eq!(report.class, MessageClass::Changed);
    assert!(report
        .dispositions
        .iter()
        .all(|d| *d == OutcomeDisposition::Deferred));
    assert!(has_log(&report.intents, LogKind::Recalculated));
    assert!(has_revoke(&report.intents, 100));
    assert!(has_grant(&report.intents, 200));
    assert!(has_refresh(&report.intents));

    // Replay of the window: 100 wins twice, then 200 takes the crown.
    let board = engine.board();
    assert_eq!(board.current_king_id, Some(200));
    assert_eq!(board.current_streak, 1);
    assert_eq!(board.current_king_ego_floor, Some(88));
    // Bests never regress through a replay.
    assert!(board.best_streaks[&100] >= best_before.min(2));
    assert_eq!(board.best_streaks[&100], best_before);
}

#[test]
fn test_winner_flip_on_evicted_message_is_ignored() {
    let mut engine = engine();
    for i in 1..=6u64 {
        let content = format!("<@100> 5-3 <@{}> 85", 100 + i);
        engine.process(&event(i, &content, i as i64 * 10), &AllMembers, base_time());
    }
    assert_eq!(engine.board().current_streak, 6);

    // Message 1 has scrolled out of the 5-message window.
    let report = engine.process(
        &edited(1, "<@100> 3-5 <@101> 85", 10),
        &AllMembers,
        base_time(),
    );
    assert_eq!(report.class, MessageClass::Changed);
    assert!(report
        .dispositions
        .iter()
        .all(|d| *d == OutcomeDisposition::Deferred));
    assert!(has_log(&report.intents, LogKind::EditIgnored));
    assert!(!has_refresh(&report.intents));
    assert_eq!(engine.board().current_king_id, Some(100));
    assert_eq!(engine.board().current_streak, 6);

    // The fingerprint was stored: redelivery never re-triggers.
    let again = engine.process(
        &edited(1, "<@100> 3-5 <@101> 85", 10),
        &AllMembers,
        base_time(),
    );
    assert_eq!(again.class, MessageClass::Unchanged);
    assert!(again.intents.is_empty());
}

#[test]
fn test_edited_typo_report_applies_as_new() {
    let mut engine = engine();
    // Broken first mention: nothing parses, nothing is admitted.
    let report = engine.process(&event(1, "<@100 5-3 <@200> 85", 0), &AllMembers, base_time());
    assert!(report.dispositions.is_empty());
    assert_eq!(engine.board().window.tracked_len(), 0);

    // The author fixes the typo. The message was never tracked nor evicted,
    // so the corrected report counts as new.
    let report = engine.process(&edited(1, "<@100> 5-3 <@200> 85", 0), &AllMembers, base_time());
    assert_eq!(report.class, MessageClass::New);
    assert_eq!(
        report.dispositions,
        vec![OutcomeDisposition::Applied(TransitionEffect::Crowned {
            king: 100
        })]
    );
    assert_eq!(engine.board().current_king_id, Some(100));
    assert_eq!(engine.board().current_streak, 1);
}

#[test]
fn test_ignored_stale_edit_does_not_displace_live_history() {
    let mut engine = engine();
    for i in 1..=6u64 {
        let content = format!("<@100> 5-3 <@{}> 85", 100 + i);
        engine.process(&event(i, &content, i as i64 * 10), &AllMembers, base_time());
    }

    engine.process(
        &edited(1, "<@100> 3-5 <@101> 85", 10),
        &AllMembers,
        base_time(),
    );
    // The stale fingerprint is stored, but every live entry survives.
    let window = &engine.board().window;
    assert!(window.contains(1));
    for id in 2..=6u64 {
        assert!(window.contains(id));
    }

    // The next real report evicts the stale entry ahead of live history.
    engine.process(&event(7, "<@100> 5-3 <@107> 85", 70), &AllMembers, base_time());
    let window = &engine.board().window;
    assert!(!window.contains(1));
    assert!(window.contains(3));
    assert!(window.contains(7));
}

#[test]
fn test_deleting_tracked_message_recalculates() {
    let mut engine = engine();
    engine.process(&event(1, "<@100> 5-3 <@200> 85", 0), &AllMembers, base_time());
    engine.process(&event(2, "<@100> 5-2 <@300> 90", 10), &AllMembers, base_time());
    engine.process(&event(3, "<@200> 5-3 <@100> 88", 20), &AllMembers, base_time());
    assert_eq!(engine.board().current_king_id, Some(200));

    // The dethroning report is deleted: those games no longer happened.
    let report = engine.process_delete(3, &AllMembers);
    assert_eq!(report.class, MessageClass::Changed);
    assert!(has_log(&report.intents, LogKind::Recalculated));
    assert!(has_revoke(&report.intents, 200));
    assert!(has_grant(&report.intents, 100));
    assert!(has_refresh(&report.intents));

    let board = engine.board();
    assert_eq!(board.current_king_id, Some(100));
    assert_eq!(board.current_streak, 2);
    assert!(!board.window.contains(3));
    // The deleted reign's best record stays in the books.
    assert_eq!(board.best_streaks[&200], 1);
}

#[test]
fn test_deleting_untracked_message_is_noop() {
    let mut engine = engine();
    engine.process(&event(1, "<@100> 5-3 <@200> 85", 0), &AllMembers, base_time());
    let before = engine.board().serialize_state();

    let report = engine.process_delete(99, &AllMembers);
    assert_eq!(report.class, MessageClass::Unchanged);
    assert!(report.intents.is_empty());
    assert_eq!(engine.board().serialize_state(), before);
}

#[test]
fn test_replay_follows_game_time_not_admission_order() {
    let mut engine = engine();
    // Reported out of order: the later game arrives first.
    engine.process(&event(1, "<@100> 5-3 <@200> 85", 30), &AllMembers, base_time());
    engine.process(&event(2, "<@200> 5-3 <@300> 70", 10), &AllMembers, base_time());
    assert_eq!(engine.board().current_king_id, Some(100));

    // Flipping the older game forces a replay. In game-time order the
    // corrected result crowns 300 first, then the newer game is a non-king
    // game; admission order would have crowned 100 instead.
    let report = engine.process(
        &edited(2, "<@200> 3-5 <@300> 70", 10),
        &AllMembers,
        base_time(),
    );
    assert_eq!(report.class, MessageClass::Changed);
    assert_eq!(engine.board().current_king_id, Some(300));
    assert_eq!(engine.board().current_streak, 1);
}

#[test]
fn test_conflicting_duplicate_lines_later_occurrence_wins() {
    let mut engine = engine();
    engine.process(&event(1, "<@100> 5-3 <@200> 85", 0), &AllMembers, base_time());

    // The edit duplicates the pairing with a contradictory second line; both
    // lines share one result key. Chronological replay makes the later line
    // authoritative.
    let report = engine.process(
        &edited(1, "<@100> 5-3 <@200> 85\n<@200> 5-3 <@100> 90", 0),
        &AllMembers,
        base_time(),
    );
    assert_eq!(report.class, MessageClass::Changed);

    let board = engine.board();
    assert_eq!(board.current_king_id, Some(200));
    assert_eq!(board.current_streak, 1);
    assert_eq!(board.current_king_ego_floor, Some(90));

    let key = ResultKey {
        message_id: 1,
        low_player_id: 100,
        high_player_id: 200,
        reported_at: base_time().timestamp(),
    };
    assert_eq!(board.window.previous_winner(&key), Some(200));
}

#[test]
fn test_unresolved_mention_skips_line_and_continues() {
    let mut engine = engine();
    let roster = Roster::of(&[100, 200]);
    let report = engine.process(
        &event(1, "<@300> 5-3 <@100> 70\n<@100> 5-2 <@200> 85", 0),
        &roster,
        base_time(),
    );

    assert_eq!(report.dispositions.len(), 2);
    assert_eq!(
        report.dispositions[0],
        OutcomeDisposition::Excluded(ExclusionReason::UnresolvedMention {
            winner_mention: 300,
            loser_mention: 100
        })
    );
    assert!(matches!(
        report.dispositions[1],
        OutcomeDisposition::Applied(TransitionEffect::Crowned { king: 100 })
    ));
    assert!(has_log(&report.intents, LogKind::UnresolvedMention));
    assert_eq!(engine.board().current_king_id, Some(100));
}

#[test]
fn test_expired_king_is_vacated_before_apply() {
    let mut engine = engine();
    engine.process(&event(1, "<@100> 5-3 <@200> 85", 0), &AllMembers, base_time());

    // Four days later 200 beats 300. The old crown is vacant by then, so the
    // winner crowns fresh instead of playing a non-king game.
    let later = base_time() + Duration::days(4);
    let next = MessageEvent {
        created_at: later,
        ..event(2, "<@200> 5-3 <@300> 90", 0)
    };
    let report = engine.process(&next, &AllMembers, later);

    assert!(has_revoke(&report.intents, 100));
    assert!(has_log(&report.intents, LogKind::KingExpired));
    assert!(matches!(
        report.dispositions[0],
        OutcomeDisposition::Applied(TransitionEffect::Crowned { king: 200 })
    ));
    assert_eq!(engine.board().current_king_id, Some(200));
    assert_eq!(engine.board().current_streak, 1);
    // Best records survive expiry.
    assert_eq!(engine.board().best_streaks[&100], 1);
}

#[test]
fn test_role_failure_retried_on_next_transition() {
    let mut engine = engine();
    engine.process(&event(1, "<@100> 5-3 <@200> 85", 0), &AllMembers, base_time());
    engine.note_role_failure(100);

    let report = engine.process(&event(2, "<@100> 5-2 <@300> 90", 10), &AllMembers, base_time());
    assert!(matches!(
        report.dispositions[0],
        OutcomeDisposition::Applied(TransitionEffect::Defended { king: 100, .. })
    ));
    assert!(has_grant(&report.intents, 100));

    // Retried once, not forever.
    let report = engine.process(&event(3, "<@100> 5-1 <@200> 88", 20), &AllMembers, base_time());
    assert!(!has_grant(&report.intents, 100));
}

#[test]
fn test_multiple_lines_apply_in_textual_order() {
    let mut engine = engine();
    let report = engine.process(
        &event(1, "<@100> 5-3 <@200> 85\n<@200> 5-4 <@100> 90", 0),
        &AllMembers,
        base_time(),
    );

    assert_eq!(report.dispositions.len(), 2);
    assert!(matches!(
        report.dispositions[0],
        OutcomeDisposition::Applied(TransitionEffect::Crowned { king: 100 })
    ));
    assert!(matches!(
        report.dispositions[1],
        OutcomeDisposition::Applied(TransitionEffect::Dethroned {
            old_king: 100,
            new_king: 200
        })
    ));
    assert_eq!(engine.board().current_king_id, Some(200));
    assert_eq!(engine.board().current_streak, 1);
}

#[test]
fn test_message_without_results_is_skipped() {
    let mut engine = engine();
    let report = engine.process(&event(1, "good games tonight", 0), &AllMembers, base_time());
    assert_eq!(report.class, MessageClass::New);
    assert!(report.dispositions.is_empty());
    assert!(report.intents.is_empty());
    assert_eq!(engine.board().window.tracked_len(), 0);
}

#[test]
fn test_recovery_roundtrip_via_state_message() {
    let mut engine = engine();
    engine.process(&event(1, "<@100> 5-3 <@200> 85", 0), &AllMembers, base_time());
    engine.process(&event(2, "<@100> 5-2 <@300> 90", 10), &AllMembers, base_time());
    let state_message = engine.state_message();

    let mut recovered = ScrimEngine::recover(EngineConfig::default(), Some(&state_message));
    assert_eq!(recovered.board().current_king_id, Some(100));
    assert_eq!(recovered.board().current_streak, 2);
    assert_eq!(recovered.board().best_streaks[&100], 2);

    // A redelivered event that was fully applied before the snapshot is
    // distinguishable by fingerprint and skipped.
    let report = recovered.process(&event(2, "<@100> 5-2 <@300> 90", 10), &AllMembers, base_time());
    assert_eq!(report.class, MessageClass::Unchanged);
    assert!(report.intents.is_empty());
}

#[test]
fn test_recovery_falls_back_to_empty_state() {
    let from_none = ScrimEngine::recover(EngineConfig::default(), None);
    assert_eq!(from_none.board().current_king_id, None);
    assert_eq!(from_none.board().current_streak, 0);

    let from_garbage = ScrimEngine::recover(EngineConfig::default(), Some("not a state message"));
    assert_eq!(from_garbage.board().current_king_id, None);
    assert!(from_garbage.board().best_streaks.is_empty());
}

#[test]
fn test_refresh_intent_carries_view_and_state() {
    let mut engine = engine();
    let report = engine.process(&event(1, "<@100> 5-3 <@200> 85", 0), &AllMembers, base_time());

    let refresh = report
        .intents
        .iter()
        .find_map(|i| match i {
            Intent::RefreshLeaderboard {
                rendered_view,
                serialized_state,
            } => Some((rendered_view, serialized_state)),
            _ => None,
        })
        .expect("refresh intent");
    assert!(refresh.0.contains("<@100>"));
    assert!(refresh.1.contains("\"current_streak\":1"));

    assert_eq!(engine.snapshot().current_streak, 1);
    assert!(engine.leaderboard_view().contains("**Current King** 👑"));
}

#[test]
fn test_report_counts_applied_outcomes() {
    let mut engine = engine();
    let report = engine.process(
        &event(1, "<@100> 5-3 <@200> 85\n<@100> 4-4 <@300> 90", 0),
        &AllMembers,
        base_time(),
    );
    // The tie line never parses into an outcome.
    assert_eq!(report.applied_count(), 1);
}
