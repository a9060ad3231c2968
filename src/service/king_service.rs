use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::models::{Leaderboard, Outcome, TransitionEffect};

/// Apply one new (non-duplicate) outcome to the king state. Pure transition:
/// role changes come back as the effect, nothing is executed here.
pub fn apply_outcome(board: &mut Leaderboard, outcome: &Outcome) -> TransitionEffect {
    match board.current_king_id {
        // No king: the winner takes the crown at streak 1.
        None => {
            info!(
                winner = outcome.winner_id,
                ego = outcome.winner_ego,
                "no king exists, crowning winner"
            );
            board.set_king(outcome.winner_id, outcome.winner_ego);
            board.last_activity = Some(outcome.reported_at);
            board.update_best_streak(outcome.winner_id, 1, outcome.winner_ego);
            TransitionEffect::Crowned {
                king: outcome.winner_id,
            }
        }

        // The king defended: extend the streak, lower the floor if cheaper.
        Some(king) if king == outcome.winner_id => {
            board.increment_streak();
            board.update_current_king_ego_floor(outcome.winner_ego);
            board.last_activity = Some(outcome.reported_at);

            let streak = board.current_streak;
            let floor = board.current_king_ego_floor.unwrap_or(outcome.winner_ego);
            board.update_best_streak(king, streak, floor);
            info!(king, streak, floor, "king defended");
            TransitionEffect::Defended { king, streak }
        }

        // The king lost: finalize the old reign, crown the winner fresh.
        Some(king) if king == outcome.loser_id => {
            let old_streak = board.current_streak;
            let old_floor = board.current_king_ego_floor.unwrap_or(0);
            board.update_best_streak(king, old_streak, old_floor);

            board.set_king(outcome.winner_id, outcome.winner_ego);
            board.last_activity = Some(outcome.reported_at);
            board.update_best_streak(outcome.winner_id, 1, outcome.winner_ego);

            info!(
                old_king = king,
                new_king = outcome.winner_id,
                old_streak,
                "king dethroned"
            );
            TransitionEffect::Dethroned {
                old_king: king,
                new_king: outcome.winner_id,
            }
        }

        // A game between two non-kings leaves the crown untouched.
        Some(_) => {
            debug!(
                winner = outcome.winner_id,
                loser = outcome.loser_id,
                "non-king game, no state change"
            );
            TransitionEffect::NoOp
        }
    }
}

/// True iff a king is set and has been inactive longer than the timeout.
pub fn should_expire(board: &Leaderboard, now: DateTime<Utc>, timeout_days: i64) -> bool {
    match (board.current_king_id, board.last_activity) {
        (Some(_), Some(last_activity)) => now - last_activity > Duration::days(timeout_days),
        _ => false,
    }
}

/// Vacate the throne. Best records are untouched; the next outcome crowns
/// fresh instead of defending a stale streak.
pub fn expire_king(board: &mut Leaderboard) -> Option<u64> {
    let king = board.current_king_id?;
    info!(king, streak = board.current_streak, "king expired from inactivity");
    board.reset_king();
    Some(king)
}
