use chrono::{DateTime, Utc};
use regex::{CaptureMatches, Regex};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::EngineError;

/// One reported scrimmage line: `<@p1> s1-s2 <@p2> ego` where ego is a single
/// number shared by both players or a `winner/loser` pair (parentheses
/// optional).
static RESULT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<@!?(\d+)>\s*(\d+)\s*-\s*(\d+)\s*<@!?(\d+)>\s*\(?\s*(\d+(?:\s*/\s*\d+)?)\s*\)?")
        .expect("valid result pattern")
});

/// A single parsed game result. Immutable once parsed; the reporter timestamp
/// is the authoritative game time, not processing time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub winner_id: u64,
    pub loser_id: u64,
    pub winner_ego: i64,
    pub loser_ego: i64,
    pub message_id: u64,
    pub reported_at: DateTime<Utc>,
}

impl Outcome {
    /// Participant ids in canonical ascending order, for stable result keys.
    pub fn sorted_player_ids(&self) -> (u64, u64) {
        if self.winner_id <= self.loser_id {
            (self.winner_id, self.loser_id)
        } else {
            (self.loser_id, self.winner_id)
        }
    }

    pub fn result_key(&self) -> ResultKey {
        let (low, high) = self.sorted_player_ids();
        ResultKey {
            message_id: self.message_id,
            low_player_id: low,
            high_player_id: high,
            reported_at: self.reported_at.timestamp(),
        }
    }
}

/// Canonical identifier of one specific reported game, stable under
/// participant-order variation and reprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultKey {
    pub message_id: u64,
    pub low_player_id: u64,
    pub high_player_id: u64,
    pub reported_at: i64,
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.message_id, self.low_player_id, self.high_player_id, self.reported_at
        )
    }
}

impl FromStr for ResultKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let mut next = || {
            parts
                .next()
                .ok_or_else(|| EngineError::MalformedResultKey(s.to_string()))
        };
        let message_id = next()?
            .parse()
            .map_err(|_| EngineError::MalformedResultKey(s.to_string()))?;
        let low_player_id = next()?
            .parse()
            .map_err(|_| EngineError::MalformedResultKey(s.to_string()))?;
        let high_player_id = next()?
            .parse()
            .map_err(|_| EngineError::MalformedResultKey(s.to_string()))?;
        let reported_at = next()?
            .parse()
            .map_err(|_| EngineError::MalformedResultKey(s.to_string()))?;
        if parts.next().is_some() {
            return Err(EngineError::MalformedResultKey(s.to_string()));
        }
        Ok(ResultKey {
            message_id,
            low_player_id,
            high_player_id,
            reported_at,
        })
    }
}

// Result keys are map keys in the snapshot document, so they serialize as
// their canonical string form.
impl Serialize for ResultKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResultKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl<'de> Visitor<'de> for KeyVisitor {
            type Value = ResultKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a result key of the form msg_id:low_id:high_id:timestamp")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ResultKey, E> {
                v.parse().map_err(|e| E::custom(format!("{e}")))
            }
        }

        deserializer.deserialize_str(KeyVisitor)
    }
}

/// Lazily parse every game result out of a message. Lines that do not match
/// the result pattern are not game reports and yield nothing; ties are never
/// reported as outcomes.
pub fn parse_outcomes(
    content: &str,
    message_id: u64,
    reported_at: DateTime<Utc>,
) -> OutcomeIter<'_> {
    OutcomeIter {
        matches: RESULT_PATTERN.captures_iter(content),
        message_id,
        reported_at,
    }
}

/// Finite, non-restartable iterator over the outcomes of one message, in
/// textual (top-to-bottom) order.
pub struct OutcomeIter<'h> {
    matches: CaptureMatches<'static, 'h>,
    message_id: u64,
    reported_at: DateTime<Utc>,
}

impl Iterator for OutcomeIter<'_> {
    type Item = Outcome;

    fn next(&mut self) -> Option<Outcome> {
        loop {
            let caps = self.matches.next()?;

            let player1_id: u64 = match caps[1].parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            let score1: i64 = match caps[2].parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            let score2: i64 = match caps[3].parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            let player2_id: u64 = match caps[4].parse() {
                Ok(v) => v,
                Err(_) => continue,
            };

            if score1 == score2 {
                tracing::debug!(score1, score2, "ignoring tie result");
                continue;
            }

            // Ego pair is winner/loser by score order, regardless of which
            // player was mentioned first; a single value is shared.
            let (winner_ego, loser_ego) = match parse_ego(&caps[5]) {
                Some(pair) => pair,
                None => continue,
            };

            let (winner_id, loser_id) = if score1 > score2 {
                (player1_id, player2_id)
            } else {
                (player2_id, player1_id)
            };

            return Some(Outcome {
                winner_id,
                loser_id,
                winner_ego,
                loser_ego,
                message_id: self.message_id,
                reported_at: self.reported_at,
            });
        }
    }
}

fn parse_ego(raw: &str) -> Option<(i64, i64)> {
    match raw.split_once('/') {
        Some((w, l)) => {
            let winner = w.trim().parse().ok()?;
            let loser = l.trim().parse().ok()?;
            Some((winner, loser))
        }
        None => {
            let shared = raw.trim().parse().ok()?;
            Some((shared, shared))
        }
    }
}
