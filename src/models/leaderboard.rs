use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::LazyLock;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::outcome::ResultKey;

pub const LEADERBOARD_HEADER: &str = "🏆 Scrim Leaderboard";
pub const STATE_MESSAGE_HEADER: &str = "📊 Bot State";

/// Locates the snapshot document inside the pinned state message (a spoiler
/// block wrapping a text code fence).
static STATE_BLOCK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\|\|```text\n(.+?)\n```\|\|").expect("valid state block pattern")
});

/// Raw message content retained for bounded replay. In-memory only; never
/// part of the persisted snapshot.
#[derive(Debug, Clone)]
pub struct RetainedMessage {
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Bounded short-term memory of processed messages: fingerprints keyed by
/// message id, recorded winners keyed by result key, and retained raw texts.
/// Admission is FIFO; evicting a message drops its result keys and text.
#[derive(Debug, Clone, Default)]
pub struct DedupWindow {
    order: VecDeque<u64>,
    fingerprints: HashMap<u64, String>,
    results: HashMap<ResultKey, u64>,
    retained: HashMap<u64, RetainedMessage>,
}

impl DedupWindow {
    pub fn contains(&self, message_id: u64) -> bool {
        self.fingerprints.contains_key(&message_id)
    }

    pub fn is_unchanged(&self, message_id: u64, fingerprint: &str) -> bool {
        self.fingerprints.get(&message_id).map(String::as_str) == Some(fingerprint)
    }

    pub fn previous_winner(&self, key: &ResultKey) -> Option<u64> {
        self.results.get(key).copied()
    }

    pub fn record_result(&mut self, key: ResultKey, winner_id: u64) {
        self.results.insert(key, winner_id);
    }

    /// Admit a message into the window, trimming to `capacity` most recently
    /// admitted ids. Result keys belonging to evicted messages go with them.
    pub fn admit(
        &mut self,
        message_id: u64,
        fingerprint: String,
        retained: RetainedMessage,
        capacity: usize,
    ) {
        if !self.fingerprints.contains_key(&message_id) {
            self.order.push_back(message_id);
        }
        self.fingerprints.insert(message_id, fingerprint);
        self.retained.insert(message_id, retained);

        while self.order.len() > capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.fingerprints.remove(&evicted);
                self.retained.remove(&evicted);
                self.results.retain(|key, _| key.message_id != evicted);
            }
        }
    }

    /// Replace the stored fingerprint and retained text of an already-tracked
    /// message without moving its admission position.
    pub fn update_entry(&mut self, message_id: u64, fingerprint: String, retained: RetainedMessage) {
        self.fingerprints.insert(message_id, fingerprint);
        self.retained.insert(message_id, retained);
    }

    /// Track a stale message's fingerprint without displacing live history:
    /// the id enters at the eviction end of the queue and goes first when the
    /// window next trims. No text is retained; ignored edits never replay.
    pub fn admit_stale(&mut self, message_id: u64, fingerprint: String) {
        if !self.fingerprints.contains_key(&message_id) {
            self.order.push_front(message_id);
        }
        self.fingerprints.insert(message_id, fingerprint);
    }

    /// Drop a tracked message entirely: fingerprint, retained text and every
    /// result key recorded from it.
    pub fn remove(&mut self, message_id: u64) {
        self.order.retain(|id| *id != message_id);
        self.fingerprints.remove(&message_id);
        self.retained.remove(&message_id);
        self.results.retain(|key, _| key.message_id != message_id);
    }

    /// True when an untracked message plausibly scrolled out of a full
    /// window: snowflake ids ascend with creation time, so if every tracked
    /// id is newer the message predates the window.
    pub fn predates_window(&self, message_id: u64, capacity: usize) -> bool {
        self.order.len() >= capacity && self.order.iter().all(|id| *id > message_id)
    }

    /// Drop all recorded winners, keeping fingerprints and texts. Used before
    /// a bounded replay re-records the window from scratch.
    pub fn clear_results(&mut self) {
        self.results.clear();
    }

    /// Tracked messages that still have their raw text, oldest game first.
    /// Entries restored from a snapshot have no text and are not replayable.
    pub fn replayable_messages(&self) -> Vec<(u64, RetainedMessage)> {
        let mut entries: Vec<(u64, RetainedMessage)> = self
            .order
            .iter()
            .filter_map(|id| self.retained.get(id).map(|m| (*id, m.clone())))
            .collect();
        entries.sort_by_key(|(id, m)| (m.created_at, *id));
        entries
    }

    pub fn tracked_len(&self) -> usize {
        self.order.len()
    }
}

/// Full engine state for one arena: current king, all-time best records, and
/// the dedup window.
#[derive(Debug, Clone, Default)]
pub struct Leaderboard {
    pub best_streaks: HashMap<u64, u32>,
    pub best_streak_egos: HashMap<u64, i64>,
    pub current_king_id: Option<u64>,
    pub current_streak: u32,
    pub current_king_ego_floor: Option<i64>,
    pub last_activity: Option<DateTime<Utc>>,
    pub window: DedupWindow,
}

impl Leaderboard {
    /// Raise a player's best record. Best streaks never decrease, and the
    /// recorded ego only moves together with a new best streak.
    pub fn update_best_streak(&mut self, user_id: u64, streak: u32, ego_floor: i64) {
        let best = self.best_streaks.entry(user_id).or_insert(0);
        if streak > *best {
            *best = streak;
            self.best_streak_egos.insert(user_id, ego_floor);
        }
    }

    pub fn set_king(&mut self, user_id: u64, ego: i64) {
        self.current_king_id = Some(user_id);
        self.current_streak = 1;
        self.current_king_ego_floor = Some(ego);
    }

    pub fn reset_king(&mut self) {
        self.current_king_id = None;
        self.current_streak = 0;
        self.current_king_ego_floor = None;
    }

    pub fn increment_streak(&mut self) {
        self.current_streak += 1;
    }

    /// Lower the active streak's ego floor if this win was cheaper.
    pub fn update_current_king_ego_floor(&mut self, ego: i64) {
        match self.current_king_ego_floor {
            Some(floor) if ego >= floor => {}
            _ => self.current_king_ego_floor = Some(ego),
        }
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            best_streaks: self.best_streaks.clone(),
            best_streak_egos: self.best_streak_egos.clone(),
            current_king_id: self.current_king_id,
            current_streak: self.current_streak,
            current_king_ego_floor: self.current_king_ego_floor,
            last_activity: self.last_activity,
            processed_messages: self.window.fingerprints.clone(),
            processed_results: self.window.results.clone(),
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        // Admission order is not persisted; snowflake ids ascend with
        // creation time, which is the best available recency order.
        let mut order: Vec<u64> = snapshot.processed_messages.keys().copied().collect();
        order.sort_unstable();

        Leaderboard {
            best_streaks: snapshot.best_streaks,
            best_streak_egos: snapshot.best_streak_egos,
            current_king_id: snapshot.current_king_id,
            current_streak: snapshot.current_streak,
            current_king_ego_floor: snapshot.current_king_ego_floor,
            last_activity: snapshot.last_activity,
            window: DedupWindow {
                order: order.into(),
                fingerprints: snapshot.processed_messages,
                results: snapshot.processed_results,
                retained: HashMap::new(),
            },
        }
    }

    /// Render the public leaderboard view: current king, top best streaks,
    /// last-game and expiry timestamps.
    pub fn render(&self, config: &EngineConfig) -> String {
        let mut lines = vec![LEADERBOARD_HEADER.to_string(), String::new()];

        if let (Some(king_id), true) = (self.current_king_id, self.current_streak > 0) {
            lines.push("**Current King** 👑".to_string());
            let ego_info = self
                .current_king_ego_floor
                .map(|floor| format!(" (Ego: {floor})"))
                .unwrap_or_default();
            lines.push(format!(
                "<@{king_id}> - {} wins{ego_info}",
                self.current_streak
            ));
            lines.push(String::new());
        }

        lines.push("**Best Streaks**".to_string());

        let mut ranked: Vec<(u64, u32)> = self
            .best_streaks
            .iter()
            .map(|(id, streak)| (*id, *streak))
            .collect();
        ranked.sort_by_key(|(id, streak)| (std::cmp::Reverse(*streak), *id));
        ranked.truncate(config.leaderboard_top_n);

        if ranked.is_empty() {
            lines.push("No games recorded yet!".to_string());
        } else {
            for (rank, (user_id, streak)) in ranked.iter().enumerate() {
                let ego_info = self
                    .best_streak_egos
                    .get(user_id)
                    .map(|ego| format!(" (Ego: {ego})"))
                    .unwrap_or_default();
                lines.push(format!("{}. <@{user_id}> - {streak} wins{ego_info}", rank + 1));
            }
        }

        lines.push(String::new());
        if let Some(last_activity) = self.last_activity {
            lines.push(format!("Last game: <t:{}:R>", last_activity.timestamp()));

            if self.current_king_id.is_some() {
                let expiry = last_activity + Duration::days(config.king_timeout_days);
                lines.push(format!("King expires: <t:{}:R>", expiry.timestamp()));
            }
        }

        lines.join("\n")
    }

    /// Compact snapshot document for embedding in the state message.
    pub fn serialize_state(&self) -> String {
        serde_json::to_string(&self.to_snapshot()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Full state message: header plus the snapshot in a spoiler block.
    pub fn to_state_message(&self) -> String {
        format!(
            "{STATE_MESSAGE_HEADER}\n\n||```text\n{}\n```||",
            self.serialize_state()
        )
    }

    /// Extract and decode a snapshot from a state message. Fails softly: the
    /// caller falls back to the empty initial state.
    pub fn from_state_message(content: &str) -> Result<Self, EngineError> {
        let captures = STATE_BLOCK_PATTERN
            .captures(content)
            .ok_or(EngineError::MissingStateDocument)?;
        let snapshot: Snapshot = serde_json::from_str(&captures[1])?;
        Ok(Leaderboard::from_snapshot(snapshot))
    }
}

/// The persisted state document. Every field defaults when absent so older or
/// partially-written documents still decode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub best_streaks: HashMap<u64, u32>,
    #[serde(default)]
    pub best_streak_egos: HashMap<u64, i64>,
    #[serde(default)]
    pub current_king_id: Option<u64>,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub current_king_ego_floor: Option<i64>,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed_messages: HashMap<u64, String>,
    #[serde(default)]
    pub processed_results: HashMap<ResultKey, u64>,
}
