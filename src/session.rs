//! Per-client session state: identity, current room and round, local flags
//! and the membership cache fed by realtime payloads.

use crate::state::AutoAction;
use crate::types::*;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Room the client is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRef {
    pub id: RoomId,
    pub code: String,
}

/// How a freshly observed round snapshot relates to what the client has seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseChange {
    NewRound,
    Advanced { from: RoundPhase, to: RoundPhase },
    Unchanged,
    /// Older than what was already observed; ignore it
    Stale,
}

#[derive(Debug, Clone)]
struct TrackedRound {
    id: RoundId,
    started_at: DateTime<Utc>,
    phase: RoundPhase,
}

/// Keeps the displayed phase of a round monotonic under out-of-order reads
#[derive(Debug, Clone, Default)]
pub struct PhaseTracker {
    current: Option<TrackedRound>,
}

impl PhaseTracker {
    pub fn observe(&mut self, round: &Round) -> PhaseChange {
        let Some(current) = self.current.as_mut() else {
            self.current = Some(TrackedRound {
                id: round.id.clone(),
                started_at: round.started_at,
                phase: round.phase,
            });
            return PhaseChange::NewRound;
        };

        if current.id == round.id {
            return match round.phase.cmp(&current.phase) {
                std::cmp::Ordering::Greater => {
                    let from = current.phase;
                    current.phase = round.phase;
                    PhaseChange::Advanced {
                        from,
                        to: round.phase,
                    }
                }
                std::cmp::Ordering::Equal => PhaseChange::Unchanged,
                std::cmp::Ordering::Less => PhaseChange::Stale,
            };
        }

        if round.started_at > current.started_at {
            *current = TrackedRound {
                id: round.id.clone(),
                started_at: round.started_at,
                phase: round.phase,
            };
            PhaseChange::NewRound
        } else {
            PhaseChange::Stale
        }
    }

    pub fn round_id(&self) -> Option<&RoundId> {
        self.current.as_ref().map(|r| &r.id)
    }

    pub fn phase(&self) -> Option<RoundPhase> {
        self.current.as_ref().map(|r| r.phase)
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[derive(Debug, Default)]
pub struct ClientSession {
    pub identity: Option<PlayerId>,
    pub nickname: String,
    pub room: Option<RoomRef>,
    /// Set when this client created the room, before its membership row loads
    pub host_hint: bool,
    pub round: PhaseTracker,
    pub my_submitted: bool,
    pub my_voted: bool,
    pub selected_answer_id: Option<AnswerId>,
    pub draft_answer: String,
    pub finalizing: bool,
    /// Move to the round screen once a round shows up
    pub auto_jump_to_round: bool,
    pub members: HashMap<PlayerId, RoomPlayer>,
    pub questions: HashMap<QuestionId, String>,
    auto_attempts: HashMap<(RoundId, AutoAction), DateTime<Utc>>,
}

impl ClientSession {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            ..Default::default()
        }
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.room.as_ref().map(|r| &r.id)
    }

    pub fn round_id(&self) -> Option<&RoundId> {
        self.round.round_id()
    }

    pub fn is_me(&self, player_id: &str) -> bool {
        self.identity.as_deref() == Some(player_id)
    }

    /// Clear everything tied to a single round
    pub fn reset_round_flags(&mut self) {
        self.my_submitted = false;
        self.my_voted = false;
        self.selected_answer_id = None;
        self.draft_answer.clear();
        self.finalizing = false;
        self.auto_attempts.clear();
    }

    /// Detach from the room entirely
    pub fn leave(&mut self) {
        self.room = None;
        self.host_hint = false;
        self.auto_jump_to_round = false;
        self.round.clear();
        self.members.clear();
        self.reset_round_flags();
    }

    /// Rate-limit automatic actions per round. Returns true if `action` may
    /// run now and records the attempt.
    pub fn try_auto_attempt(
        &mut self,
        round_id: &str,
        action: AutoAction,
        now: DateTime<Utc>,
        retry_after: chrono::Duration,
    ) -> bool {
        let key = (round_id.to_string(), action);
        match self.auto_attempts.get(&key) {
            Some(last) if now - *last < retry_after => false,
            _ => {
                self.auto_attempts.insert(key, now);
                true
            }
        }
    }

    /// Apply a realtime membership payload to the cache
    pub fn apply_member_change(
        &mut self,
        change: crate::protocol::RowChange,
        row: &serde_json::Value,
        now: DateTime<Utc>,
    ) {
        let Some(player_id) = row.get("player_id").and_then(|v| v.as_str()) else {
            return;
        };

        if change == crate::protocol::RowChange::Delete {
            self.members.remove(player_id);
            return;
        }

        let merged = merge_member_payload(self.members.get(player_id), row, now);
        if let Some(member) = merged {
            self.members.insert(member.player_id.clone(), member);
        }
    }

    /// Replace the cache with rows read from the store. Stored values win;
    /// cached values fill what the store left empty.
    pub fn merge_member_rows(&mut self, rows: Vec<RoomPlayer>) {
        let mut merged = HashMap::with_capacity(rows.len());
        for mut row in rows {
            if let Some(cached) = self.members.get(&row.player_id) {
                if row.last_seen_at.is_none() {
                    row.last_seen_at = cached.last_seen_at;
                }
                if row.nickname.trim().is_empty() {
                    row.nickname = cached.nickname.clone();
                }
            }
            merged.insert(row.player_id.clone(), row);
        }
        self.members = merged;
    }

    /// Members in join order
    pub fn member_list(&self) -> Vec<RoomPlayer> {
        let mut members: Vec<RoomPlayer> = self.members.values().cloned().collect();
        members.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.player_id.cmp(&b.player_id))
        });
        members
    }
}

fn parse_time(value: Option<&serde_json::Value>) -> Option<DateTime<Utc>> {
    value?
        .as_str()?
        .parse::<DateTime<Utc>>()
        .ok()
}

/// Merge a possibly partial row payload over the cached member.
///
/// A payload field is used only when present with the right type; otherwise
/// the cached value is kept, then the column default.
pub fn merge_member_payload(
    prev: Option<&RoomPlayer>,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> Option<RoomPlayer> {
    let str_field = |key: &str| payload.get(key).and_then(|v| v.as_str()).map(str::to_string);
    let bool_field = |key: &str| payload.get(key).and_then(|v| v.as_bool());

    let room_id = str_field("room_id").or_else(|| prev.map(|p| p.room_id.clone()))?;
    let player_id = str_field("player_id").or_else(|| prev.map(|p| p.player_id.clone()))?;

    Some(RoomPlayer {
        room_id,
        player_id,
        nickname: str_field("nickname")
            .or_else(|| prev.map(|p| p.nickname.clone()))
            .unwrap_or_else(|| DEFAULT_NICKNAME.to_string()),
        score: payload
            .get("score")
            .and_then(|v| v.as_u64())
            .and_then(|s| u32::try_from(s).ok())
            .or_else(|| prev.map(|p| p.score))
            .unwrap_or(0),
        is_host: bool_field("is_host")
            .or_else(|| prev.map(|p| p.is_host))
            .unwrap_or(false),
        is_active: bool_field("is_active")
            .or_else(|| prev.map(|p| p.is_active))
            .unwrap_or(true),
        last_seen_at: parse_time(payload.get("last_seen_at"))
            .or_else(|| prev.and_then(|p| p.last_seen_at)),
        joined_at: parse_time(payload.get("joined_at"))
            .or_else(|| prev.map(|p| p.joined_at))
            .unwrap_or(now),
    })
}
