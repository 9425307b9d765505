use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type RoomId = String;
pub type PlayerId = String;
pub type RoundId = String;
pub type AnswerId = String;
pub type VoteId = String;
pub type QuestionId = String;

/// Join codes avoid look-alike characters (no 0/O, 1/I)
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const ROOM_CODE_LENGTH: usize = 4;

/// Self-voting is blocked once a round has at least this many answers
pub const SELF_VOTE_MIN_ANSWERS: usize = 3;

/// Nickname used when a player joins without setting one
pub const DEFAULT_NICKNAME: &str = "Player";

/// Signed-in anonymous session, stored so a relaunch can resume it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: PlayerId,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Lobby,
    InProgress,
    Archived,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuestionSource {
    #[default]
    Preset,
    Players,
}

/// Round lifecycle. Variant order is the only legal direction of travel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    Composing,
    Answering,
    Voting,
    Results,
}

impl RoundPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundPhase::Composing => "composing",
            RoundPhase::Answering => "answering",
            RoundPhase::Voting => "voting",
            RoundPhase::Results => "results",
        }
    }

    /// Check if a single-step phase advance is valid
    pub fn can_advance_to(&self, to: RoundPhase) -> bool {
        use RoundPhase::*;

        matches!(
            (self, to),
            (Composing, Answering) | (Answering, Voting) | (Voting, Results)
        )
    }
}

impl std::fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomSettings {
    pub target_score: u32,
    pub question_seconds: u32,
    pub vote_seconds: u32,
    pub question_source: QuestionSource,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            target_score: 10,
            question_seconds: 60,
            vote_seconds: 45,
            question_source: QuestionSource::Preset,
        }
    }
}

impl RoomSettings {
    /// Clamp user-entered values into the ranges the lobby form accepts
    pub fn clamped(self) -> Self {
        Self {
            target_score: self.target_score.clamp(1, 99),
            question_seconds: self.question_seconds.clamp(1, 999),
            vote_seconds: self.vote_seconds.clamp(1, 999),
            question_source: self.question_source,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub code: String,
    pub owner_id: PlayerId,
    pub status: RoomStatus,
    #[serde(flatten)]
    pub settings: RoomSettings,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewRoom {
    pub code: String,
    pub owner_id: PlayerId,
    pub status: RoomStatus,
    #[serde(flatten)]
    pub settings: RoomSettings,
}

/// Partial room update; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoomPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RoomStatus>,
    #[serde(flatten)]
    pub settings: Option<RoomSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

/// A (room, player) membership row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomPlayer {
    pub room_id: RoomId,
    pub player_id: PlayerId,
    pub nickname: String,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct NewMember {
    pub room_id: RoomId,
    pub player_id: PlayerId,
    pub nickname: String,
    pub is_host: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Round {
    pub id: RoundId,
    pub room_id: RoomId,
    pub phase: RoundPhase,
    #[serde(default)]
    pub question_id: Option<QuestionId>,
    #[serde(default)]
    pub question_text: Option<String>,
    #[serde(default)]
    pub question_source: QuestionSource,
    #[serde(default)]
    pub author_id: Option<PlayerId>,
    #[serde(default)]
    pub compose_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answer_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub vote_deadline: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Round {
    /// Deadline governing the round's current phase, if any
    pub fn active_deadline(&self) -> Option<DateTime<Utc>> {
        match self.phase {
            RoundPhase::Composing => self.compose_deadline,
            RoundPhase::Answering => self.answer_deadline,
            RoundPhase::Voting => self.vote_deadline,
            RoundPhase::Results => None,
        }
    }

    pub fn has_question(&self) -> bool {
        self.question_id.is_some()
            || self
                .question_text
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewRound {
    pub room_id: RoomId,
    pub phase: RoundPhase,
    pub question_source: QuestionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<QuestionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<PlayerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose_deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_deadline: Option<DateTime<Utc>>,
}

/// Fields written together with a guarded phase advance
#[derive(Debug, Clone, Serialize)]
pub struct RoundPatch {
    pub phase: RoundPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<QuestionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_source: Option<QuestionSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_deadline: Option<DateTime<Utc>>,
}

impl RoundPatch {
    pub fn to_phase(phase: RoundPhase) -> Self {
        Self {
            phase,
            question_id: None,
            question_text: None,
            question_source: None,
            answer_deadline: None,
            vote_deadline: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub id: AnswerId,
    pub round_id: RoundId,
    pub author_id: PlayerId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewAnswer {
    pub round_id: RoundId,
    pub author_id: PlayerId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vote {
    pub id: VoteId,
    pub round_id: RoundId,
    pub voter_id: PlayerId,
    pub answer_id: AnswerId,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewVote {
    pub round_id: RoundId,
    pub voter_id: PlayerId,
    pub answer_id: AnswerId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_is_monotonic() {
        assert!(RoundPhase::Composing < RoundPhase::Answering);
        assert!(RoundPhase::Answering < RoundPhase::Voting);
        assert!(RoundPhase::Voting < RoundPhase::Results);
    }

    #[test]
    fn test_phase_advance_is_single_step_forward() {
        assert!(RoundPhase::Composing.can_advance_to(RoundPhase::Answering));
        assert!(RoundPhase::Answering.can_advance_to(RoundPhase::Voting));
        assert!(RoundPhase::Voting.can_advance_to(RoundPhase::Results));

        assert!(!RoundPhase::Voting.can_advance_to(RoundPhase::Answering));
        assert!(!RoundPhase::Answering.can_advance_to(RoundPhase::Results));
        assert!(!RoundPhase::Results.can_advance_to(RoundPhase::Composing));
    }

    #[test]
    fn test_settings_clamped() {
        let settings = RoomSettings {
            target_score: 0,
            question_seconds: 5000,
            vote_seconds: 30,
            question_source: QuestionSource::Players,
        }
        .clamped();

        assert_eq!(settings.target_score, 1);
        assert_eq!(settings.question_seconds, 999);
        assert_eq!(settings.vote_seconds, 30);
        assert_eq!(settings.question_source, QuestionSource::Players);
    }

    #[test]
    fn test_room_row_uses_flat_settings_columns() {
        let row = serde_json::json!({
            "id": "r1",
            "code": "ABCD",
            "owner_id": "p1",
            "status": "in_progress",
            "target_score": 3,
            "question_seconds": 20,
            "vote_seconds": 15,
            "question_source": "players"
        });

        let room: Room = serde_json::from_value(row).unwrap();
        assert_eq!(room.status, RoomStatus::InProgress);
        assert_eq!(room.settings.target_score, 3);
        assert_eq!(room.settings.question_source, QuestionSource::Players);
        assert!(!room.archived);
    }

    #[test]
    fn test_member_row_defaults_active() {
        let row = serde_json::json!({
            "room_id": "r1",
            "player_id": "p1",
            "nickname": "Alice",
            "joined_at": "2026-01-01T00:00:00Z"
        });

        let member: RoomPlayer = serde_json::from_value(row).unwrap();
        assert!(member.is_active);
        assert_eq!(member.score, 0);
        assert!(!member.is_host);
    }
}
