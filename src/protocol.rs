use crate::types::*;
use serde::{Deserialize, Serialize};

/// Realtime channel scope. Room channels carry membership, room and round
/// changes plus broadcasts; round channels carry answer and vote inserts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Room(RoomId),
    Round(RoundId),
}

impl Topic {
    /// Channel name as used by the hosted realtime service
    pub fn channel_name(&self) -> String {
        match self {
            Topic::Room(id) => format!("room-{}", id),
            Topic::Round(id) => format!("round-{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowChange {
    Insert,
    Update,
    Delete,
}

/// Ad-hoc messages clients send each other over the room channel.
/// They only hint that a refresh is worthwhile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BroadcastHint {
    AnswerSubmitted { round_id: RoundId },
    VoteSubmitted { round_id: RoundId },
    RoundStarting,
    RoundStarted { round_id: RoundId },
    PlayerJoined { player_id: PlayerId },
}

/// Everything that can arrive from the push channel, as one stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// Membership row change. `row` is the raw payload (`new` for inserts and
    /// updates, `old` for deletes) and may be partial.
    MembershipChanged {
        change: RowChange,
        room_id: RoomId,
        row: serde_json::Value,
    },
    RoomChanged {
        room_id: RoomId,
        status: Option<RoomStatus>,
    },
    RoundChanged {
        change: RowChange,
        room_id: RoomId,
        round_id: RoundId,
    },
    AnswerInserted {
        round_id: RoundId,
        author_id: PlayerId,
    },
    VoteInserted {
        round_id: RoundId,
        voter_id: PlayerId,
    },
    Broadcast {
        room_id: RoomId,
        hint: BroadcastHint,
    },
}

impl RealtimeEvent {
    /// The channel this event is delivered on
    pub fn topic(&self) -> Topic {
        match self {
            RealtimeEvent::MembershipChanged { room_id, .. }
            | RealtimeEvent::RoomChanged { room_id, .. }
            | RealtimeEvent::RoundChanged { room_id, .. }
            | RealtimeEvent::Broadcast { room_id, .. } => Topic::Room(room_id.clone()),
            RealtimeEvent::AnswerInserted { round_id, .. }
            | RealtimeEvent::VoteInserted { round_id, .. } => Topic::Round(round_id.clone()),
        }
    }
}

/// User and page actions a client can perform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum Command {
    SetNickname {
        nickname: String,
    },
    CreateRoom {
        #[serde(default)]
        settings: Option<RoomSettings>,
    },
    JoinRoom {
        code: String,
    },
    /// Typing into the answer box; kept so a deadline can auto-submit it
    DraftAnswer {
        text: String,
    },
    SubmitAnswer {
        text: String,
    },
    SubmitCustomQuestion {
        text: String,
    },
    SelectAnswer {
        answer_id: AnswerId,
    },
    CastVote,
    LoadAnswers,
    /// Visibility, online/offline and page-hide events
    SetPresence {
        active: bool,
    },
    Refresh,
    LeaveRoom,
    // Host-only commands
    HostSaveSettings {
        settings: RoomSettings,
    },
    HostStartGame {
        #[serde(default)]
        settings: Option<RoomSettings>,
    },
    HostStartRound,
    HostStartVoting,
    HostFinalize,
    HostEndGame,
    HostStartNewGame,
    /// Stop the client loop
    Shutdown,
}
