mod memory;
mod rest;

use crate::protocol::{BroadcastHint, RealtimeEvent, Topic};
use crate::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

pub use memory::{FailPoint, LookupShape, MemoryBackend};
pub use rest::{RestBackend, RestConfig};

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur talking to the hosted database
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// Unique constraint violation (Postgres 23505)
    #[error("Duplicate row: {0}")]
    UniqueViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The store refused the write (policy, check constraint, procedure error)
    #[error("Rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Not signed in")]
    Unauthorized,

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Response parsing failed: {0}")]
    Decode(String),
}

/// Row and procedure access to the hosted game database.
///
/// Implementations own identity: every call runs as the signed-in anonymous
/// user returned by [`Backend::sign_in_anonymously`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// Obtain (or reuse) the anonymous session for this client
    async fn sign_in_anonymously(&self) -> BackendResult<AuthSession>;

    /// Resume a stored session, refreshing its token where the store supports
    /// it. Fails with [`BackendError::Unauthorized`] once it can't be used.
    async fn restore_session(&self, stored: &AuthSession) -> BackendResult<AuthSession>;

    async fn insert_room(&self, room: NewRoom) -> BackendResult<Room>;

    async fn get_room(&self, room_id: &str) -> BackendResult<Room>;

    async fn update_room(&self, room_id: &str, patch: RoomPatch) -> BackendResult<()>;

    /// `get_room_by_code` procedure. The response shape is not stable (array,
    /// object or wrapped object) and is returned raw for normalization.
    async fn lookup_room_by_code(&self, code: &str) -> BackendResult<serde_json::Value>;

    /// Plain table lookup used when the procedure gives nothing usable
    async fn find_room_by_code(&self, code: &str) -> BackendResult<Option<Room>>;

    /// Members of a room ordered by join time
    async fn list_members(&self, room_id: &str) -> BackendResult<Vec<RoomPlayer>>;

    async fn get_member(&self, room_id: &str, player_id: &str)
        -> BackendResult<Option<RoomPlayer>>;

    async fn insert_member(&self, member: NewMember) -> BackendResult<()>;

    async fn update_presence(
        &self,
        room_id: &str,
        player_id: &str,
        active: bool,
        seen_at: DateTime<Utc>,
    ) -> BackendResult<()>;

    /// Zero every member's score (new game)
    async fn reset_scores(&self, room_id: &str) -> BackendResult<()>;

    async fn count_rounds(&self, room_id: &str) -> BackendResult<u64>;

    /// Most recently started round of a room
    async fn latest_round(&self, room_id: &str) -> BackendResult<Option<Round>>;

    async fn insert_round(&self, round: NewRound) -> BackendResult<Round>;

    /// Apply `patch` only if the round is still in `expected`.
    /// Returns whether a row was updated.
    async fn advance_round(
        &self,
        round_id: &str,
        expected: RoundPhase,
        patch: RoundPatch,
    ) -> BackendResult<bool>;

    /// `pick_question` procedure
    async fn pick_question(&self) -> BackendResult<Option<Question>>;

    async fn get_question(&self, question_id: &str) -> BackendResult<Option<Question>>;

    async fn insert_answer(&self, answer: NewAnswer) -> BackendResult<Answer>;

    async fn list_answers(&self, round_id: &str) -> BackendResult<Vec<Answer>>;

    async fn insert_vote(&self, vote: NewVote) -> BackendResult<Vote>;

    async fn list_votes(&self, round_id: &str) -> BackendResult<Vec<Vote>>;

    /// `finalize_round` procedure: tally, score and mark the round finished
    async fn finalize_round(&self, round_id: &str) -> BackendResult<()>;
}

/// Push notifications from the hosted database
#[async_trait]
pub trait Realtime: Send + Sync {
    /// Open a channel. Dropping the receiver closes it.
    async fn subscribe(&self, topic: Topic) -> BackendResult<mpsc::UnboundedReceiver<RealtimeEvent>>;

    /// Send a hint to everyone on a room channel
    async fn broadcast(&self, room_id: &str, hint: BroadcastHint) -> BackendResult<()>;
}
