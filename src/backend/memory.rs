//! In-process backend with the same constraints as the hosted database:
//! unique answers/votes, phase-guarded round updates, the scoring procedure and
//! realtime fan-out. Backs the test suite and the local demo.

use super::*;
use crate::protocol::RowChange;
use rand::Rng;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

/// Response shape served by the `get_room_by_code` procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupShape {
    Object,
    Array,
    /// `{ "get_room_by_code": { ... } }`
    Wrapped,
    /// Always `null`, forcing the table fallback
    Null,
}

/// Operations that can be made to fail once, for exercising error paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertMember,
    ListMembers,
    LatestRound,
    AdvanceRound,
    InsertAnswer,
    InsertVote,
    UpdatePresence,
    FinalizeRound,
    LookupRoomByCode,
}

#[derive(Default)]
struct Tables {
    rooms: HashMap<RoomId, Room>,
    members: Vec<RoomPlayer>,
    rounds: Vec<Round>,
    answers: Vec<Answer>,
    votes: Vec<Vote>,
    questions: Vec<Question>,
    last_started_at: Option<DateTime<Utc>>,
    /// Issued access tokens and their users
    sessions: HashMap<String, PlayerId>,
}

pub struct MemoryBackend {
    tables: RwLock<Tables>,
    subscribers: Mutex<Vec<(Topic, mpsc::UnboundedSender<RealtimeEvent>)>>,
    failures: Mutex<HashMap<FailPoint, BackendError>>,
    lookup_shape: RwLock<LookupShape>,
}

fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

fn procedure_error(message: &str) -> BackendError {
    BackendError::Rejected {
        code: "P0001".to_string(),
        message: message.to_string(),
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            subscribers: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            lookup_shape: RwLock::new(LookupShape::Object),
        }
    }

    /// Backend seeded with preset questions
    pub fn with_questions<I, S>(questions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tables = Tables {
            questions: questions
                .into_iter()
                .map(|text| Question {
                    id: new_id(),
                    text: text.into(),
                })
                .collect(),
            ..Tables::default()
        };
        Self {
            tables: RwLock::new(tables),
            ..Self::new()
        }
    }

    pub async fn set_lookup_shape(&self, shape: LookupShape) {
        *self.lookup_shape.write().await = shape;
    }

    /// Make the next call to `point` fail with `error`
    pub async fn fail_next(&self, point: FailPoint, error: BackendError) {
        self.failures.lock().await.insert(point, error);
    }

    async fn check_failure(&self, point: FailPoint) -> BackendResult<()> {
        match self.failures.lock().await.remove(&point) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn publish(&self, event: RealtimeEvent) {
        let topic = event.topic();
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|(t, tx)| {
            if *t == topic {
                tx.send(event.clone()).is_ok()
            } else {
                !tx.is_closed()
            }
        });
    }

    /// Number of realtime channels with a live receiver
    pub async fn open_channels(&self) -> usize {
        self.subscribers
            .lock()
            .await
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }

    // Inspection helpers for tests and the demo summary

    pub async fn answers_for(&self, round_id: &str) -> Vec<Answer> {
        self.tables
            .read()
            .await
            .answers
            .iter()
            .filter(|a| a.round_id == round_id)
            .cloned()
            .collect()
    }

    pub async fn votes_for(&self, round_id: &str) -> Vec<Vote> {
        self.tables
            .read()
            .await
            .votes
            .iter()
            .filter(|v| v.round_id == round_id)
            .cloned()
            .collect()
    }

    pub async fn round(&self, round_id: &str) -> Option<Round> {
        self.tables
            .read()
            .await
            .rounds
            .iter()
            .find(|r| r.id == round_id)
            .cloned()
    }

    pub async fn members(&self, room_id: &str) -> Vec<RoomPlayer> {
        self.tables
            .read()
            .await
            .members
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect()
    }

    fn member_event(change: RowChange, member: &RoomPlayer) -> RealtimeEvent {
        RealtimeEvent::MembershipChanged {
            change,
            room_id: member.room_id.clone(),
            row: serde_json::to_value(member).unwrap_or(serde_json::Value::Null),
        }
    }

    fn round_event(change: RowChange, round: &Round) -> RealtimeEvent {
        RealtimeEvent::RoundChanged {
            change,
            room_id: round.room_id.clone(),
            round_id: round.id.clone(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    /// Mints a fresh identity per call; clients keep theirs in the session
    async fn sign_in_anonymously(&self) -> BackendResult<AuthSession> {
        let session = AuthSession {
            user_id: new_id(),
            access_token: new_id(),
            refresh_token: None,
        };
        self.tables
            .write()
            .await
            .sessions
            .insert(session.access_token.clone(), session.user_id.clone());
        Ok(session)
    }

    async fn restore_session(&self, stored: &AuthSession) -> BackendResult<AuthSession> {
        let tables = self.tables.read().await;
        match tables.sessions.get(&stored.access_token) {
            Some(user_id) if *user_id == stored.user_id => Ok(stored.clone()),
            _ => Err(BackendError::Unauthorized),
        }
    }

    async fn insert_room(&self, room: NewRoom) -> BackendResult<Room> {
        let mut tables = self.tables.write().await;
        if tables.rooms.values().any(|r| r.code == room.code) {
            return Err(BackendError::UniqueViolation("rooms_code_key".to_string()));
        }

        let row = Room {
            id: new_id(),
            code: room.code,
            owner_id: room.owner_id,
            status: room.status,
            settings: room.settings,
            archived: false,
            archived_at: None,
        };
        tables.rooms.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn get_room(&self, room_id: &str) -> BackendResult<Room> {
        self.tables
            .read()
            .await
            .rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("room {}", room_id)))
    }

    async fn update_room(&self, room_id: &str, patch: RoomPatch) -> BackendResult<()> {
        let status = {
            let mut tables = self.tables.write().await;
            let room = tables
                .rooms
                .get_mut(room_id)
                .ok_or_else(|| BackendError::NotFound(format!("room {}", room_id)))?;

            if let Some(status) = patch.status {
                room.status = status;
            }
            if let Some(settings) = patch.settings {
                room.settings = settings;
            }
            if let Some(archived) = patch.archived {
                room.archived = archived;
            }
            if patch.archived_at.is_some() {
                room.archived_at = patch.archived_at;
            }
            room.status
        };

        self.publish(RealtimeEvent::RoomChanged {
            room_id: room_id.to_string(),
            status: Some(status),
        })
        .await;
        Ok(())
    }

    async fn lookup_room_by_code(&self, code: &str) -> BackendResult<serde_json::Value> {
        self.check_failure(FailPoint::LookupRoomByCode).await?;

        let shape = *self.lookup_shape.read().await;
        let room = self
            .tables
            .read()
            .await
            .rooms
            .values()
            .find(|r| r.code == code)
            .map(|r| serde_json::json!({ "id": r.id, "code": r.code, "status": r.status }));

        Ok(match (shape, room) {
            (LookupShape::Null, _) | (LookupShape::Object, None) => serde_json::Value::Null,
            (LookupShape::Object, Some(room)) => room,
            (LookupShape::Array, room) => serde_json::Value::Array(room.into_iter().collect()),
            (LookupShape::Wrapped, room) => {
                serde_json::json!({ "get_room_by_code": room.unwrap_or(serde_json::Value::Null) })
            }
        })
    }

    async fn find_room_by_code(&self, code: &str) -> BackendResult<Option<Room>> {
        Ok(self
            .tables
            .read()
            .await
            .rooms
            .values()
            .find(|r| r.code == code)
            .cloned())
    }

    async fn list_members(&self, room_id: &str) -> BackendResult<Vec<RoomPlayer>> {
        self.check_failure(FailPoint::ListMembers).await?;

        let mut members = self.members(room_id).await;
        members.sort_by_key(|m| m.joined_at);
        Ok(members)
    }

    async fn get_member(
        &self,
        room_id: &str,
        player_id: &str,
    ) -> BackendResult<Option<RoomPlayer>> {
        Ok(self
            .tables
            .read()
            .await
            .members
            .iter()
            .find(|m| m.room_id == room_id && m.player_id == player_id)
            .cloned())
    }

    async fn insert_member(&self, member: NewMember) -> BackendResult<()> {
        self.check_failure(FailPoint::InsertMember).await?;

        let row = {
            let mut tables = self.tables.write().await;
            if !tables.rooms.contains_key(&member.room_id) {
                return Err(BackendError::NotFound(format!("room {}", member.room_id)));
            }
            if tables
                .members
                .iter()
                .any(|m| m.room_id == member.room_id && m.player_id == member.player_id)
            {
                return Err(BackendError::UniqueViolation(
                    "room_players_pkey".to_string(),
                ));
            }

            // Keep join order strict even when two inserts share a timestamp
            let now = Utc::now();
            let joined_at = tables
                .members
                .iter()
                .map(|m| m.joined_at)
                .max()
                .map_or(now, |last| now.max(last + chrono::Duration::microseconds(1)));

            let row = RoomPlayer {
                room_id: member.room_id,
                player_id: member.player_id,
                nickname: member.nickname,
                score: 0,
                is_host: member.is_host,
                is_active: true,
                last_seen_at: None,
                joined_at,
            };
            tables.members.push(row.clone());
            row
        };

        self.publish(Self::member_event(RowChange::Insert, &row)).await;
        Ok(())
    }

    async fn update_presence(
        &self,
        room_id: &str,
        player_id: &str,
        active: bool,
        seen_at: DateTime<Utc>,
    ) -> BackendResult<()> {
        self.check_failure(FailPoint::UpdatePresence).await?;

        let found = {
            let mut tables = self.tables.write().await;
            match tables
                .members
                .iter_mut()
                .find(|m| m.room_id == room_id && m.player_id == player_id)
            {
                Some(member) => {
                    member.is_active = active;
                    member.last_seen_at = Some(seen_at);
                    true
                }
                None => false,
            }
        };

        if found {
            // Hosted change feeds send only the columns that were written
            self.publish(RealtimeEvent::MembershipChanged {
                change: RowChange::Update,
                room_id: room_id.to_string(),
                row: serde_json::json!({
                    "room_id": room_id,
                    "player_id": player_id,
                    "is_active": active,
                    "last_seen_at": seen_at,
                }),
            })
            .await;
        }
        Ok(())
    }

    async fn reset_scores(&self, room_id: &str) -> BackendResult<()> {
        let changed: Vec<RoomPlayer> = {
            let mut tables = self.tables.write().await;
            tables
                .members
                .iter_mut()
                .filter(|m| m.room_id == room_id)
                .map(|m| {
                    m.score = 0;
                    m.clone()
                })
                .collect()
        };

        for member in &changed {
            self.publish(Self::member_event(RowChange::Update, member))
                .await;
        }
        Ok(())
    }

    async fn count_rounds(&self, room_id: &str) -> BackendResult<u64> {
        Ok(self
            .tables
            .read()
            .await
            .rounds
            .iter()
            .filter(|r| r.room_id == room_id)
            .count() as u64)
    }

    async fn latest_round(&self, room_id: &str) -> BackendResult<Option<Round>> {
        self.check_failure(FailPoint::LatestRound).await?;

        Ok(self
            .tables
            .read()
            .await
            .rounds
            .iter()
            .filter(|r| r.room_id == room_id)
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn insert_round(&self, round: NewRound) -> BackendResult<Round> {
        let row = {
            let mut tables = self.tables.write().await;
            if !tables.rooms.contains_key(&round.room_id) {
                return Err(BackendError::NotFound(format!("room {}", round.room_id)));
            }

            let now = Utc::now();
            let started_at = tables
                .last_started_at
                .map_or(now, |last| now.max(last + chrono::Duration::microseconds(1)));
            tables.last_started_at = Some(started_at);

            let row = Round {
                id: new_id(),
                room_id: round.room_id,
                phase: round.phase,
                question_id: round.question_id,
                question_text: None,
                question_source: round.question_source,
                author_id: round.author_id,
                compose_deadline: round.compose_deadline,
                answer_deadline: round.answer_deadline,
                vote_deadline: None,
                started_at,
                ended_at: None,
                finalized_at: None,
            };
            tables.rounds.push(row.clone());
            row
        };

        self.publish(Self::round_event(RowChange::Insert, &row)).await;
        Ok(row)
    }

    async fn advance_round(
        &self,
        round_id: &str,
        expected: RoundPhase,
        patch: RoundPatch,
    ) -> BackendResult<bool> {
        self.check_failure(FailPoint::AdvanceRound).await?;

        let updated = {
            let mut tables = self.tables.write().await;
            let round = tables
                .rounds
                .iter_mut()
                .find(|r| r.id == round_id)
                .ok_or_else(|| BackendError::NotFound(format!("round {}", round_id)))?;

            if round.phase != expected {
                None
            } else {
                round.phase = patch.phase;
                if patch.question_id.is_some() {
                    round.question_id = patch.question_id;
                }
                if patch.question_text.is_some() {
                    round.question_text = patch.question_text;
                }
                if let Some(source) = patch.question_source {
                    round.question_source = source;
                }
                if patch.answer_deadline.is_some() {
                    round.answer_deadline = patch.answer_deadline;
                }
                if patch.vote_deadline.is_some() {
                    round.vote_deadline = patch.vote_deadline;
                }
                Some(round.clone())
            }
        };

        match updated {
            Some(round) => {
                self.publish(Self::round_event(RowChange::Update, &round))
                    .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pick_question(&self) -> BackendResult<Option<Question>> {
        let tables = self.tables.read().await;
        if tables.questions.is_empty() {
            return Ok(None);
        }
        let idx = rand::rng().random_range(0..tables.questions.len());
        Ok(tables.questions.get(idx).cloned())
    }

    async fn get_question(&self, question_id: &str) -> BackendResult<Option<Question>> {
        Ok(self
            .tables
            .read()
            .await
            .questions
            .iter()
            .find(|q| q.id == question_id)
            .cloned())
    }

    async fn insert_answer(&self, answer: NewAnswer) -> BackendResult<Answer> {
        self.check_failure(FailPoint::InsertAnswer).await?;

        let row = {
            let mut tables = self.tables.write().await;
            let round = tables
                .rounds
                .iter()
                .find(|r| r.id == answer.round_id)
                .ok_or_else(|| BackendError::NotFound(format!("round {}", answer.round_id)))?;

            if tables
                .answers
                .iter()
                .any(|a| a.round_id == answer.round_id && a.author_id == answer.author_id)
            {
                return Err(BackendError::UniqueViolation(
                    "answers_round_id_author_id_key".to_string(),
                ));
            }
            if round.phase != RoundPhase::Answering {
                return Err(procedure_error("round is not accepting answers"));
            }

            let row = Answer {
                id: new_id(),
                round_id: answer.round_id,
                author_id: answer.author_id,
                text: answer.text,
            };
            tables.answers.push(row.clone());
            row
        };

        self.publish(RealtimeEvent::AnswerInserted {
            round_id: row.round_id.clone(),
            author_id: row.author_id.clone(),
        })
        .await;
        Ok(row)
    }

    async fn list_answers(&self, round_id: &str) -> BackendResult<Vec<Answer>> {
        Ok(self.answers_for(round_id).await)
    }

    async fn insert_vote(&self, vote: NewVote) -> BackendResult<Vote> {
        self.check_failure(FailPoint::InsertVote).await?;

        let row = {
            let mut tables = self.tables.write().await;
            let round = tables
                .rounds
                .iter()
                .find(|r| r.id == vote.round_id)
                .ok_or_else(|| BackendError::NotFound(format!("round {}", vote.round_id)))?;

            if tables
                .votes
                .iter()
                .any(|v| v.round_id == vote.round_id && v.voter_id == vote.voter_id)
            {
                return Err(BackendError::UniqueViolation(
                    "votes_round_id_voter_id_key".to_string(),
                ));
            }
            if round.phase != RoundPhase::Voting {
                return Err(procedure_error("round is not accepting votes"));
            }
            if !tables
                .answers
                .iter()
                .any(|a| a.id == vote.answer_id && a.round_id == vote.round_id)
            {
                return Err(BackendError::NotFound(format!("answer {}", vote.answer_id)));
            }

            let row = Vote {
                id: new_id(),
                round_id: vote.round_id,
                voter_id: vote.voter_id,
                answer_id: vote.answer_id,
            };
            tables.votes.push(row.clone());
            row
        };

        self.publish(RealtimeEvent::VoteInserted {
            round_id: row.round_id.clone(),
            voter_id: row.voter_id.clone(),
        })
        .await;
        Ok(row)
    }

    async fn list_votes(&self, round_id: &str) -> BackendResult<Vec<Vote>> {
        Ok(self.votes_for(round_id).await)
    }

    async fn finalize_round(&self, round_id: &str) -> BackendResult<()> {
        self.check_failure(FailPoint::FinalizeRound).await?;

        let (round, scored) = {
            let mut guard = self.tables.write().await;
            let tables = &mut *guard;

            let round = tables
                .rounds
                .iter_mut()
                .find(|r| r.id == round_id)
                .ok_or_else(|| BackendError::NotFound(format!("round {}", round_id)))?;

            if round.finalized_at.is_some() {
                return Ok(());
            }
            if round.phase != RoundPhase::Voting {
                return Err(procedure_error("round is not in voting"));
            }

            // One point to the author of every answer that received a vote
            let mut points: HashMap<PlayerId, u32> = HashMap::new();
            for vote in tables.votes.iter().filter(|v| v.round_id == round_id) {
                if let Some(answer) = tables.answers.iter().find(|a| a.id == vote.answer_id) {
                    *points.entry(answer.author_id.clone()).or_insert(0) += 1;
                }
            }

            let now = Utc::now();
            round.phase = RoundPhase::Results;
            round.ended_at = Some(now);
            round.finalized_at = Some(now);
            let round = round.clone();

            let mut scored = Vec::new();
            for member in tables
                .members
                .iter_mut()
                .filter(|m| m.room_id == round.room_id)
            {
                if let Some(p) = points.get(&member.player_id) {
                    member.score += p;
                    scored.push(member.clone());
                }
            }
            (round, scored)
        };

        for member in &scored {
            self.publish(Self::member_event(RowChange::Update, member))
                .await;
        }
        self.publish(Self::round_event(RowChange::Update, &round))
            .await;
        Ok(())
    }
}

#[async_trait]
impl Realtime for MemoryBackend {
    async fn subscribe(
        &self,
        topic: Topic,
    ) -> BackendResult<mpsc::UnboundedReceiver<RealtimeEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push((topic, tx));
        Ok(rx)
    }

    async fn broadcast(&self, room_id: &str, hint: BroadcastHint) -> BackendResult<()> {
        self.publish(RealtimeEvent::Broadcast {
            room_id: room_id.to_string(),
            hint,
        })
        .await;
        Ok(())
    }
}
