use super::*;
use crate::protocol::BroadcastHint;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

/// Display order of a round's answers. Depends only on the round id and the
/// set of answers, so every client shows the same order.
pub fn answer_order(round_id: &str, answers: &[Answer]) -> Vec<Answer> {
    let mut ordered = answers.to_vec();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    let digest = Sha256::digest(round_id.as_bytes());
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    let mut rng = ChaCha8Rng::seed_from_u64(u64::from_le_bytes(seed));

    ordered.shuffle(&mut rng);
    ordered
}

impl GameClient {
    /// Answers of the current round in display order
    pub async fn load_answer_choices(&mut self) -> ClientResult<Vec<Answer>> {
        let round = self.current_round()?;
        let answers = self.backend.list_answers(&round.id).await?;
        Ok(answer_order(&round.id, &answers))
    }

    /// Pick the answer to vote for; nothing is sent until the vote is cast
    pub fn select_answer(&mut self, answer_id: &str) -> ClientResult<()> {
        let me = self.require_identity()?;
        let round = self.current_round()?;
        if round.phase != RoundPhase::Voting || self.session.my_voted {
            return Err(ClientError::WrongPhase(round.phase));
        }

        let answers = self
            .last_snapshot()
            .map(|s| s.answers.as_slice())
            .unwrap_or_default();
        let answer = answers
            .iter()
            .find(|a| a.id == answer_id)
            .ok_or_else(|| ClientError::UnknownAnswer(answer_id.to_string()))?;
        if answer.author_id == me && answers.len() >= SELF_VOTE_MIN_ANSWERS {
            return Err(ClientError::SelfVote);
        }

        self.session.selected_answer_id = Some(answer_id.to_string());
        self.rerender();
        Ok(())
    }

    pub async fn cast_vote(&mut self) -> ClientResult<VoteOutcome> {
        let outcome = self.cast_vote_inner().await?;
        self.note_activity();
        self.refresh_quietly().await;
        Ok(outcome)
    }

    pub(crate) async fn cast_vote_inner(&mut self) -> ClientResult<VoteOutcome> {
        let me = self.require_identity()?;
        let round = self.current_round()?;
        if round.phase != RoundPhase::Voting {
            return Err(ClientError::WrongPhase(round.phase));
        }
        if self.session.my_voted {
            return Ok(VoteOutcome::AlreadyVoted);
        }
        let answer_id = self
            .session
            .selected_answer_id
            .clone()
            .ok_or(ClientError::NoSelection)?;

        let result = self
            .backend
            .insert_vote(NewVote {
                round_id: round.id.clone(),
                voter_id: me,
                answer_id,
            })
            .await;

        let outcome = match result {
            Ok(vote) => {
                tracing::info!("Vote {} cast in round {}", vote.id, round.id);
                VoteOutcome::Voted
            }
            Err(e) if is_duplicate(&e) => {
                tracing::debug!("Vote for round {} was already stored", round.id);
                VoteOutcome::AlreadyVoted
            }
            Err(e) => return Err(e.into()),
        };
        self.session.my_voted = true;

        if outcome == VoteOutcome::Voted {
            if let Some(room_id) = self.session.room_id().cloned() {
                self.subs
                    .announce(&room_id, BroadcastHint::VoteSubmitted { round_id: round.id })
                    .await;
            }
        }
        Ok(outcome)
    }

    pub async fn start_voting(&mut self) -> ClientResult<Transition> {
        let transition = self.start_voting_inner().await?;
        self.note_activity();
        self.refresh_quietly().await;
        Ok(transition)
    }

    /// Guarded answering -> voting; sets the voting deadline
    pub(crate) async fn start_voting_inner(&mut self) -> ClientResult<Transition> {
        self.require_host("start voting")?;
        let round = self.current_round()?;
        match round.phase {
            RoundPhase::Answering => {}
            RoundPhase::Composing => return Err(ClientError::WrongPhase(round.phase)),
            RoundPhase::Voting | RoundPhase::Results => return Ok(Transition::AlreadyAdvanced),
        }

        let seconds = self.room_settings().vote_seconds;
        let patch = RoundPatch {
            vote_deadline: Some(self.clock.now() + chrono::Duration::seconds(i64::from(seconds))),
            ..RoundPatch::to_phase(RoundPhase::Voting)
        };
        self.advance(&round.id, RoundPhase::Answering, patch).await
    }

    pub async fn finalize(&mut self) -> ClientResult<Transition> {
        let transition = self.finalize_inner().await?;
        self.note_activity();
        self.refresh_quietly().await;
        Ok(transition)
    }

    /// Tally and score the round through the backend procedure. The
    /// finalizing flag keeps this client from firing twice for one round.
    pub(crate) async fn finalize_inner(&mut self) -> ClientResult<Transition> {
        self.require_host("finalize the round")?;
        let round = self.current_round()?;
        match round.phase {
            RoundPhase::Voting => {}
            RoundPhase::Results => return Ok(Transition::AlreadyAdvanced),
            phase => return Err(ClientError::WrongPhase(phase)),
        }
        if self.session.finalizing {
            return Ok(Transition::AlreadyAdvanced);
        }

        self.session.finalizing = true;
        if let Err(e) = self.backend.finalize_round(&round.id).await {
            self.session.finalizing = false;
            return Err(e.into());
        }
        tracing::info!("Round {} finalized", round.id);
        Ok(Transition::Applied)
    }
}
