use super::*;
use crate::protocol::BroadcastHint;

impl GameClient {
    /// Keep what the player has typed so far for the deadline auto-submit
    pub fn draft_answer(&mut self, text: &str) {
        self.session.draft_answer = text.to_string();
    }

    pub async fn submit_answer(&mut self, text: &str) -> ClientResult<Submission> {
        let outcome = self.submit_answer_inner(text).await?;
        self.note_activity();
        self.refresh_quietly().await;
        Ok(outcome)
    }

    pub(crate) async fn submit_answer_inner(&mut self, text: &str) -> ClientResult<Submission> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::EmptyAnswer);
        }
        let me = self.require_identity()?;
        let round = self.current_round()?;
        if round.phase != RoundPhase::Answering {
            return Err(ClientError::WrongPhase(round.phase));
        }
        if self.session.my_submitted {
            return Ok(Submission::AlreadySubmitted);
        }

        let result = self
            .backend
            .insert_answer(NewAnswer {
                round_id: round.id.clone(),
                author_id: me,
                text: text.to_string(),
            })
            .await;

        let outcome = match result {
            Ok(answer) => {
                tracing::info!("Answer {} submitted for round {}", answer.id, round.id);
                Submission::Submitted
            }
            Err(e) if is_duplicate(&e) => {
                tracing::debug!("Answer for round {} was already stored", round.id);
                Submission::AlreadySubmitted
            }
            Err(e) => return Err(e.into()),
        };

        self.session.my_submitted = true;
        self.session.draft_answer.clear();

        if outcome == Submission::Submitted {
            if let Some(room_id) = self.session.room_id().cloned() {
                self.subs
                    .announce(&room_id, BroadcastHint::AnswerSubmitted { round_id: round.id })
                    .await;
            }
        }
        Ok(outcome)
    }
}
