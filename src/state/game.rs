//! Refresh, reconciliation and the timer tick

use super::*;
use crate::protocol::{BroadcastHint, RealtimeEvent, RowChange};
use crate::session::PhaseChange;
use crate::view::Notice;

/// Upper bound on read-act cycles in one refresh
const MAX_RECONCILE_PASSES: usize = 3;

impl GameClient {
    /// Read the room, its members and the latest round with its answers and votes
    pub(crate) async fn load_snapshot(&mut self) -> ClientResult<Option<Snapshot>> {
        let Some(room_id) = self.session.room_id().cloned() else {
            return Ok(None);
        };
        let backend = self.backend.clone();

        let (room, members, round) = futures::join!(
            backend.get_room(&room_id),
            backend.list_members(&room_id),
            backend.latest_round(&room_id)
        );
        let (room, members, round) = (room?, members?, round?);

        let (answers, votes, question_text) = match &round {
            Some(r) => {
                let (answers, votes) =
                    futures::join!(backend.list_answers(&r.id), backend.list_votes(&r.id));
                (answers?, votes?, self.question_text(r).await?)
            }
            None => (Vec::new(), Vec::new(), None),
        };

        Ok(Some(Snapshot {
            room,
            members,
            round,
            answers,
            votes,
            question_text,
        }))
    }

    async fn question_text(&mut self, round: &Round) -> ClientResult<Option<String>> {
        if let Some(text) = round.question_text.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(Some(text.to_string()));
        }
        let Some(question_id) = &round.question_id else {
            return Ok(None);
        };
        if let Some(text) = self.session.questions.get(question_id) {
            return Ok(Some(text.clone()));
        }

        let question = self.backend.get_question(question_id).await?;
        Ok(question.map(|q| {
            self.session.questions.insert(q.id, q.text.clone());
            q.text
        }))
    }

    /// Fold a fresh snapshot into the session and render it.
    /// Returns the automatic actions now due.
    async fn apply_snapshot(&mut self, mut snapshot: Snapshot) -> Vec<AutoAction> {
        self.session.merge_member_rows(std::mem::take(&mut snapshot.members));
        snapshot.members = self.session.member_list();

        if let Some(round) = snapshot.round.clone() {
            match self.session.round.observe(&round) {
                PhaseChange::NewRound => {
                    tracing::info!("Round {} observed in {}", round.id, round.phase);
                    self.session.reset_round_flags();
                    if let Err(e) = self.subs.subscribe_round(&round.id).await {
                        tracing::warn!("Subscribing to round {} failed: {}", round.id, e);
                    }
                    if self.session.auto_jump_to_round {
                        self.navigate(Step::Round);
                    }
                }
                PhaseChange::Advanced { from, to } => {
                    tracing::debug!("Round {} advanced {} -> {}", round.id, from, to);
                }
                PhaseChange::Unchanged => {}
                PhaseChange::Stale => {
                    tracing::debug!("Discarding stale read of round {}", round.id);
                    if let Some(prev) = &self.last_snapshot {
                        snapshot.round = prev.round.clone();
                        snapshot.answers = prev.answers.clone();
                        snapshot.votes = prev.votes.clone();
                        snapshot.question_text = prev.question_text.clone();
                    }
                }
            }
        }

        if let Some(me) = self.session.identity.clone() {
            if snapshot.answers.iter().any(|a| a.author_id == me) {
                self.session.my_submitted = true;
            }
            if let Some(vote) = snapshot.votes.iter().find(|v| v.voter_id == me) {
                self.session.my_voted = true;
                self.session.selected_answer_id = Some(vote.answer_id.clone());
            }
        }

        self.set_snapshot(Some(snapshot));
        self.rerender()
    }

    /// Render the last snapshot at the current time
    pub(crate) fn rerender(&mut self) -> Vec<AutoAction> {
        let Some(snapshot) = self.last_snapshot() else {
            return Vec::new();
        };
        let derived = derive(
            snapshot,
            &self.session,
            self.clock.now(),
            self.config.host_grace_chrono(),
        );
        self.view.render(&derived.view);
        derived.actions
    }

    /// Re-read everything and act on what is due. Reads again after acting,
    /// a bounded number of times.
    pub async fn refresh(&mut self) -> ClientResult<()> {
        for _ in 0..MAX_RECONCILE_PASSES {
            let Some(snapshot) = self.load_snapshot().await? else {
                return Ok(());
            };

            if snapshot.room.status == RoomStatus::Archived {
                tracing::info!("Room {} was archived", snapshot.room.code);
                self.detach_room();
                self.view
                    .notify(Notice::Alert("The game has ended".to_string()));
                self.navigate(Step::Connect);
                return Ok(());
            }

            let actions = self.apply_snapshot(snapshot).await;
            if !self.run_auto_actions(actions).await {
                break;
            }
        }
        Ok(())
    }

    /// Timer-driven refresh; errors are only logged
    pub async fn reconcile(&mut self) {
        if self.session.room.is_some() {
            self.refresh_quietly().await;
        }
    }

    /// Countdown tick: re-render and run anything whose deadline just passed
    pub async fn tick(&mut self) {
        let actions = self.rerender();
        if !actions.is_empty() && self.run_auto_actions(actions).await {
            self.refresh_quietly().await;
        }
    }

    /// Returns whether any action ran
    async fn run_auto_actions(&mut self, actions: Vec<AutoAction>) -> bool {
        let Some(round_id) = self.session.round_id().cloned() else {
            return false;
        };
        let now = self.clock.now();
        let retry = self.config.auto_retry_chrono();

        let mut acted = false;
        for action in actions {
            if !self.session.try_auto_attempt(&round_id, action, now, retry) {
                continue;
            }
            tracing::debug!("Running {:?} for round {}", action, round_id);
            match self.run_auto_action(action).await {
                Ok(()) => acted = true,
                Err(e) => tracing::warn!("Automatic {:?} failed: {}", action, e),
            }
        }
        acted
    }

    async fn run_auto_action(&mut self, action: AutoAction) -> ClientResult<()> {
        match action {
            AutoAction::SubmitPendingAnswer => {
                let draft = self.session.draft_answer.clone();
                self.submit_answer_inner(&draft).await.map(|_| ())
            }
            AutoAction::CastPendingVote => self.cast_vote_inner().await.map(|_| ()),
            AutoAction::StartVoting => self.start_voting_inner().await.map(|_| ()),
            AutoAction::Finalize => self.finalize_inner().await.map(|_| ()),
            AutoAction::ComposeFallback => self.compose_fallback_inner().await.map(|_| ()),
        }
    }

    fn is_current_room(&self, room_id: &str) -> bool {
        self.session.room_id().is_some_and(|id| id == room_id)
    }

    fn is_current_round(&self, round_id: &str) -> bool {
        self.session.round_id().is_some_and(|id| id == round_id)
    }

    /// One recompute pass for a batch of realtime events
    pub async fn handle_events(&mut self, batch: Vec<RealtimeEvent>) {
        let now = self.clock.now();
        let mut needs_refresh = false;
        let mut members_changed = false;

        for event in batch {
            match event {
                RealtimeEvent::MembershipChanged {
                    change,
                    room_id,
                    row,
                } if self.is_current_room(&room_id) => {
                    self.session.apply_member_change(change, &row, now);
                    members_changed = true;
                    // Joins and removals change who must act; re-read rather than guess
                    needs_refresh |= change != RowChange::Update;
                }
                RealtimeEvent::RoomChanged { room_id, .. }
                | RealtimeEvent::RoundChanged { room_id, .. }
                    if self.is_current_room(&room_id) =>
                {
                    needs_refresh = true;
                }
                RealtimeEvent::AnswerInserted { round_id, .. }
                | RealtimeEvent::VoteInserted { round_id, .. }
                    if self.is_current_round(&round_id) =>
                {
                    needs_refresh = true;
                }
                RealtimeEvent::Broadcast { room_id, hint } if self.is_current_room(&room_id) => {
                    if matches!(
                        hint,
                        BroadcastHint::RoundStarting | BroadcastHint::RoundStarted { .. }
                    ) {
                        self.session.auto_jump_to_round = true;
                    }
                    needs_refresh = true;
                }
                other => tracing::debug!("Ignoring event outside current room: {:?}", other),
            }
        }

        if needs_refresh {
            self.refresh_quietly().await;
        } else if members_changed {
            let members = self.session.member_list();
            if let Some(snapshot) = self.last_snapshot.as_mut() {
                snapshot.members = members;
            }
            self.tick().await;
        }
    }

    /// Handle whatever realtime events are already queued. Returns how many.
    pub async fn process_pending_events(&mut self) -> usize {
        let mut batch = Vec::new();
        self.subs.drain_ready(&mut batch);
        let count = batch.len();
        if count > 0 {
            self.handle_events(batch).await;
        }
        count
    }
}
