use super::*;
use crate::protocol::BroadcastHint;

impl GameClient {
    /// Store new lobby settings (host only). Values are clamped first.
    pub async fn save_settings(&mut self, settings: RoomSettings) -> ClientResult<RoomSettings> {
        self.require_host("change settings")?;
        let settings = self.save_settings_inner(settings).await?;
        self.refresh_quietly().await;
        Ok(settings)
    }

    async fn save_settings_inner(&mut self, settings: RoomSettings) -> ClientResult<RoomSettings> {
        let room_id = self.require_room()?;
        let settings = settings.clamped();
        self.backend
            .update_room(
                &room_id,
                RoomPatch {
                    settings: Some(settings),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!("Saved settings for room {}: {:?}", room_id, settings);
        Ok(settings)
    }

    /// Leave the lobby: optionally save settings, mark the room in progress
    /// and start the first round.
    pub async fn start_game(&mut self, settings: Option<RoomSettings>) -> ClientResult<Round> {
        self.require_host("start the game")?;
        let room_id = self.require_room()?;

        if let Some(settings) = settings {
            self.save_settings_inner(settings).await?;
        }
        self.backend
            .update_room(
                &room_id,
                RoomPatch {
                    status: Some(RoomStatus::InProgress),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!("Game started in room {}", room_id);

        self.session.auto_jump_to_round = true;
        self.navigate(Step::Round);
        let round = self.start_round_inner().await?;
        self.note_activity();
        self.refresh_quietly().await;
        Ok(round)
    }

    /// Host action from results (or an empty room in progress)
    pub async fn start_round(&mut self) -> ClientResult<Round> {
        self.require_host("start rounds")?;
        let round = self.start_round_inner().await?;
        self.note_activity();
        self.refresh_quietly().await;
        Ok(round)
    }

    pub(crate) async fn start_round_inner(&mut self) -> ClientResult<Round> {
        let room_id = self.require_room()?;
        let backend = self.backend.clone();

        let (room, members, latest) = futures::join!(
            backend.get_room(&room_id),
            backend.list_members(&room_id),
            backend.latest_round(&room_id)
        );
        let (room, members, latest) = (room?, members?, latest?);

        if winner(&members, room.settings.target_score).is_some() {
            return Err(ClientError::GameOver);
        }
        if latest.is_some_and(|r| r.phase != RoundPhase::Results) {
            return Err(ClientError::RoundInProgress);
        }

        self.subs
            .announce(&room_id, BroadcastHint::RoundStarting)
            .await;

        let now = self.clock.now();
        let time_limit = chrono::Duration::seconds(i64::from(room.settings.question_seconds));

        let new_round = if room.settings.question_source == QuestionSource::Players
            && !members.is_empty()
        {
            // Authors rotate through the room in join order
            let completed = backend.count_rounds(&room_id).await?;
            let author = &members[(completed % members.len() as u64) as usize];
            tracing::info!("{} composes the next question", author.nickname);

            NewRound {
                room_id: room_id.clone(),
                phase: RoundPhase::Composing,
                question_source: QuestionSource::Players,
                question_id: None,
                author_id: Some(author.player_id.clone()),
                compose_deadline: Some(now + time_limit),
                answer_deadline: None,
            }
        } else {
            let question = backend.pick_question().await?.ok_or(ClientError::NoQuestions)?;
            self.session
                .questions
                .insert(question.id.clone(), question.text);

            NewRound {
                room_id: room_id.clone(),
                phase: RoundPhase::Answering,
                question_source: QuestionSource::Preset,
                question_id: Some(question.id),
                author_id: None,
                compose_deadline: None,
                answer_deadline: Some(now + time_limit),
            }
        };

        let round = backend.insert_round(new_round).await?;
        tracing::info!("Round {} started in {}", round.id, round.phase);

        self.subs
            .announce(
                &room_id,
                BroadcastHint::RoundStarted {
                    round_id: round.id.clone(),
                },
            )
            .await;
        Ok(round)
    }

    /// The composing author supplies the question and opens answering
    pub async fn submit_custom_question(&mut self, text: &str) -> ClientResult<Transition> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::EmptyQuestion);
        }
        let me = self.require_identity()?;
        let round = self.current_round()?;
        if round.phase != RoundPhase::Composing {
            return Err(ClientError::WrongPhase(round.phase));
        }
        if round.author_id.as_deref() != Some(me.as_str()) {
            return Err(ClientError::NotAuthor);
        }

        let seconds = self.room_settings().question_seconds;
        let patch = RoundPatch {
            question_text: Some(text.to_string()),
            question_source: Some(QuestionSource::Players),
            answer_deadline: Some(
                self.clock.now() + chrono::Duration::seconds(i64::from(seconds)),
            ),
            ..RoundPatch::to_phase(RoundPhase::Answering)
        };
        let transition = self
            .advance(&round.id, RoundPhase::Composing, patch)
            .await?;

        self.note_activity();
        self.refresh_quietly().await;
        Ok(transition)
    }

    /// Host fallback when the author let the compose deadline pass
    pub(crate) async fn compose_fallback_inner(&mut self) -> ClientResult<Transition> {
        self.require_host("replace the question")?;
        let round = self.current_round()?;
        if round.phase != RoundPhase::Composing {
            return Ok(Transition::AlreadyAdvanced);
        }

        let question = self
            .backend
            .pick_question()
            .await?
            .ok_or(ClientError::NoQuestions)?;
        tracing::info!("No question composed in round {}, using a preset", round.id);
        self.session
            .questions
            .insert(question.id.clone(), question.text);

        let seconds = self.room_settings().question_seconds;
        let patch = RoundPatch {
            question_id: Some(question.id),
            question_source: Some(QuestionSource::Preset),
            answer_deadline: Some(
                self.clock.now() + chrono::Duration::seconds(i64::from(seconds)),
            ),
            ..RoundPatch::to_phase(RoundPhase::Answering)
        };
        self.advance(&round.id, RoundPhase::Composing, patch).await
    }

    /// Guarded phase write; zero rows means another client got there first
    pub(crate) async fn advance(
        &self,
        round_id: &str,
        expected: RoundPhase,
        patch: RoundPatch,
    ) -> ClientResult<Transition> {
        let to = patch.phase;
        if self.backend.advance_round(round_id, expected, patch).await? {
            tracing::info!("Round {} {} -> {}", round_id, expected, to);
            Ok(Transition::Applied)
        } else {
            tracing::debug!("Round {} already left {}", round_id, expected);
            Ok(Transition::AlreadyAdvanced)
        }
    }

    /// Archive the room and leave it
    pub async fn end_game(&mut self) -> ClientResult<()> {
        self.require_host("end the game")?;
        let room_id = self.require_room()?;

        self.backend
            .update_room(
                &room_id,
                RoomPatch {
                    status: Some(RoomStatus::Archived),
                    archived: Some(true),
                    archived_at: Some(self.clock.now()),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!("Room {} archived", room_id);

        self.leave_room().await;
        Ok(())
    }

    /// Zero all scores and start over in the same room
    pub async fn start_new_game(&mut self) -> ClientResult<Round> {
        self.require_host("start a new game")?;
        let room_id = self.require_room()?;

        self.backend.reset_scores(&room_id).await?;
        self.backend
            .update_room(
                &room_id,
                RoomPatch {
                    status: Some(RoomStatus::InProgress),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!("New game in room {}", room_id);

        let round = self.start_round_inner().await?;
        self.note_activity();
        self.refresh_quietly().await;
        Ok(round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::view::RecordingView;

    async fn lobby(
        source: QuestionSource,
        guests: &[&str],
    ) -> (Arc<MemoryBackend>, GameClient, Vec<GameClient>) {
        let backend = Arc::new(MemoryBackend::with_questions(["Q1", "Q2"]));
        let make = |name: &str| {
            let mut c = GameClient::new(
                backend.clone(),
                Some(backend.clone()),
                Box::new(RecordingView::new()),
                ClientConfig::default(),
            );
            c.set_nickname(name).unwrap();
            c
        };

        let mut host = make("Host");
        let room = host
            .create_room(Some(RoomSettings {
                question_source: source,
                ..RoomSettings::default()
            }))
            .await
            .unwrap();

        let mut others = Vec::new();
        for name in guests {
            let mut guest = make(name);
            guest.join_by_code(&room.code).await.unwrap();
            others.push(guest);
        }
        (backend, host, others)
    }

    #[tokio::test]
    async fn test_non_host_cannot_start() {
        let (_, _, mut guests) = lobby(QuestionSource::Preset, &["Bob"]).await;
        let result = guests[0].start_game(None).await;
        assert!(matches!(result, Err(ClientError::NotHost(_))));
    }

    #[tokio::test]
    async fn test_start_game_preset_round() {
        let (backend, mut host, _) = lobby(QuestionSource::Preset, &["Bob"]).await;

        let round = host.start_game(None).await.unwrap();
        assert_eq!(round.phase, RoundPhase::Answering);
        assert!(round.answer_deadline.is_some());

        let snapshot = host.last_snapshot().unwrap();
        assert_eq!(snapshot.room.status, RoomStatus::InProgress);
        assert!(snapshot.question_text.is_some());
        let room_id = snapshot.room.id.clone();

        // A second round cannot start while this one runs
        assert!(matches!(
            host.start_round().await,
            Err(ClientError::RoundInProgress)
        ));
        assert_eq!(backend.count_rounds(&room_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_players_mode_rotates_authors() {
        let (_, mut host, _) = lobby(QuestionSource::Players, &["Bob"]).await;
        let host_id = host.session().identity.clone().unwrap();

        let round = host.start_game(None).await.unwrap();
        assert_eq!(round.phase, RoundPhase::Composing);
        assert_eq!(round.author_id.as_deref(), Some(host_id.as_str()));
        assert!(round.compose_deadline.is_some());

        let view = host.current_view().unwrap();
        assert!(view.compose.unwrap().is_author);
    }

    #[tokio::test]
    async fn test_custom_question_opens_answering() {
        let (_, mut host, mut guests) = lobby(QuestionSource::Players, &["Bob"]).await;
        host.start_game(None).await.unwrap();

        guests[0].refresh().await.unwrap();
        assert!(matches!(
            guests[0].submit_custom_question("Mine?").await,
            Err(ClientError::NotAuthor)
        ));
        assert!(matches!(
            host.submit_custom_question("  ").await,
            Err(ClientError::EmptyQuestion)
        ));

        let transition = host.submit_custom_question("Why is the sky?").await.unwrap();
        assert_eq!(transition, Transition::Applied);

        let snapshot = host.last_snapshot().unwrap();
        let round = snapshot.round.as_ref().unwrap();
        assert_eq!(round.phase, RoundPhase::Answering);
        assert_eq!(snapshot.question_text.as_deref(), Some("Why is the sky?"));
    }

    #[tokio::test]
    async fn test_save_settings_clamps() {
        let (backend, mut host, _) = lobby(QuestionSource::Preset, &[]).await;

        let saved = host
            .save_settings(RoomSettings {
                target_score: 500,
                question_seconds: 0,
                vote_seconds: 20,
                question_source: QuestionSource::Players,
            })
            .await
            .unwrap();
        assert_eq!(saved.target_score, 99);
        assert_eq!(saved.question_seconds, 1);

        let room_id = host.session().room_id().cloned().unwrap();
        let room = backend.get_room(&room_id).await.unwrap();
        assert_eq!(room.settings, saved);
    }

    #[tokio::test]
    async fn test_end_game_archives_and_leaves() {
        let (backend, mut host, mut guests) = lobby(QuestionSource::Preset, &["Bob"]).await;
        let room_id = host.session().room_id().cloned().unwrap();

        host.end_game().await.unwrap();
        let room = backend.get_room(&room_id).await.unwrap();
        assert_eq!(room.status, RoomStatus::Archived);
        assert!(room.archived);
        assert!(room.archived_at.is_some());
        assert!(host.session().room.is_none());

        // Others notice on their next refresh
        guests[0].refresh().await.unwrap();
        assert!(guests[0].session().room.is_none());
        assert_eq!(guests[0].step(), Some(Step::Connect));
    }
}
