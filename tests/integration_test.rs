use chrono::Utc;
use quizroom::backend::{LookupShape, MemoryBackend};
use quizroom::clock::ManualClock;
use quizroom::config::ClientConfig;
use quizroom::error::ClientError;
use quizroom::state::{GameClient, Submission, Transition, VoteOutcome};
use quizroom::types::{QuestionSource, RoomSettings, RoundPhase};
use quizroom::view::{Notice, RecordingView, Step};
use std::sync::Arc;

fn client(backend: &Arc<MemoryBackend>) -> (GameClient, RecordingView) {
    let recorder = RecordingView::new();
    let client = GameClient::new(
        backend.clone(),
        Some(backend.clone()),
        Box::new(recorder.clone()),
        ClientConfig::default(),
    );
    (client, recorder)
}

fn clocked_client(backend: &Arc<MemoryBackend>, clock: &ManualClock) -> (GameClient, RecordingView) {
    let (client, recorder) = client(backend);
    (client.with_clock(Arc::new(clock.clone())), recorder)
}

fn settings(target_score: u32, source: QuestionSource) -> RoomSettings {
    RoomSettings {
        target_score,
        question_seconds: 30,
        vote_seconds: 20,
        question_source: source,
    }
}

fn identity(client: &GameClient) -> String {
    client.session().identity.clone().unwrap()
}

async fn host_room(host: &mut GameClient) -> String {
    host.set_nickname("Host").unwrap();
    host.create_room(None).await.unwrap().code
}

async fn join(player: &mut GameClient, nickname: &str, code: &str) {
    player.set_nickname(nickname).unwrap();
    player.join_by_code(code).await.unwrap();
}

/// Everyone answers, players vote for the host, the host votes for the first
/// player. The host's own refreshes drive voting and finalization.
async fn play_round(backend: &MemoryBackend, host: &mut GameClient, players: &mut [GameClient]) {
    let round_id = host.session().round_id().cloned().unwrap();

    for (i, player) in players.iter_mut().enumerate() {
        player.refresh().await.unwrap();
        let outcome = player.submit_answer(&format!("answer {}", i)).await.unwrap();
        assert_eq!(outcome, Submission::Submitted);
    }
    host.submit_answer("host answer").await.unwrap();
    assert_eq!(
        backend.round(&round_id).await.unwrap().phase,
        RoundPhase::Voting,
        "host should open voting once every active player answered"
    );

    let answers = backend.answers_for(&round_id).await;
    let answer_by = |author: &str| {
        answers
            .iter()
            .find(|a| a.author_id == author)
            .map(|a| a.id.clone())
            .unwrap()
    };
    let host_answer = answer_by(&identity(host));
    let first_player_answer = answer_by(&identity(&players[0]));

    for player in players.iter_mut() {
        player.refresh().await.unwrap();
        player.select_answer(&host_answer).unwrap();
        assert_eq!(player.cast_vote().await.unwrap(), VoteOutcome::Voted);
    }
    assert!(matches!(
        host.select_answer(&host_answer),
        Err(ClientError::SelfVote)
    ));
    host.select_answer(&first_player_answer).unwrap();
    host.cast_vote().await.unwrap();

    let round = backend.round(&round_id).await.unwrap();
    assert_eq!(round.phase, RoundPhase::Results);
    assert!(round.finalized_at.is_some());
}

/// Within one round, rendered phases never step backwards
fn assert_monotonic(recorder: &RecordingView) {
    recorder.with(|r| {
        for pair in r.views.windows(2) {
            if pair[0].round_id.is_some() && pair[0].round_id == pair[1].round_id {
                assert!(
                    pair[0].phase <= pair[1].phase,
                    "phase went from {:?} to {:?}",
                    pair[0].phase,
                    pair[1].phase
                );
            }
        }
    });
}

/// End-to-end game: three players, target score 3
#[tokio::test]
async fn test_full_game_flow() {
    let backend = Arc::new(MemoryBackend::with_questions(["Q1", "Q2", "Q3"]));
    let (mut host, host_view) = client(&backend);
    let code = host_room(&mut host).await;

    let (mut alice, alice_view) = client(&backend);
    let (mut bob, _) = client(&backend);
    join(&mut alice, "Alice", &code).await;
    join(&mut bob, "Bob", &code).await;
    assert_eq!(alice_view.last_step(), Some(Step::Lobby));

    host.start_game(Some(settings(3, QuestionSource::Preset)))
        .await
        .unwrap();
    let room_id = host.session().room_id().cloned().unwrap();
    assert_eq!(backend.members(&room_id).await.len(), 3);

    let mut players = vec![alice, bob];

    // Round 1: host 2 points, Alice 1
    play_round(&backend, &mut host, &mut players).await;
    let view = host.current_view().unwrap();
    assert_eq!(view.players[0].nickname, "Host");
    assert_eq!(view.players[0].score, 2);
    assert_eq!(view.players[1].nickname, "Alice");
    assert_eq!(view.players[1].score, 1);
    assert!(view.controls.next_round);
    assert!(view.winner.is_none());
    assert!(view.choices.iter().all(|c| c.votes.is_some()));

    // Round 2: host reaches 4
    host.start_round().await.unwrap();
    play_round(&backend, &mut host, &mut players).await;

    let view = host.current_view().unwrap();
    let winner = view.winner.unwrap();
    assert_eq!(winner.nickname, "Host");
    assert_eq!(winner.score, 4);
    assert!(!view.controls.next_round);
    assert!(view.controls.end_game);
    assert!(view.controls.new_game);
    assert!(matches!(host.start_round().await, Err(ClientError::GameOver)));

    host.end_game().await.unwrap();
    assert_eq!(host_view.last_step(), Some(Step::Connect));

    for player in players.iter_mut() {
        player.refresh().await.unwrap();
        assert!(player.session().room.is_none());
    }
    assert_eq!(alice_view.last_step(), Some(Step::Connect));
    assert!(alice_view
        .notices()
        .contains(&Notice::Alert("The game has ended".to_string())));

    assert_monotonic(&host_view);
    assert_monotonic(&alice_view);
}

#[tokio::test]
async fn test_new_game_resets_scores() {
    let backend = Arc::new(MemoryBackend::with_questions(["Q1"]));
    let (mut host, _) = client(&backend);
    let code = host_room(&mut host).await;
    let (mut alice, _) = client(&backend);
    let (mut bob, _) = client(&backend);
    join(&mut alice, "Alice", &code).await;
    join(&mut bob, "Bob", &code).await;

    host.start_game(Some(settings(1, QuestionSource::Preset)))
        .await
        .unwrap();
    let mut players = vec![alice, bob];
    play_round(&backend, &mut host, &mut players).await;
    assert!(host.current_view().unwrap().winner.is_some());

    let round = host.start_new_game().await.unwrap();
    assert_eq!(round.phase, RoundPhase::Answering);

    let view = host.current_view().unwrap();
    assert!(view.winner.is_none());
    assert!(view.players.iter().all(|p| p.score == 0));
    assert_eq!(view.round_id, Some(round.id));
}

/// Two tabs with the same identity both report success and store one row
#[tokio::test]
async fn test_duplicate_answer_and_vote_from_second_tab() {
    let backend = Arc::new(MemoryBackend::with_questions(["Q1"]));
    let (mut host, _) = client(&backend);
    let code = host_room(&mut host).await;
    let (mut alice, _) = client(&backend);
    let (mut bob, _) = client(&backend);
    join(&mut alice, "Alice", &code).await;
    join(&mut bob, "Bob", &code).await;
    host.start_game(None).await.unwrap();

    let (mut alice_tab, _) = client(&backend);
    alice_tab.session_mut().identity = Some(identity(&alice));
    join(&mut alice_tab, "Alice", &code).await;
    alice.refresh().await.unwrap();

    let round_id = host.session().round_id().cloned().unwrap();
    assert_eq!(
        alice.submit_answer("first").await.unwrap(),
        Submission::Submitted
    );
    assert_eq!(
        alice_tab.submit_answer("second").await.unwrap(),
        Submission::AlreadySubmitted
    );
    let stored = backend.answers_for(&round_id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].text, "first");

    bob.refresh().await.unwrap();
    bob.submit_answer("bob").await.unwrap();
    host.submit_answer("host").await.unwrap();

    alice.refresh().await.unwrap();
    alice_tab.refresh().await.unwrap();
    let bob_answer = backend
        .answers_for(&round_id)
        .await
        .into_iter()
        .find(|a| a.author_id == identity(&bob))
        .unwrap();

    alice.select_answer(&bob_answer.id).unwrap();
    alice_tab.select_answer(&bob_answer.id).unwrap();
    assert_eq!(alice.cast_vote().await.unwrap(), VoteOutcome::Voted);
    assert_eq!(
        alice_tab.cast_vote().await.unwrap(),
        VoteOutcome::AlreadyVoted
    );
    assert_eq!(backend.votes_for(&round_id).await.len(), 1);
}

#[tokio::test]
async fn test_resubmit_after_lost_local_state() {
    let backend = Arc::new(MemoryBackend::with_questions(["Q1"]));
    let (mut host, _) = client(&backend);
    let code = host_room(&mut host).await;
    let (mut player, _) = client(&backend);
    join(&mut player, "Alice", &code).await;
    host.start_game(None).await.unwrap();
    let round_id = host.session().round_id().cloned().unwrap();

    player.refresh().await.unwrap();
    player.submit_answer("same").await.unwrap();

    player.session_mut().reset_round_flags();
    assert_eq!(
        player.submit_answer("same").await.unwrap(),
        Submission::AlreadySubmitted
    );
    assert!(player.session().my_submitted);
    assert_eq!(backend.answers_for(&round_id).await.len(), 1);
}

#[tokio::test]
async fn test_self_vote_allowed_with_two_answers() {
    let backend = Arc::new(MemoryBackend::with_questions(["Q1"]));
    let (mut host, _) = client(&backend);
    let code = host_room(&mut host).await;
    let (mut player, player_view) = client(&backend);
    join(&mut player, "Alice", &code).await;
    host.start_game(None).await.unwrap();

    player.refresh().await.unwrap();
    player.submit_answer("mine").await.unwrap();
    host.submit_answer("host").await.unwrap();

    player.refresh().await.unwrap();
    let round_id = host.session().round_id().cloned().unwrap();
    let mine = backend
        .answers_for(&round_id)
        .await
        .into_iter()
        .find(|a| a.author_id == identity(&player))
        .unwrap();

    let view = player_view.last_view().unwrap();
    assert_eq!(view.phase, Some(RoundPhase::Voting));
    assert!(view.choices.iter().all(|c| c.selectable));

    player.select_answer(&mine.id).unwrap();
    assert_eq!(player.cast_vote().await.unwrap(), VoteOutcome::Voted);
}

/// Only one of two racing transitions is applied
#[tokio::test]
async fn test_concurrent_start_voting_applies_once() {
    let backend = Arc::new(MemoryBackend::with_questions(["Q1"]));
    let (mut host, _) = client(&backend);
    let code = host_room(&mut host).await;
    let (mut player, _) = client(&backend);
    join(&mut player, "Alice", &code).await;
    host.start_game(None).await.unwrap();

    let (mut host_tab, _) = client(&backend);
    host_tab.session_mut().identity = Some(identity(&host));
    join(&mut host_tab, "Host", &code).await;
    assert!(host_tab.is_host());

    let (first, second) = tokio::join!(host.start_voting(), host_tab.start_voting());
    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|t| *t == Transition::AlreadyAdvanced);
    assert_eq!(
        outcomes,
        vec![Transition::Applied, Transition::AlreadyAdvanced]
    );

    let round_id = host.session().round_id().cloned().unwrap();
    let round = backend.round(&round_id).await.unwrap();
    assert_eq!(round.phase, RoundPhase::Voting);
    assert!(round.vote_deadline.is_some());

    // Non-hosts can't drive transitions at all
    player.refresh().await.unwrap();
    assert!(matches!(
        player.finalize().await,
        Err(ClientError::NotHost(_))
    ));
}

#[tokio::test]
async fn test_deadline_submits_draft_and_opens_voting() {
    let backend = Arc::new(MemoryBackend::with_questions(["Q1"]));
    let clock = ManualClock::new(Utc::now());
    let (mut host, _) = clocked_client(&backend, &clock);
    let code = host_room(&mut host).await;
    let (mut player, player_view) = clocked_client(&backend, &clock);
    join(&mut player, "Alice", &code).await;
    host.start_game(Some(settings(10, QuestionSource::Preset)))
        .await
        .unwrap();

    player.refresh().await.unwrap();
    player.draft_answer("half an idea");
    let countdown = player_view.last_view().unwrap().countdown.unwrap();
    assert_eq!(countdown.phase, RoundPhase::Answering);
    assert_eq!(countdown.seconds_left, 30);

    // Nothing is due before the deadline
    clock.advance(chrono::Duration::seconds(29));
    player.tick().await;
    host.tick().await;
    let round_id = host.session().round_id().cloned().unwrap();
    assert!(backend.answers_for(&round_id).await.is_empty());

    // The player's own deadline passes first; the host waits out the grace period
    clock.advance(chrono::Duration::milliseconds(1500));
    player.tick().await;
    let answers = backend.answers_for(&round_id).await;
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].text, "half an idea");
    assert!(player.session().my_submitted);

    host.tick().await;
    assert_eq!(
        backend.round(&round_id).await.unwrap().phase,
        RoundPhase::Answering
    );

    clock.advance(chrono::Duration::seconds(1));
    host.tick().await;
    let round = backend.round(&round_id).await.unwrap();
    assert_eq!(round.phase, RoundPhase::Voting);
    assert_eq!(
        round.vote_deadline,
        Some(clock_now(&clock) + chrono::Duration::seconds(20))
    );
}

#[tokio::test]
async fn test_vote_deadline_casts_selection_and_finalizes() {
    let backend = Arc::new(MemoryBackend::with_questions(["Q1"]));
    let clock = ManualClock::new(Utc::now());
    let (mut host, host_view) = clocked_client(&backend, &clock);
    let code = host_room(&mut host).await;
    let (mut alice, alice_view) = clocked_client(&backend, &clock);
    let (mut bob, _) = clocked_client(&backend, &clock);
    join(&mut alice, "Alice", &code).await;
    join(&mut bob, "Bob", &code).await;
    host.start_game(Some(settings(10, QuestionSource::Preset)))
        .await
        .unwrap();
    let round_id = host.session().round_id().cloned().unwrap();

    for (player, text) in [(&mut alice, "alice"), (&mut bob, "bob")] {
        player.refresh().await.unwrap();
        player.submit_answer(text).await.unwrap();
    }
    host.submit_answer("host").await.unwrap();
    assert_eq!(
        backend.round(&round_id).await.unwrap().phase,
        RoundPhase::Voting
    );

    // Alice picks an answer but never presses vote; Bob does nothing
    alice.refresh().await.unwrap();
    let host_answer = backend
        .answers_for(&round_id)
        .await
        .into_iter()
        .find(|a| a.author_id == identity(&host))
        .unwrap();
    alice.select_answer(&host_answer.id).unwrap();
    let countdown = alice_view.last_view().unwrap().countdown.unwrap();
    assert_eq!(countdown.phase, RoundPhase::Voting);
    assert_eq!(countdown.seconds_left, 20);

    clock.advance(chrono::Duration::seconds(19));
    alice.tick().await;
    host.tick().await;
    assert!(backend.votes_for(&round_id).await.is_empty());

    // Alice's pending choice goes out at the deadline
    clock.advance(chrono::Duration::milliseconds(1500));
    alice.tick().await;
    let votes = backend.votes_for(&round_id).await;
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].answer_id, host_answer.id);
    assert!(alice.session().my_voted);

    // Bob never voted, so the host finalizes only after its grace period
    host.tick().await;
    assert_eq!(
        backend.round(&round_id).await.unwrap().phase,
        RoundPhase::Voting
    );

    clock.advance(chrono::Duration::seconds(1));
    host.tick().await;
    let round = backend.round(&round_id).await.unwrap();
    assert_eq!(round.phase, RoundPhase::Results);
    assert!(round.finalized_at.is_some());

    let view = host_view.last_view().unwrap();
    let host_line = view.players.iter().find(|p| p.nickname == "Host").unwrap();
    assert_eq!(host_line.score, 1);
    assert_monotonic(&host_view);
}

fn clock_now(clock: &ManualClock) -> chrono::DateTime<Utc> {
    use quizroom::clock::Clock;
    clock.now()
}

/// Inactive players are not waited for
#[tokio::test]
async fn test_inactive_player_is_not_a_respondent() {
    let backend = Arc::new(MemoryBackend::with_questions(["Q1"]));
    let (mut host, host_view) = client(&backend);
    let code = host_room(&mut host).await;
    let (mut alice, _) = client(&backend);
    let (mut bob, _) = client(&backend);
    join(&mut alice, "Alice", &code).await;
    join(&mut bob, "Bob", &code).await;
    host.start_game(None).await.unwrap();

    bob.set_active_status(false).await;
    host.process_pending_events().await;
    let view = host_view.last_view().unwrap();
    assert_eq!(view.respondents, 2);
    assert!(!view.players.iter().find(|p| p.nickname == "Bob").unwrap().is_active);

    alice.refresh().await.unwrap();
    alice.submit_answer("alice").await.unwrap();
    host.submit_answer("host").await.unwrap();

    assert_eq!(
        host_view.last_view().unwrap().phase,
        Some(RoundPhase::Voting)
    );
}

#[tokio::test]
async fn test_players_compose_questions() {
    let backend = Arc::new(MemoryBackend::with_questions(["Preset"]));
    let (mut host, host_view) = client(&backend);
    let code = host_room(&mut host).await;
    let (mut player, player_view) = client(&backend);
    join(&mut player, "Alice", &code).await;

    let round = host
        .start_game(Some(settings(10, QuestionSource::Players)))
        .await
        .unwrap();
    assert_eq!(round.phase, RoundPhase::Composing);
    assert_eq!(round.author_id, Some(identity(&host)));

    let compose = host_view.last_view().unwrap().compose.unwrap();
    assert!(compose.is_author);
    assert_eq!(compose.author_nickname, "Host");

    player.refresh().await.unwrap();
    assert!(!player_view.last_view().unwrap().controls.compose);
    assert!(matches!(
        player.submit_custom_question("Mine?").await,
        Err(ClientError::NotAuthor)
    ));

    assert_eq!(
        host.submit_custom_question("  Why is the sky?  ").await.unwrap(),
        Transition::Applied
    );
    player.refresh().await.unwrap();
    let view = player_view.last_view().unwrap();
    assert_eq!(view.phase, Some(RoundPhase::Answering));
    assert_eq!(view.question.as_deref(), Some("Why is the sky?"));
}

#[tokio::test]
async fn test_compose_fallback_after_deadline() {
    let backend = Arc::new(MemoryBackend::with_questions(["Preset"]));
    let clock = ManualClock::new(Utc::now());
    let (mut host, host_view) = clocked_client(&backend, &clock);
    let code = host_room(&mut host).await;
    let (mut player, _) = clocked_client(&backend, &clock);
    join(&mut player, "Alice", &code).await;

    let round = host
        .start_game(Some(settings(10, QuestionSource::Players)))
        .await
        .unwrap();
    assert_eq!(round.phase, RoundPhase::Composing);

    clock.advance(chrono::Duration::seconds(32));
    host.tick().await;

    let stored = backend.round(&round.id).await.unwrap();
    assert_eq!(stored.phase, RoundPhase::Answering);
    assert_eq!(stored.question_source, QuestionSource::Preset);
    assert!(stored.question_id.is_some());
    assert_eq!(
        host_view.last_view().unwrap().question.as_deref(),
        Some("Preset")
    );
}

#[tokio::test]
async fn test_join_by_lookalike_code_with_every_lookup_shape() {
    let backend = Arc::new(MemoryBackend::with_questions(["Q1"]));
    let (mut host, _) = client(&backend);
    let code = host_room(&mut host).await;
    let room_id = host.session().room_id().cloned().unwrap();

    // What a player on a Cyrillic keyboard might type
    let typed: String = code
        .chars()
        .map(|c| match c {
            'A' => 'а',
            'B' => 'в',
            'E' => 'е',
            'K' => 'к',
            'M' => 'м',
            'H' => 'н',
            'P' => 'р',
            'T' => 'т',
            'X' => 'х',
            other => other.to_ascii_lowercase(),
        })
        .collect();

    for shape in [
        LookupShape::Object,
        LookupShape::Array,
        LookupShape::Wrapped,
        LookupShape::Null,
    ] {
        backend.set_lookup_shape(shape).await;
        let (mut player, view) = client(&backend);
        player.set_nickname("Alice").unwrap();
        let room = player
            .join_by_code(&format!("  {} ", typed))
            .await
            .unwrap();
        assert_eq!(room.id, room_id, "lookup shape {:?}", shape);
        assert_eq!(room.code, code);
        assert_eq!(view.last_step(), Some(Step::Lobby));
    }

    let (mut stranger, view) = client(&backend);
    stranger.set_nickname("Eve").unwrap();
    assert!(matches!(
        stranger.join_by_code("9999").await,
        Err(ClientError::RoomNotFound(_))
    ));
    assert_eq!(view.last_step(), Some(Step::Connect));
}

#[tokio::test]
async fn test_push_events_move_players_into_round() {
    let backend = Arc::new(MemoryBackend::with_questions(["Q1"]));
    let (mut host, _) = client(&backend);
    let code = host_room(&mut host).await;
    let (mut player, player_view) = client(&backend);
    join(&mut player, "Alice", &code).await;
    player.process_pending_events().await;

    host.start_game(None).await.unwrap();
    assert!(player.process_pending_events().await > 0);

    assert_eq!(player_view.last_step(), Some(Step::Round));
    let view = player_view.last_view().unwrap();
    assert_eq!(view.phase, Some(RoundPhase::Answering));
    assert_eq!(view.question.as_deref(), Some("Q1"));
    assert!(view.controls.answer);
}

#[tokio::test]
async fn test_subscriptions_follow_room_and_round() {
    let backend = Arc::new(MemoryBackend::with_questions(["Q1"]));
    let (mut host, _) = client(&backend);
    let code = host_room(&mut host).await;
    assert_eq!(backend.open_channels().await, 1);

    let (mut alice, _) = client(&backend);
    let (mut bob, _) = client(&backend);
    join(&mut alice, "Alice", &code).await;
    join(&mut bob, "Bob", &code).await;
    host.start_game(Some(settings(10, QuestionSource::Preset)))
        .await
        .unwrap();
    // Host holds room and round channels, players only the room so far
    assert_eq!(backend.open_channels().await, 4);

    let mut players = vec![alice, bob];
    play_round(&backend, &mut host, &mut players).await;
    assert_eq!(backend.open_channels().await, 6);

    // A new round replaces the old round channel
    host.start_round().await.unwrap();
    assert_eq!(backend.open_channels().await, 6);

    for player in players.iter_mut() {
        player.leave_room().await;
    }
    host.leave_room().await;
    assert_eq!(backend.open_channels().await, 0);
}

#[tokio::test]
async fn test_rejoin_after_leaving_reactivates_membership() {
    let backend = Arc::new(MemoryBackend::with_questions(["Q1"]));
    let (mut host, _) = client(&backend);
    let code = host_room(&mut host).await;
    let room_id = host.session().room_id().cloned().unwrap();

    let (mut player, _) = client(&backend);
    join(&mut player, "Alice", &code).await;
    player.leave_room().await;

    let members = backend.members(&room_id).await;
    let alice = members.iter().find(|m| m.nickname == "Alice").unwrap();
    assert!(!alice.is_active);

    player.join_by_code(&code).await.unwrap();
    let members = backend.members(&room_id).await;
    assert_eq!(members.len(), 2);
    let alice = members.iter().find(|m| m.nickname == "Alice").unwrap();
    assert!(alice.is_active, "rejoining marks the player active again");

    // The host waits for the returning player's answer again
    host.start_game(None).await.unwrap();
    assert_eq!(host.current_view().unwrap().respondents, 2);
}
