use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quizroom::backend::{Backend, MemoryBackend, Realtime, RestBackend, RestConfig};
use quizroom::config::ClientConfig;
use quizroom::protocol::Command;
use quizroom::scheduler::{spawn_client_with, ClientHandle};
use quizroom::state::GameClient;
use quizroom::types::RoundPhase;
use quizroom::view::{LogView, Notice, RoomView, Step, ViewSink};

const PRESET_QUESTIONS: &[&str] = &[
    "What is the worst name for a pet goldfish?",
    "What should never be said at a wedding?",
    "Name a terrible superpower.",
    "What is the real reason the dinosaurs went extinct?",
    "What would you find in a robot's lunchbox?",
    "Invent a new holiday and describe it in three words.",
];

const PUNCHLINES: &[&str] = &[
    "Sir Bubbles the Third",
    "A suspiciously large spoon",
    "Only on Tuesdays",
    "Gravity, mostly",
    "Seven angry pigeons",
    "Nobody knows, not even me",
];

/// Headless player: logs like [`LogView`] and reacts to what it sees by
/// queueing commands on its own client.
struct BotView {
    log: LogView,
    name: String,
    commands: mpsc::UnboundedSender<Command>,
    expected_players: usize,
    in_room: bool,
    answers_given: usize,
    done: HashSet<String>,
}

impl BotView {
    fn new(name: &str, commands: mpsc::UnboundedSender<Command>, expected_players: usize) -> Self {
        Self {
            log: LogView::new(name),
            name: name.to_string(),
            commands,
            expected_players,
            in_room: false,
            answers_given: 0,
            done: HashSet::new(),
        }
    }

    /// Queue `commands` unless `key` was already acted on
    fn once(&mut self, key: String, commands: Vec<Command>) {
        if !self.done.insert(key) {
            return;
        }
        for command in commands {
            if self.commands.send(command).is_err() {
                tracing::warn!("[{}] Failed to queue command, client loop stopped", self.name);
                return;
            }
        }
    }
}

impl ViewSink for BotView {
    fn render(&mut self, view: &RoomView) {
        self.log.render(view);
        let round = view.round_id.clone().unwrap_or_default();
        let controls = view.controls;

        if controls.start_game && view.players.len() >= self.expected_players {
            self.once("start".to_string(), vec![Command::HostStartGame { settings: None }]);
        }
        if controls.compose {
            let text = format!("What would {} never admit?", self.name);
            self.once(
                format!("compose-{}", round),
                vec![Command::SubmitCustomQuestion { text }],
            );
        }
        let answer_key = format!("answer-{}", round);
        if controls.answer && !self.done.contains(&answer_key) {
            let offset = self.name.len() + self.answers_given;
            let text = PUNCHLINES[offset % PUNCHLINES.len()].to_string();
            self.answers_given += 1;
            self.once(
                answer_key,
                vec![
                    Command::DraftAnswer { text: text.clone() },
                    Command::SubmitAnswer { text },
                ],
            );
        }
        if view.phase == Some(RoundPhase::Voting) && !view.my_voted {
            if let Some(choice) = view.choices.iter().find(|c| c.selectable) {
                let answer_id = choice.answer_id.clone();
                self.once(
                    format!("vote-{}", round),
                    vec![Command::SelectAnswer { answer_id }, Command::CastVote],
                );
            }
        }
        if controls.next_round {
            self.once(format!("next-{}", round), vec![Command::HostStartRound]);
        }
        if controls.end_game {
            if let Some(winner) = &view.winner {
                tracing::info!("[{}] {} wins with {}", self.name, winner.nickname, winner.score);
            }
            self.once("end".to_string(), vec![Command::HostEndGame]);
        }
    }

    fn navigate(&mut self, step: Step) {
        self.log.navigate(step);
        match step {
            Step::Lobby | Step::Round => self.in_room = true,
            Step::Connect if self.in_room => {
                self.once("shutdown".to_string(), vec![Command::Shutdown]);
            }
            _ => {}
        }
    }

    fn notify(&mut self, notice: Notice) {
        self.log.notify(notice);
    }
}

type Services = (Arc<dyn Backend>, Option<Arc<dyn Realtime>>);

/// One backend per client for the hosted service, since it keeps the signed-in
/// session; a single shared in-process backend otherwise
fn services(config: &ClientConfig, memory: &Arc<MemoryBackend>) -> Option<Services> {
    match &config.backend_url {
        Some(url) => {
            let rest = RestConfig::new(url.clone(), config.anon_key.clone().unwrap_or_default());
            match RestBackend::new(rest) {
                Ok(backend) => Some((Arc::new(backend), None)),
                Err(e) => {
                    tracing::error!("Failed to create backend client: {}", e);
                    None
                }
            }
        }
        None => Some((memory.clone(), Some(memory.clone()))),
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quizroom=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env();
    let bots: usize = std::env::var("QUIZ_BOTS")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(3);

    tracing::info!("Starting quizroom with {} bots", bots);
    if config.backend_url.is_some() {
        tracing::info!("Using hosted backend, realtime disabled");
    }

    let memory = Arc::new(MemoryBackend::with_questions(PRESET_QUESTIONS.iter().copied()));
    let mut handles: Vec<ClientHandle> = Vec::with_capacity(bots);
    let mut room_code = None;

    for i in 0..bots {
        let name = format!("Bot{}", i + 1);
        let Some((backend, realtime)) = services(&config, &memory) else {
            return;
        };

        // Only the host keeps stored preferences; the others need their own identity
        let mut bot_config = config.clone();
        if i > 0 {
            bot_config.prefs_path = None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let view = BotView::new(&name, tx.clone(), bots);
        let mut client = GameClient::new(backend, realtime, Box::new(view), bot_config);

        match &room_code {
            None => {
                let created = match client.set_nickname(&name) {
                    Ok(()) => client.create_room(None).await,
                    Err(e) => Err(e),
                };
                match created {
                    Ok(room) => {
                        tracing::info!("Room code {}", room.code);
                        room_code = Some(room.code);
                    }
                    Err(e) => {
                        tracing::error!("Failed to create room: {}", e);
                        return;
                    }
                }
            }
            Some(code) => {
                let queued = tx.send(Command::SetNickname { nickname: name }).is_ok()
                    && tx.send(Command::JoinRoom { code: code.clone() }).is_ok();
                if !queued {
                    tracing::warn!("Failed to queue join for bot {}", i + 1);
                }
            }
        }

        handles.push(spawn_client_with(client, tx, rx));
    }

    let senders: Vec<_> = handles.iter().map(ClientHandle::sender).collect();
    let mut all = std::pin::pin!(futures::future::join_all(
        handles.into_iter().map(ClientHandle::join)
    ));

    tokio::select! {
        _ = &mut all => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, leaving the room");
            for sender in &senders {
                if sender.send(Command::Shutdown).is_err() {
                    tracing::warn!("Failed to send shutdown, client loop already stopped");
                }
            }
            all.await;
        }
    }

    tracing::info!("All bots finished");
}
