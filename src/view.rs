//! What a client shows, and the sink that shows it

use crate::types::*;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Screens of the client, in flow order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Step {
    Nickname = 1,
    Connect = 2,
    Lobby = 3,
    Round = 4,
}

impl Step {
    pub fn from_number(n: u8) -> Option<Step> {
        match n {
            1 => Some(Step::Nickname),
            2 => Some(Step::Connect),
            3 => Some(Step::Lobby),
            4 => Some(Step::Round),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Shown next to the form that caused it
    Inline(String),
    Alert(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerLine {
    pub player_id: PlayerId,
    pub nickname: String,
    pub score: u32,
    pub is_host: bool,
    /// Shown as AFK when false
    pub is_active: bool,
    pub is_me: bool,
    pub answered: bool,
    pub voted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceView {
    pub answer_id: AnswerId,
    pub text: String,
    pub mine: bool,
    pub selectable: bool,
    pub selected: bool,
    /// Only filled in once results are out
    pub votes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposeView {
    pub author_id: Option<PlayerId>,
    pub author_nickname: String,
    pub is_author: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Countdown {
    pub phase: RoundPhase,
    pub seconds_left: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WinnerView {
    pub player_id: PlayerId,
    pub nickname: String,
    pub score: u32,
}

/// Which actions are currently offered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Controls {
    pub save_settings: bool,
    pub start_game: bool,
    pub next_round: bool,
    pub start_voting: bool,
    pub finalize: bool,
    pub end_game: bool,
    pub new_game: bool,
    pub compose: bool,
    pub answer: bool,
    pub vote: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomView {
    pub room_code: String,
    pub status: RoomStatus,
    pub settings: RoomSettings,
    pub is_host: bool,
    pub players: Vec<PlayerLine>,
    pub round_id: Option<RoundId>,
    pub phase: Option<RoundPhase>,
    pub question: Option<String>,
    pub compose: Option<ComposeView>,
    pub answered: usize,
    pub respondents: usize,
    pub voted: usize,
    pub voters: usize,
    pub my_submitted: bool,
    pub my_voted: bool,
    pub choices: Vec<ChoiceView>,
    pub countdown: Option<Countdown>,
    pub winner: Option<WinnerView>,
    pub controls: Controls,
}

/// Output side of a client
pub trait ViewSink: Send + Sync {
    fn render(&mut self, view: &RoomView);
    fn navigate(&mut self, step: Step);
    fn notify(&mut self, notice: Notice);
}

/// Sink that writes everything to the log
#[derive(Debug, Default)]
pub struct LogView {
    label: String,
}

impl LogView {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ViewSink for LogView {
    fn render(&mut self, view: &RoomView) {
        let standings: Vec<String> = view
            .players
            .iter()
            .map(|p| format!("{}={}", p.nickname, p.score))
            .collect();
        tracing::debug!(
            "[{}] room {} phase {:?} answered {}/{} voted {}/{} standings [{}]",
            self.label,
            view.room_code,
            view.phase,
            view.answered,
            view.respondents,
            view.voted,
            view.voters,
            standings.join(", ")
        );
    }

    fn navigate(&mut self, step: Step) {
        tracing::info!("[{}] -> {:?}", self.label, step);
    }

    fn notify(&mut self, notice: Notice) {
        match notice {
            Notice::Inline(msg) => tracing::info!("[{}] {}", self.label, msg),
            Notice::Alert(msg) => tracing::warn!("[{}] {}", self.label, msg),
        }
    }
}

/// Everything a [`RecordingView`] has seen
#[derive(Debug, Default)]
pub struct Recorded {
    pub views: Vec<RoomView>,
    pub steps: Vec<Step>,
    pub notices: Vec<Notice>,
}

impl Recorded {
    pub fn last_view(&self) -> Option<&RoomView> {
        self.views.last()
    }

    pub fn last_step(&self) -> Option<Step> {
        self.steps.last().copied()
    }
}

/// Sink that keeps what it receives, shared with whoever holds a clone
#[derive(Debug, Clone, Default)]
pub struct RecordingView {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the recorded state
    pub fn with<R>(&self, f: impl FnOnce(&Recorded) -> R) -> R {
        match self.inner.lock() {
            Ok(recorded) => f(&recorded),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    pub fn last_view(&self) -> Option<RoomView> {
        self.with(|r| r.last_view().cloned())
    }

    pub fn last_step(&self) -> Option<Step> {
        self.with(|r| r.last_step())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.with(|r| r.notices.clone())
    }

    fn record(&self, f: impl FnOnce(&mut Recorded)) {
        match self.inner.lock() {
            Ok(mut recorded) => f(&mut recorded),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl ViewSink for RecordingView {
    fn render(&mut self, view: &RoomView) {
        self.record(|r| r.views.push(view.clone()));
    }

    fn navigate(&mut self, step: Step) {
        self.record(|r| r.steps.push(step));
    }

    fn notify(&mut self, notice: Notice) {
        self.record(|r| r.notices.push(notice));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_numbers() {
        assert_eq!(Step::from_number(3), Some(Step::Lobby));
        assert_eq!(Step::from_number(9), None);
        assert_eq!(Step::Round as u8, 4);
    }

    #[test]
    fn test_recording_view_is_shared() {
        let recorder = RecordingView::new();
        let mut sink = recorder.clone();

        sink.navigate(Step::Lobby);
        sink.notify(Notice::Alert("boom".to_string()));

        assert_eq!(recorder.last_step(), Some(Step::Lobby));
        assert_eq!(recorder.notices(), vec![Notice::Alert("boom".to_string())]);
    }
}
