mod derive;
mod game;
mod player;
mod round;
mod score;
mod submission;
mod vote;

pub use derive::{derive, is_host, AutoAction, Derived, Snapshot};
pub use player::{generate_room_code, normalize_room_code, normalize_room_lookup, RoomLookup};
pub use score::{sort_players, winner};
pub use vote::answer_order;

use crate::backend::{Backend, BackendError, Realtime};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::prefs::PrefsStore;
use crate::realtime::SubscriptionManager;
use crate::session::ClientSession;
use crate::types::*;
use crate::view::{RoomView, Step, ViewSink};
use std::sync::Arc;
use std::time::Duration;

/// Result of an answer submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Submitted,
    /// An answer for this round was already stored
    AlreadySubmitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Voted,
    AlreadyVoted,
}

/// Result of a guarded phase change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// Someone else moved the round on first
    AlreadyAdvanced,
}

/// Unique violations, and stores that only report them in the message
pub(crate) fn is_duplicate(err: &BackendError) -> bool {
    match err {
        BackendError::UniqueViolation(_) => true,
        BackendError::Rejected { code, message } => {
            code == "23505" || message.to_lowercase().contains("duplicate")
        }
        _ => false,
    }
}

/// One player's client: session, subscriptions and the round phase engine
pub struct GameClient {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) subs: SubscriptionManager,
    pub(crate) session: ClientSession,
    pub(crate) view: Box<dyn ViewSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: ClientConfig,
    pub(crate) prefs: PrefsStore,
    last_snapshot: Option<Snapshot>,
    step: Option<Step>,
    burst_remaining: u32,
}

impl GameClient {
    pub fn new(
        backend: Arc<dyn Backend>,
        realtime: Option<Arc<dyn Realtime>>,
        view: Box<dyn ViewSink>,
        config: ClientConfig,
    ) -> Self {
        let prefs = PrefsStore::open(config.prefs_path.clone());
        let session = ClientSession::new(prefs.prefs.nickname.clone().unwrap_or_default());

        Self {
            backend,
            subs: SubscriptionManager::new(realtime),
            session,
            view,
            clock: Arc::new(SystemClock),
            config,
            prefs,
            last_snapshot: None,
            step: None,
            burst_remaining: 0,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ClientSession {
        &mut self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn step(&self) -> Option<Step> {
        self.step
    }

    /// View as of the last refresh, at the current time
    pub fn current_view(&self) -> Option<RoomView> {
        self.last_snapshot.as_ref().map(|snapshot| {
            derive(
                snapshot,
                &self.session,
                self.clock.now(),
                self.config.host_grace_chrono(),
            )
            .view
        })
    }

    pub fn is_host(&self) -> bool {
        match &self.last_snapshot {
            Some(snapshot) => is_host(snapshot, &self.session),
            None => self.session.host_hint,
        }
    }

    /// Show `step` unless it is already showing
    pub(crate) fn navigate(&mut self, step: Step) {
        if self.step != Some(step) {
            self.step = Some(step);
            self.view.navigate(step);
        }
    }

    /// Restart the burst of quick refreshes that follows a local action
    pub fn note_activity(&mut self) {
        self.burst_remaining = self.config.burst_refreshes;
    }

    /// Delay before the next reconciliation refresh
    pub fn next_reconcile_delay(&mut self) -> Duration {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            Duration::from_secs(1)
        } else {
            self.config.reconcile_interval
        }
    }

    pub(crate) fn set_snapshot(&mut self, snapshot: Option<Snapshot>) {
        self.last_snapshot = snapshot;
    }

    pub(crate) fn require_identity(&self) -> ClientResult<PlayerId> {
        self.session
            .identity
            .clone()
            .ok_or(ClientError::NotInRoom)
    }

    pub(crate) fn require_room(&self) -> ClientResult<RoomId> {
        self.session.room_id().cloned().ok_or(ClientError::NotInRoom)
    }

    pub(crate) fn require_host(&self, action: &'static str) -> ClientResult<()> {
        if self.is_host() {
            Ok(())
        } else {
            Err(ClientError::NotHost(action))
        }
    }

    /// The round as last observed
    pub(crate) fn current_round(&self) -> ClientResult<Round> {
        self.last_snapshot
            .as_ref()
            .and_then(|s| s.round.clone())
            .ok_or(ClientError::NoRound)
    }

    pub(crate) fn room_settings(&self) -> RoomSettings {
        self.last_snapshot
            .as_ref()
            .map_or(self.config.default_settings, |s| s.room.settings)
    }

    /// Refresh after an explicit action; failures wait for the next cycle
    pub(crate) async fn refresh_quietly(&mut self) {
        if let Err(e) = self.refresh().await {
            tracing::warn!("Refresh failed: {}", e);
        }
    }
}
