//! Pure projection from fetched rows plus local flags to what the client shows
//! and which automatic actions are due.

use super::score::{sort_players, winner};
use super::vote::answer_order;
use crate::session::ClientSession;
use crate::types::*;
use crate::view::*;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Rows read in one refresh
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub room: Room,
    /// Join order
    pub members: Vec<RoomPlayer>,
    pub round: Option<Round>,
    pub answers: Vec<Answer>,
    pub votes: Vec<Vote>,
    pub question_text: Option<String>,
}

/// Work the engine does on its own, in the order it should run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AutoAction {
    /// Send the drafted answer once the answering deadline passes
    SubmitPendingAnswer,
    /// Send the selected vote once the voting deadline passes
    CastPendingVote,
    StartVoting,
    Finalize,
    /// Replace a question nobody composed in time with a preset one
    ComposeFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub view: RoomView,
    pub actions: Vec<AutoAction>,
}

/// The one host predicate: own membership row, then room ownership, then the
/// local placeholder set before any membership row has loaded.
pub fn is_host(snapshot: &Snapshot, session: &ClientSession) -> bool {
    let Some(me) = session.identity.as_deref() else {
        return false;
    };
    if let Some(row) = snapshot.members.iter().find(|m| m.player_id == me) {
        return row.is_host;
    }
    snapshot.room.owner_id == me || session.host_hint
}

fn passed(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
    deadline.is_some_and(|d| now >= d + grace)
}

/// Whole seconds left, rounded up
fn seconds_left(deadline: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let ms = (deadline - now).num_milliseconds();
    if ms <= 0 {
        0
    } else {
        (ms + 999) / 1000
    }
}

pub fn derive(
    snapshot: &Snapshot,
    session: &ClientSession,
    now: DateTime<Utc>,
    grace: chrono::Duration,
) -> Derived {
    let me = session.identity.as_deref().unwrap_or_default();
    let host = is_host(snapshot, session);
    let round = snapshot.round.as_ref();
    let phase = round.map(|r| r.phase);

    let answered: HashSet<&str> = snapshot.answers.iter().map(|a| a.author_id.as_str()).collect();
    let voted: HashSet<&str> = snapshot.votes.iter().map(|v| v.voter_id.as_str()).collect();

    // Everyone active must answer; every answer author must vote
    let respondents: Vec<&RoomPlayer> = snapshot.members.iter().filter(|m| m.is_active).collect();
    let all_answered = !respondents.is_empty()
        && respondents
            .iter()
            .all(|m| answered.contains(m.player_id.as_str()));
    let all_voted = answered.iter().all(|author| voted.contains(author));

    let leader = winner(&snapshot.members, snapshot.room.settings.target_score);

    let players = sort_players(&snapshot.members)
        .into_iter()
        .map(|m| PlayerLine {
            player_id: m.player_id.clone(),
            nickname: m.nickname.clone(),
            score: m.score,
            is_host: m.is_host,
            is_active: m.is_active,
            is_me: m.player_id == me,
            answered: answered.contains(m.player_id.as_str()),
            voted: voted.contains(m.player_id.as_str()),
        })
        .collect();

    let choices = match round {
        Some(r) if matches!(r.phase, RoundPhase::Voting | RoundPhase::Results) => {
            let mut tally: HashMap<&str, u32> = HashMap::new();
            for vote in &snapshot.votes {
                *tally.entry(vote.answer_id.as_str()).or_insert(0) += 1;
            }
            let self_vote_allowed = snapshot.answers.len() < SELF_VOTE_MIN_ANSWERS;

            answer_order(&r.id, &snapshot.answers)
                .into_iter()
                .map(|a| {
                    let mine = a.author_id == me;
                    ChoiceView {
                        selectable: r.phase == RoundPhase::Voting
                            && !session.my_voted
                            && (!mine || self_vote_allowed),
                        selected: session.selected_answer_id.as_deref() == Some(a.id.as_str()),
                        votes: (r.phase == RoundPhase::Results)
                            .then(|| tally.get(a.id.as_str()).copied().unwrap_or(0)),
                        mine,
                        answer_id: a.id,
                        text: a.text,
                    }
                })
                .collect()
        }
        _ => Vec::new(),
    };

    let compose = round
        .filter(|r| r.phase == RoundPhase::Composing)
        .map(|r| ComposeView {
            author_id: r.author_id.clone(),
            author_nickname: r
                .author_id
                .as_deref()
                .and_then(|id| snapshot.members.iter().find(|m| m.player_id == id))
                .map_or_else(|| DEFAULT_NICKNAME.to_string(), |m| m.nickname.clone()),
            is_author: r.author_id.as_deref() == Some(me),
        });

    let countdown = round.and_then(|r| {
        r.active_deadline().map(|d| Countdown {
            phase: r.phase,
            seconds_left: seconds_left(d, now),
        })
    });

    let in_progress = snapshot.room.status == RoomStatus::InProgress;
    let controls = Controls {
        save_settings: host && snapshot.room.status == RoomStatus::Lobby,
        start_game: host && snapshot.room.status == RoomStatus::Lobby,
        next_round: host
            && in_progress
            && leader.is_none()
            && phase.map_or(true, |p| p == RoundPhase::Results),
        start_voting: host && phase == Some(RoundPhase::Answering),
        finalize: host && phase == Some(RoundPhase::Voting) && !session.finalizing,
        end_game: host && leader.is_some(),
        new_game: host && leader.is_some(),
        compose: compose.as_ref().is_some_and(|c| c.is_author),
        answer: phase == Some(RoundPhase::Answering) && !session.my_submitted,
        vote: phase == Some(RoundPhase::Voting)
            && !session.my_voted
            && session.selected_answer_id.is_some(),
    };

    let mut actions = Vec::new();
    if let Some(r) = round {
        match r.phase {
            RoundPhase::Composing => {
                if host && !r.has_question() && passed(r.compose_deadline, now, grace) {
                    actions.push(AutoAction::ComposeFallback);
                }
            }
            RoundPhase::Answering => {
                if !session.my_submitted
                    && !session.draft_answer.trim().is_empty()
                    && passed(r.answer_deadline, now, chrono::Duration::zero())
                {
                    actions.push(AutoAction::SubmitPendingAnswer);
                }
                if host && (all_answered || passed(r.answer_deadline, now, grace)) {
                    actions.push(AutoAction::StartVoting);
                }
            }
            RoundPhase::Voting => {
                if !session.my_voted
                    && session.selected_answer_id.is_some()
                    && passed(r.vote_deadline, now, chrono::Duration::zero())
                {
                    actions.push(AutoAction::CastPendingVote);
                }
                if host && !session.finalizing && (all_voted || passed(r.vote_deadline, now, grace))
                {
                    actions.push(AutoAction::Finalize);
                }
            }
            RoundPhase::Results => {}
        }
    }
    actions.sort();

    let view = RoomView {
        room_code: snapshot.room.code.clone(),
        status: snapshot.room.status,
        settings: snapshot.room.settings,
        is_host: host,
        players,
        round_id: round.map(|r| r.id.clone()),
        phase,
        question: snapshot.question_text.clone(),
        compose,
        answered: answered.len(),
        respondents: respondents.len(),
        voted: voted.len(),
        voters: answered.len(),
        my_submitted: session.my_submitted,
        my_voted: session.my_voted,
        choices,
        countdown,
        winner: leader.map(|w| WinnerView {
            player_id: w.player_id.clone(),
            nickname: w.nickname.clone(),
            score: w.score,
        }),
        controls,
    };

    Derived { view, actions }
}
