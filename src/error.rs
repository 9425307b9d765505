//! Error taxonomy for client operations
//!
//! Explicit user actions surface these; background work logs them and lets the
//! next refresh reconcile.

use crate::backend::BackendError;
use crate::types::RoundPhase;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Enter a nickname first")]
    MissingNickname,

    #[error("Enter a room code")]
    MissingCode,

    #[error("Enter an answer")]
    EmptyAnswer,

    #[error("Enter a question")]
    EmptyQuestion,

    #[error("Select an answer first")]
    NoSelection,

    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Not in a room")]
    NotInRoom,

    #[error("Round has not started")]
    NoRound,

    #[error("Not allowed while the round is in {0}")]
    WrongPhase(RoundPhase),

    #[error("A round is already in progress")]
    RoundInProgress,

    #[error("Only the host can {0}")]
    NotHost(&'static str),

    #[error("Only the question author can do that")]
    NotAuthor,

    #[error("You cannot vote for your own answer")]
    SelfVote,

    #[error("Unknown answer {0}")]
    UnknownAnswer(String),

    #[error("No preset questions available")]
    NoQuestions,

    #[error("The game already has a winner")]
    GameOver,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Coarse classification used to decide how a failure is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Transient,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::RoomNotFound(_) => ErrorKind::NotFound,
            ClientError::WrongPhase(_) | ClientError::RoundInProgress | ClientError::GameOver => {
                ErrorKind::Conflict
            }
            ClientError::Backend(e) => match e {
                BackendError::NotFound(_) => ErrorKind::NotFound,
                BackendError::UniqueViolation(_) | BackendError::Rejected { .. } => {
                    ErrorKind::Conflict
                }
                _ => ErrorKind::Transient,
            },
            _ => ErrorKind::Validation,
        }
    }
}
