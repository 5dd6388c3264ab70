use kryptopoly_protocol::{CardId, ErrorKind, PlayerId, SessionStatus, Step};
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::locks::LockConflict;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("only the game master may {0}")]
    GmOnly(&'static str),
    #[error("the game master does not take part in player steps")]
    GmIsNotPlayer,
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("session is {0}")]
    WrongStatus(SessionStatus),
    #[error("command belongs to {expected}, current step is {current}")]
    WrongStep { expected: Step, current: Step },
    #[error("unknown card {0}")]
    UnknownCard(CardId),
    #[error("unknown market {0}")]
    UnknownMarket(String),
    #[error(transparent)]
    Locked(#[from] LockConflict),
    #[error("{0}")]
    Invalid(String),
    #[error("nothing to roll back")]
    NothingToRollBack,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::GmOnly(_) | EngineError::GmIsNotPlayer => ErrorKind::Forbidden,
            EngineError::UnknownPlayer(_)
            | EngineError::UnknownCard(_)
            | EngineError::UnknownMarket(_) => ErrorKind::NotFound,
            EngineError::Locked(_) => ErrorKind::Conflict,
            EngineError::WrongStatus(_)
            | EngineError::WrongStep { .. }
            | EngineError::Invalid(_)
            | EngineError::NothingToRollBack => ErrorKind::Validation,
            EngineError::Catalog(err) => err.kind(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        EngineError::Invalid(message.into())
    }
}
