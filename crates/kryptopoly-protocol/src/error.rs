use serde::{Deserialize, Serialize};

/// Error taxonomy shared by every layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed input or wrong phase/step for the command.
    Validation,
    /// Resource already locked or decision already taken.
    Conflict,
    /// Unknown session, player or card.
    NotFound,
    /// Non-GM issuing a GM command, or GM acting as a player.
    Forbidden,
    /// Catalog/seed corruption; the session cannot be created.
    Fatal,
}

/// Error body of a failed reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
