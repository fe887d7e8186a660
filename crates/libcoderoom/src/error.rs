use coderoom_protocol::{ParticipantId, SessionId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoderoomError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("participant {participant_id} is not in session {session_id}")]
    NotJoined {
        session_id: SessionId,
        participant_id: ParticipantId,
    },

    #[error("connection already joined session {0}")]
    AlreadyJoined(SessionId),

    #[error("invalid path: {0:?}")]
    InvalidPath(String),
}

impl CoderoomError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoderoomError::SessionNotFound(_))
    }
}

/// Failures raised while driving an external process.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
