//! Error types for the signaling relay

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error kind carried in `error` control messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    DuplicateSession,
    SessionNotFound,
    SessionFull,
    InvalidSessionCode,
    MalformedMessage,
    UnknownMessageType,
}

/// Errors reported back to the client that caused them
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Session ID already exists")]
    DuplicateSession(String),

    #[error("Session not found")]
    SessionNotFound(String),

    #[error("Session is full")]
    SessionFull(String),

    #[error("Invalid session code")]
    InvalidSessionCode(String),

    #[error("Invalid message format")]
    MalformedMessage(String),

    #[error("Unknown message type")]
    UnknownMessageType(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::DuplicateSession(_) => ErrorKind::DuplicateSession,
            RelayError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            RelayError::SessionFull(_) => ErrorKind::SessionFull,
            RelayError::InvalidSessionCode(_) => ErrorKind::InvalidSessionCode,
            RelayError::MalformedMessage(_) => ErrorKind::MalformedMessage,
            RelayError::UnknownMessageType(_) => ErrorKind::UnknownMessageType,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
