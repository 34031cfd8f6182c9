//! Client-side error taxonomy

use airshare_relay::{ErrorKind, RelayError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("session code already in use: {0}")]
    DuplicateSession(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session is full: {0}")]
    SessionFull(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("invalid passphrase")]
    InvalidPassphrase,

    #[error("transfer aborted: {0}")]
    TransferAborted(String),

    #[error("size mismatch for {name}: declared {declared} bytes, received {received}")]
    SizeMismatch {
        name: String,
        declared: u64,
        received: u64,
    },

    #[error("signaling connection lost, the session must be recreated")]
    ControlChannelLost,

    #[error("relay error: {0}")]
    Relay(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Map an `error` control message back onto the taxonomy
    pub fn from_relay(kind: Option<ErrorKind>, message: &str, code: &str) -> Self {
        match kind {
            Some(ErrorKind::DuplicateSession) => Error::DuplicateSession(code.to_string()),
            Some(ErrorKind::SessionNotFound) => Error::SessionNotFound(code.to_string()),
            Some(ErrorKind::SessionFull) => Error::SessionFull(code.to_string()),
            Some(ErrorKind::MalformedMessage) => Error::MalformedMessage(message.to_string()),
            _ => Error::Relay(message.to_string()),
        }
    }
}

impl From<RelayError> for Error {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::DuplicateSession(code) => Error::DuplicateSession(code),
            RelayError::SessionNotFound(code) => Error::SessionNotFound(code),
            RelayError::SessionFull(code) => Error::SessionFull(code),
            RelayError::MalformedMessage(detail) => Error::MalformedMessage(detail),
            other => Error::Relay(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_error_mapping() {
        let err = Error::from_relay(Some(ErrorKind::SessionFull), "Session is full", "AB12CD");
        assert!(matches!(err, Error::SessionFull(ref code) if code == "AB12CD"));

        let err = Error::from_relay(None, "Something odd", "AB12CD");
        assert!(matches!(err, Error::Relay(ref m) if m == "Something odd"));

        let err: Error = RelayError::DuplicateSession("AB12CD".to_string()).into();
        assert_eq!(err.to_string(), "session code already in use: AB12CD");
    }
}
