//! Roles, phases and events of a client session

use std::time::Duration;

use crate::config::ClientConfig;
use crate::transfer::{FileMetadata, ReceivedFile};

/// Label of the file-transfer data channel
pub const DATA_CHANNEL_LABEL: &str = "fileTransfer";

/// The host always initiates; the joiner always responds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

/// Connection-establishment phase of one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingPeer,
    Negotiating,
    Connected,
    Closed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Closed | Phase::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, AwaitingPeer)
                | (AwaitingPeer, Negotiating)
                | (Negotiating, Connected)
                | (Connected, Closed)
                | (AwaitingPeer, Failed)
                | (Negotiating, Failed)
                | (Connected, Failed)
                | (AwaitingPeer, Idle)
                | (Negotiating, Idle)
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::AwaitingPeer => write!(f, "awaiting peer"),
            Phase::Negotiating => write!(f, "negotiating"),
            Phase::Connected => write!(f, "connected"),
            Phase::Closed => write!(f, "closed"),
            Phase::Failed => write!(f, "failed"),
        }
    }
}

/// What the local user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionIntent {
    /// Create a session. `None` generates a code (retried on collision).
    Host { code: Option<String> },
    Join { code: String },
}

impl SessionIntent {
    pub fn role(&self) -> Role {
        match self {
            SessionIntent::Host { .. } => Role::Initiator,
            SessionIntent::Join { .. } => Role::Responder,
        }
    }
}

/// Status reported to the user-facing sink
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PhaseChanged(Phase),
    SessionCreated { code: String },
    SessionJoined { code: String, client_count: usize },
    PeerJoined { peer_id: String, client_count: usize },
    PeerLeft { peer_id: String, client_count: usize },
    SendProgress { name: String, sent: u64, total: u64 },
    FileSent(FileMetadata),
    ReceiveStarted(FileMetadata),
    ReceiveProgress { name: String, received: u64, total: u64 },
    FileReceived(ReceivedFile),
    /// Control channel dropped mid-setup; a new session is needed
    SessionLost,
    /// Reportable problem that does not end the session
    Warning(String),
    /// Terminal failure
    Failed(String),
}

/// Client-side WebRTC settings
#[derive(Debug, Clone)]
pub struct WebRTCConfig {
    pub signaling_url: String,
    pub stun_servers: Vec<String>,
    pub reconnect_delay: Duration,
    pub ping_interval: Option<Duration>,
    /// Attempts at generating a free session code
    pub max_code_attempts: usize,
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for WebRTCConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            signaling_url: config.signaling_url.clone(),
            stun_servers: config.stun_servers.clone(),
            reconnect_delay: config.reconnect_delay(),
            ping_interval: config.ping_interval(),
            max_code_attempts: 5,
        }
    }
}
