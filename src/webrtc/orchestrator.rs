//! Connection-establishment state machine for one participant
//!
//! ```text
//! Idle -> AwaitingPeer -> Negotiating -> Connected -> Closed
//!              \               \             \
//!               `---------------`-------------`--> Failed
//! ```
//!
//! The orchestrator never retries a failed negotiation. Losing the control
//! connection before the direct channel is up sends it back to `Idle`;
//! a new session has to be started.

use airshare_relay::{generate_session_code, ClientMessage, ServerMessage};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::peer::NegotiationTransport;
use super::types::{Phase, Role, SessionEvent, SessionIntent};
use crate::error::Error;

pub struct Orchestrator<T: NegotiationTransport> {
    role: Role,
    phase: Phase,
    code: String,
    generated_code: bool,
    code_attempts: usize,
    max_code_attempts: usize,
    transport: T,
    signaling: mpsc::UnboundedSender<ClientMessage>,
    events: mpsc::UnboundedSender<SessionEvent>,
    local_description: Option<Value>,
    remote_description: Option<Value>,
    pending_candidates: Vec<Value>,
    failure: Option<Error>,
}

impl<T: NegotiationTransport> Orchestrator<T> {
    pub fn new(
        intent: SessionIntent,
        transport: T,
        signaling: mpsc::UnboundedSender<ClientMessage>,
        events: mpsc::UnboundedSender<SessionEvent>,
        max_code_attempts: usize,
    ) -> Self {
        let role = intent.role();
        let (code, generated_code) = match intent {
            SessionIntent::Host { code: Some(code) } => (code, false),
            SessionIntent::Host { code: None } => (generate_session_code(), true),
            SessionIntent::Join { code } => (code, false),
        };

        Self {
            role,
            phase: Phase::Idle,
            code,
            generated_code,
            code_attempts: 0,
            max_code_attempts: max_code_attempts.max(1),
            transport,
            signaling,
            events,
            local_description: None,
            remote_description: None,
            pending_candidates: Vec::new(),
            failure: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn local_description(&self) -> Option<&Value> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&Value> {
        self.remote_description.as_ref()
    }

    /// Why the session failed, once it has
    pub fn take_failure(&mut self) -> Option<Error> {
        self.failure.take()
    }

    /// Issue CreateSession or JoinSession
    pub fn start(&mut self) {
        if self.phase != Phase::Idle {
            warn!("Session already started ({})", self.phase);
            return;
        }
        self.set_phase(Phase::AwaitingPeer);
        self.request_session();
    }

    fn request_session(&mut self) {
        let msg = match self.role {
            Role::Initiator => {
                self.code_attempts += 1;
                ClientMessage::CreateSession { session_id: self.code.clone() }
            }
            Role::Responder => ClientMessage::JoinSession { session_id: self.code.clone() },
        };
        self.signal(msg);
    }

    pub async fn handle_server_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Welcome { client_id, .. } => {
                debug!("Relay assigned id {}", client_id);
            }
            ServerMessage::SessionCreated { session_id, .. } => {
                info!("Session {} created, waiting for peer", session_id);
                self.emit(SessionEvent::SessionCreated { code: session_id });
            }
            ServerMessage::SessionJoined { session_id, client_count } => {
                self.emit(SessionEvent::SessionJoined { code: session_id, client_count });
                if self.role == Role::Responder && self.phase == Phase::AwaitingPeer {
                    // Wait for the initiator's offer
                    self.set_phase(Phase::Negotiating);
                }
            }
            ServerMessage::PeerJoined { peer_id, client_count } => {
                info!("Peer {} joined ({} members)", peer_id, client_count);
                self.emit(SessionEvent::PeerJoined { peer_id, client_count });
                if self.role == Role::Initiator && self.phase == Phase::AwaitingPeer {
                    self.set_phase(Phase::Negotiating);
                    self.send_offer().await;
                }
            }
            ServerMessage::PeerLeft { peer_id, client_count } => {
                info!("Peer {} left ({} members)", peer_id, client_count);
                self.emit(SessionEvent::PeerLeft { peer_id, client_count });
                if self.phase == Phase::Negotiating {
                    self.fail(Error::NegotiationFailed("peer left during negotiation".to_string()))
                        .await;
                }
            }
            ServerMessage::Offer { offer, .. } => self.handle_offer(offer).await,
            ServerMessage::Answer { answer, .. } => self.handle_answer(answer).await,
            ServerMessage::IceCandidate { candidate, .. } => self.handle_remote_candidate(candidate).await,
            ServerMessage::Pong {} => {}
            ServerMessage::Error { message, kind, .. } => self.handle_relay_error(kind, &message).await,
        }
    }

    async fn send_offer(&mut self) {
        match self.transport.create_offer().await {
            Ok(offer) => {
                debug!("Sending offer");
                self.local_description = Some(offer.clone());
                self.signal(ClientMessage::Offer { offer, session_id: Some(self.code.clone()) });
            }
            Err(e) => {
                self.fail(Error::NegotiationFailed(format!("could not create offer: {}", e)))
                    .await
            }
        }
    }

    async fn handle_offer(&mut self, offer: Value) {
        if self.role != Role::Responder {
            warn!("Ignoring offer: this side initiates");
            return;
        }
        match self.phase {
            Phase::AwaitingPeer => self.set_phase(Phase::Negotiating),
            Phase::Negotiating => {}
            other => {
                warn!("Ignoring offer while {}", other);
                return;
            }
        }

        match self.transport.accept_offer(offer.clone()).await {
            Ok(answer) => {
                self.remote_description = Some(offer);
                self.flush_candidates().await;
                debug!("Sending answer");
                self.local_description = Some(answer.clone());
                self.signal(ClientMessage::Answer { answer, session_id: Some(self.code.clone()) });
            }
            Err(e) => {
                self.fail(Error::NegotiationFailed(format!("could not apply offer: {}", e)))
                    .await
            }
        }
    }

    async fn handle_answer(&mut self, answer: Value) {
        if self.role != Role::Initiator || self.phase != Phase::Negotiating {
            warn!("Ignoring unexpected answer ({} while {})", self.role, self.phase);
            return;
        }
        if self.remote_description.is_some() {
            warn!("Ignoring duplicate answer");
            return;
        }

        match self.transport.accept_answer(answer.clone()).await {
            Ok(()) => {
                self.remote_description = Some(answer);
                self.flush_candidates().await;
            }
            Err(e) => {
                self.fail(Error::NegotiationFailed(format!("could not apply answer: {}", e)))
                    .await
            }
        }
    }

    /// Apply now if the remote description is in place, otherwise buffer
    async fn handle_remote_candidate(&mut self, candidate: Value) {
        if !matches!(self.phase, Phase::AwaitingPeer | Phase::Negotiating | Phase::Connected) {
            debug!("Ignoring candidate while {}", self.phase);
            return;
        }
        if self.remote_description.is_none() {
            debug!("Buffering early candidate");
            self.pending_candidates.push(candidate);
            return;
        }
        if let Err(e) = self.transport.add_candidate(candidate).await {
            warn!("Failed to add remote candidate: {}", e);
        }
    }

    async fn flush_candidates(&mut self) {
        let pending = std::mem::take(&mut self.pending_candidates);
        if !pending.is_empty() {
            debug!("Applying {} buffered candidates", pending.len());
        }
        for candidate in pending {
            if let Err(e) = self.transport.add_candidate(candidate).await {
                warn!("Failed to add buffered candidate: {}", e);
            }
        }
    }

    async fn handle_relay_error(&mut self, kind: Option<airshare_relay::ErrorKind>, message: &str) {
        let err = Error::from_relay(kind, message, &self.code);

        if self.phase != Phase::AwaitingPeer {
            warn!("Relay error: {}", message);
            self.emit(SessionEvent::Warning(err.to_string()));
            return;
        }

        if matches!(err, Error::DuplicateSession(_))
            && self.generated_code
            && self.code_attempts < self.max_code_attempts
        {
            let taken = std::mem::replace(&mut self.code, generate_session_code());
            info!("Session code {} is taken, trying {}", taken, self.code);
            self.request_session();
            return;
        }

        self.fail(err).await;
    }

    /// Relay a locally discovered candidate, one message per candidate
    pub fn handle_local_candidate(&mut self, candidate: Value) {
        if !matches!(self.phase, Phase::Negotiating | Phase::Connected) {
            debug!("Dropping local candidate while {}", self.phase);
            return;
        }
        self.signal(ClientMessage::IceCandidate { candidate, session_id: Some(self.code.clone()) });
    }

    /// The data channel is ready. Returns true when this side should start sending.
    pub fn handle_channel_open(&mut self) -> bool {
        if self.phase != Phase::Negotiating {
            warn!("Channel opened while {}", self.phase);
            return false;
        }
        self.set_phase(Phase::Connected);
        self.role == Role::Initiator
    }

    pub fn handle_channel_closed(&mut self) {
        match self.phase {
            Phase::Connected => self.set_phase(Phase::Closed),
            Phase::Negotiating => {
                let err = Error::NegotiationFailed("channel closed before opening".to_string());
                self.emit(SessionEvent::Failed(err.to_string()));
                self.failure = Some(err);
                self.set_phase(Phase::Failed);
            }
            _ => debug!("Channel closed while {}", self.phase),
        }
    }

    pub async fn handle_channel_error(&mut self, reason: &str) {
        let err = match self.phase {
            Phase::Connected => Error::TransferAborted(reason.to_string()),
            _ => Error::NegotiationFailed(reason.to_string()),
        };
        self.fail(err).await;
    }

    /// The control connection dropped
    pub fn handle_control_lost(&mut self) {
        match self.phase {
            Phase::AwaitingPeer | Phase::Negotiating => {
                warn!("Signaling connection lost while {}; session abandoned", self.phase);
                self.pending_candidates.clear();
                self.local_description = None;
                self.remote_description = None;
                self.set_phase(Phase::Idle);
                self.emit(SessionEvent::SessionLost);
            }
            _ => debug!("Signaling connection lost while {}", self.phase),
        }
    }

    /// Move to `Failed` and report the reason
    pub async fn fail(&mut self, err: Error) {
        if self.phase.is_terminal() || self.phase == Phase::Idle {
            debug!("Ignoring failure while {}: {}", self.phase, err);
            return;
        }
        warn!("Session failed: {}", err);
        if let Err(e) = self.transport.close().await {
            debug!("Error closing transport: {}", e);
        }
        self.emit(SessionEvent::Failed(err.to_string()));
        self.failure = Some(err);
        self.set_phase(Phase::Failed);
    }

    /// Close the direct connection after a finished session
    pub async fn close(&mut self) {
        if let Err(e) = self.transport.close().await {
            debug!("Error closing transport: {}", e);
        }
        if self.phase == Phase::Connected {
            self.set_phase(Phase::Closed);
        }
    }

    /// Tell the relay we are done with the session
    pub fn leave(&self) {
        self.signal(ClientMessage::LeaveSession {});
    }

    fn set_phase(&mut self, next: Phase) {
        if !self.phase.can_transition_to(next) {
            warn!("Refusing phase change {} -> {}", self.phase, next);
            return;
        }
        info!("Phase: {} -> {}", self.phase, next);
        self.phase = next;
        self.emit(SessionEvent::PhaseChanged(next));
    }

    fn signal(&self, msg: ClientMessage) {
        if self.signaling.send(msg).is_err() {
            warn!("Signaling channel closed; message dropped");
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
