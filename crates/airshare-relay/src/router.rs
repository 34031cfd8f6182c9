//! Signaling router: a single task owning the session store
//!
//! Socket handlers never touch the store directly. They post
//! [`RouterCommand`]s to the router task, which applies them one at a time
//! and pushes serialized replies into each client's outbox.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::protocol::{is_valid_session_code, parse_client_frame, tag_relayed, ClientMessage, ServerMessage};
use crate::session::{ClientId, Departure, JoinOutcome, Outbox, SessionStore, StoreStats};

/// Idle sessions older than this are evicted
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// How often the idle sweep runs
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Public view of one session for the HTTP surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub client_count: usize,
    pub created: DateTime<Utc>,
}

#[derive(Debug)]
pub enum RouterCommand {
    Connect { client: ClientId, outbox: Outbox },
    Message { client: ClientId, text: String },
    Disconnect { client: ClientId },
    Sweep { now: DateTime<Utc>, reply: Option<oneshot::Sender<Vec<String>>> },
    Stats { reply: oneshot::Sender<StoreStats> },
    SessionInfo { code: String, reply: oneshot::Sender<Option<SessionInfo>> },
}

/// Event handlers over the session store
pub struct Router {
    store: SessionStore,
    config: RouterConfig,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            store: SessionStore::new(),
            config,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn handle(&mut self, cmd: RouterCommand) {
        match cmd {
            RouterCommand::Connect { client, outbox } => self.on_connect(client, outbox),
            RouterCommand::Message { client, text } => self.on_message(&client, &text),
            RouterCommand::Disconnect { client } => self.on_disconnect(&client),
            RouterCommand::Sweep { now, reply } => {
                let evicted = self.sweep(now);
                if let Some(reply) = reply {
                    let _ = reply.send(evicted);
                }
            }
            RouterCommand::Stats { reply } => {
                let _ = reply.send(self.store.stats());
            }
            RouterCommand::SessionInfo { code, reply } => {
                let info = self.store.session(&code).map(|s| SessionInfo {
                    session_id: s.code.clone(),
                    client_count: s.members.len(),
                    created: s.created,
                });
                let _ = reply.send(info);
            }
        }
    }

    pub fn on_connect(&mut self, client: ClientId, outbox: Outbox) {
        let now = Utc::now();
        self.store.register_client(client.clone(), outbox, now);
        info!(
            "Client connected: {} (total clients: {})",
            client,
            self.store.stats().connected_clients
        );
        self.send(&client, &ServerMessage::Welcome { client_id: client.clone(), timestamp: now });
    }

    pub fn on_disconnect(&mut self, client: &str) {
        if let Some(departure) = self.store.remove_client(client, Utc::now()) {
            self.announce_departure(client, departure);
        }
        info!(
            "Client disconnected: {} (total clients: {})",
            client,
            self.store.stats().connected_clients
        );
    }

    pub fn on_message(&mut self, client: &str, text: &str) {
        let frame = match parse_client_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Rejected frame from {}: {:?}", client, e);
                self.send(client, &ServerMessage::error(&e));
                return;
            }
        };

        debug!("Received {} from {}", frame.message.msg_type(), client);

        let result = match frame.message {
            ClientMessage::CreateSession { ref session_id } => self.create_session(client, session_id),
            ClientMessage::JoinSession { ref session_id } => self.join_session(client, session_id),
            ClientMessage::Offer { .. } | ClientMessage::Answer { .. } | ClientMessage::IceCandidate { .. } => {
                self.relay(client, frame.raw);
                Ok(())
            }
            ClientMessage::LeaveSession {} => {
                if let Some(departure) = self.store.leave_session(client, Utc::now()) {
                    self.announce_departure(client, departure);
                }
                Ok(())
            }
            ClientMessage::Ping {} => {
                self.send(client, &ServerMessage::Pong {});
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!("Request from {} failed: {:?}", client, e);
            self.send(client, &ServerMessage::error(&e));
        }
    }

    fn create_session(&mut self, client: &str, code: &str) -> Result<(), RelayError> {
        if !is_valid_session_code(code) {
            return Err(RelayError::InvalidSessionCode(code.to_string()));
        }

        let (session, departure) = self.store.create_session(client, code, Utc::now())?;
        if let Some(departure) = departure {
            self.announce_departure(client, departure);
        }

        info!("Session created: {} by {}", session.code, client);
        self.send(
            client,
            &ServerMessage::SessionCreated { session_id: session.code, timestamp: session.created },
        );
        Ok(())
    }

    fn join_session(&mut self, client: &str, code: &str) -> Result<(), RelayError> {
        let (outcome, departure) = self.store.join_session(client, code, Utc::now())?;
        if let Some(departure) = departure {
            self.announce_departure(client, departure);
        }

        match outcome {
            JoinOutcome::Joined { client_count, others } => {
                info!("Client {} joined session {} ({} members)", client, code, client_count);
                self.send(
                    client,
                    &ServerMessage::SessionJoined { session_id: code.to_string(), client_count },
                );
                let notice = ServerMessage::PeerJoined { peer_id: client.to_string(), client_count };
                for other in &others {
                    self.send(other, &notice);
                }
            }
            JoinOutcome::AlreadyMember { client_count } => {
                debug!("Client {} re-joined its own session {}", client, code);
                self.send(
                    client,
                    &ServerMessage::SessionJoined { session_id: code.to_string(), client_count },
                );
            }
        }
        Ok(())
    }

    fn relay(&mut self, client: &str, raw: serde_json::Map<String, serde_json::Value>) {
        let Some(targets) = self.store.relay_targets(client, Utc::now()) else {
            debug!("Dropping signal from {}: not in a session", client);
            return;
        };

        let tagged = tag_relayed(raw, client);
        for target in &targets {
            if !self.store.send_to(target, tagged.clone()) {
                debug!("Relay target {} has gone away", target);
            }
        }
    }

    fn announce_departure(&self, client: &str, departure: Departure) {
        if departure.deleted {
            info!("Session deleted: {}", departure.code);
            return;
        }

        info!("Client {} left session {}", client, departure.code);
        let notice = ServerMessage::PeerLeft {
            peer_id: client.to_string(),
            client_count: departure.remaining.len(),
        };
        for member in &departure.remaining {
            self.send(member, &notice);
        }
    }

    /// Evict idle sessions as of `now`
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let evicted = self.store.sweep(now, self.config.retention);
        for code in &evicted {
            info!("Session expired: {}", code);
        }
        evicted
    }

    fn send(&self, client: &str, msg: &ServerMessage) {
        if !self.store.send_to(client, msg.to_json()) {
            debug!("Dropping {} for departed client {}", msg.msg_type(), client);
        }
    }
}

/// Cloneable handle to a running router task
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::UnboundedSender<RouterCommand>,
}

impl RouterHandle {
    pub fn connect(&self, client: ClientId, outbox: Outbox) {
        let _ = self.tx.send(RouterCommand::Connect { client, outbox });
    }

    pub fn message(&self, client: ClientId, text: String) {
        let _ = self.tx.send(RouterCommand::Message { client, text });
    }

    pub fn disconnect(&self, client: ClientId) {
        let _ = self.tx.send(RouterCommand::Disconnect { client });
    }

    /// Run a sweep now and return the evicted codes
    pub async fn sweep(&self, now: DateTime<Utc>) -> Option<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RouterCommand::Sweep { now, reply: Some(reply) }).ok()?;
        rx.await.ok()
    }

    pub async fn stats(&self) -> Option<StoreStats> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RouterCommand::Stats { reply }).ok()?;
        rx.await.ok()
    }

    pub async fn session_info(&self, code: &str) -> Option<SessionInfo> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RouterCommand::SessionInfo { code: code.to_string(), reply })
            .ok()?;
        rx.await.ok().flatten()
    }
}

/// Spawn the router task. It runs until every handle is dropped.
pub fn spawn_router(config: RouterConfig) -> RouterHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sweep_every = config.sweep_interval;
    let mut router = Router::new(config);

    tokio::spawn(async move {
        let mut sweep = tokio::time::interval_at(tokio::time::Instant::now() + sweep_every, sweep_every);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        Some(cmd) => router.handle(cmd),
                        None => break,
                    }
                }
                _ = sweep.tick() => {
                    router.handle(RouterCommand::Sweep { now: Utc::now(), reply: None });
                }
            }
        }

        debug!("Router task stopped");
    });

    RouterHandle { tx }
}
