//! Session store: pairs at most two control connections under one code
//!
//! Clients and sessions live in two id-keyed tables. Membership is
//! expressed as ids in both directions, so removing a client never
//! leaves dangling references.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{RelayError, Result};

/// Maximum members per session
pub const MAX_SESSION_MEMBERS: usize = 2;

/// Opaque per-connection client id
pub type ClientId = String;

/// Outbound queue of serialized frames for one control connection
pub type Outbox = mpsc::UnboundedSender<String>;

/// One live control connection
#[derive(Debug)]
pub struct ClientConnection {
    pub id: ClientId,
    pub outbox: Outbox,
    pub session: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// A rendezvous record; the first member is the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub code: String,
    pub members: Vec<ClientId>,
    pub created: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn host(&self) -> Option<&ClientId> {
        self.members.first()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= MAX_SESSION_MEMBERS
    }

    /// Members other than `client`
    pub fn others<'a>(&'a self, client: &'a str) -> impl Iterator<Item = &'a ClientId> + 'a {
        self.members.iter().filter(move |m| m.as_str() != client)
    }
}

/// Outcome of removing a client from its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub code: String,
    pub remaining: Vec<ClientId>,
    pub deleted: bool,
}

/// Outcome of a join
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { client_count: usize, others: Vec<ClientId> },
    AlreadyMember { client_count: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub active_sessions: usize,
    pub connected_clients: usize,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    clients: HashMap<ClientId, ClientConnection>,
    sessions: HashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            active_sessions: self.sessions.len(),
            connected_clients: self.clients.len(),
        }
    }

    pub fn register_client(&mut self, id: ClientId, outbox: Outbox, now: DateTime<Utc>) {
        self.clients.insert(
            id.clone(),
            ClientConnection {
                id,
                outbox,
                session: None,
                connected_at: now,
            },
        );
    }

    /// Drop a client, leaving its session first
    pub fn remove_client(&mut self, id: &str, now: DateTime<Utc>) -> Option<Departure> {
        let departure = self.leave_session(id, now);
        self.clients.remove(id);
        departure
    }

    pub fn client(&self, id: &str) -> Option<&ClientConnection> {
        self.clients.get(id)
    }

    pub fn session(&self, code: &str) -> Option<&Session> {
        self.sessions.get(code)
    }

    /// Code of the session `client` currently belongs to
    pub fn session_of(&self, client: &str) -> Option<&str> {
        self.clients.get(client).and_then(|c| c.session.as_deref())
    }

    /// Create a session with `client` as its host.
    ///
    /// A client already in another session leaves it first; the returned
    /// departure tells the caller whom to notify.
    pub fn create_session(
        &mut self,
        client: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(Session, Option<Departure>)> {
        if !self.clients.contains_key(client) {
            return Err(RelayError::SessionNotFound(code.to_string()));
        }
        if self.sessions.contains_key(code) {
            return Err(RelayError::DuplicateSession(code.to_string()));
        }

        let departure = self.leave_session(client, now);

        let session = Session {
            code: code.to_string(),
            members: vec![client.to_string()],
            created: now,
            last_activity: now,
        };
        self.sessions.insert(code.to_string(), session.clone());
        if let Some(c) = self.clients.get_mut(client) {
            c.session = Some(code.to_string());
        }

        Ok((session, departure))
    }

    /// Add `client` as the second member of `code`
    pub fn join_session(
        &mut self,
        client: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(JoinOutcome, Option<Departure>)> {
        let session = self
            .sessions
            .get(code)
            .ok_or_else(|| RelayError::SessionNotFound(code.to_string()))?;

        if session.members.iter().any(|m| m == client) {
            return Ok((JoinOutcome::AlreadyMember { client_count: session.members.len() }, None));
        }
        if session.is_full() {
            return Err(RelayError::SessionFull(code.to_string()));
        }
        if !self.clients.contains_key(client) {
            return Err(RelayError::SessionNotFound(code.to_string()));
        }

        let departure = self.leave_session(client, now);

        // The old session was a different one, so `code` is still live
        let session = self
            .sessions
            .get_mut(code)
            .ok_or_else(|| RelayError::SessionNotFound(code.to_string()))?;
        session.members.push(client.to_string());
        session.last_activity = now;
        let client_count = session.members.len();
        let others: Vec<ClientId> = session.others(client).cloned().collect();

        if let Some(c) = self.clients.get_mut(client) {
            c.session = Some(code.to_string());
        }

        Ok((JoinOutcome::Joined { client_count, others }, departure))
    }

    /// Recipients for a negotiation record sent by `client`.
    ///
    /// `None` when the client is not a member of a live session.
    pub fn relay_targets(&mut self, client: &str, now: DateTime<Utc>) -> Option<Vec<ClientId>> {
        let code = self.clients.get(client)?.session.clone()?;
        let session = self.sessions.get_mut(&code)?;
        if !session.members.iter().any(|m| m == client) {
            return None;
        }
        session.last_activity = now;
        Some(session.others(client).cloned().collect())
    }

    /// Remove `client` from its session, deleting the session once empty
    pub fn leave_session(&mut self, client: &str, now: DateTime<Utc>) -> Option<Departure> {
        let code = self.clients.get_mut(client)?.session.take()?;
        let session = self.sessions.get_mut(&code)?;

        session.members.retain(|m| m != client);
        session.last_activity = now;
        let remaining = session.members.clone();

        let deleted = remaining.is_empty();
        if deleted {
            self.sessions.remove(&code);
        }

        Some(Departure { code, remaining, deleted })
    }

    /// Evict sessions idle for longer than `retention`; returns evicted codes
    pub fn sweep(&mut self, now: DateTime<Utc>, retention: Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .sessions
            .values()
            .filter(|s| match (now - s.last_activity).to_std() {
                Ok(idle) => idle > retention,
                Err(_) => false,
            })
            .map(|s| s.code.clone())
            .collect();

        for code in &expired {
            if let Some(session) = self.sessions.remove(code) {
                for member in &session.members {
                    if let Some(c) = self.clients.get_mut(member) {
                        if c.session.as_deref() == Some(code.as_str()) {
                            c.session = None;
                        }
                    }
                }
            }
        }

        expired
    }

    /// Queue a frame for a client; false if it is gone
    pub fn send_to(&self, client: &str, frame: String) -> bool {
        match self.clients.get(client) {
            Some(c) => c.outbox.send(frame).is_ok(),
            None => false,
        }
    }
}
