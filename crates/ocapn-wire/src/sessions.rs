//! Sessions and the manager that tracks them.
//!
//! The [`SessionManager`] records active sessions by peer location, pending
//! sessions (an outgoing connection whose handshake has not finished, plus
//! everyone waiting for it), and which connection carries which session.
//! Waiters are woken after the lock is released.

use crate::connection::{Connection, ConnectionId};
use crate::error::{WireError, WireResult};
use ocapn_captp::{CapTp, Promise, Value};
use ocapn_types::{Location, LocationId, LocationSignature, PublicKey, SelfIdentity, SessionId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::oneshot;

/// What the peer proved about itself during the handshake.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    /// Session key the peer announced in `op:start-session`.
    pub public_key: PublicKey,
    /// Where the peer says it can be reached.
    pub location: Location,
    /// The peer's signature over `location`, checked against `public_key`.
    pub location_signature: LocationSignature,
}

/// An established session: one authenticated connection and its CapTP engine.
pub struct Session {
    id: SessionId,
    connection: Arc<dyn Connection>,
    self_identity: SelfIdentity,
    peer: PeerIdentity,
    captp: CapTp,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        connection: Arc<dyn Connection>,
        peer: PeerIdentity,
        captp: CapTp,
    ) -> Self {
        Self {
            id,
            self_identity: connection.self_identity().clone(),
            connection,
            peer,
            captp,
        }
    }

    /// Session id, identical on both sides.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The verified peer.
    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    pub fn peer_location_id(&self) -> LocationId {
        self.peer.location.id()
    }

    /// The identity we presented on this session's connection.
    pub fn self_identity(&self) -> &SelfIdentity {
        &self.self_identity
    }

    /// The connection that survived the handshake.
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// The CapTP engine carried by this session.
    pub fn captp(&self) -> &CapTp {
        &self.captp
    }

    /// The peer's bootstrap object.
    pub fn get_bootstrap(&self) -> Promise {
        self.captp.get_bootstrap()
    }

    /// Abort the CapTP connection. The peer answers by closing it.
    pub fn abort(&self, reason: &str) {
        self.captp.abort(Value::error(reason));
    }

    pub fn is_aborted(&self) -> bool {
        self.captp.is_aborted()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer.location.id())
            .field("connection", &self.connection.id())
            .finish_non_exhaustive()
    }
}

pub(crate) type SessionWaiter = oneshot::Sender<WireResult<Arc<Session>>>;

/// Resolves to the session once its handshake completes.
pub type SessionReceiver = oneshot::Receiver<WireResult<Arc<Session>>>;

struct PendingSession {
    /// Cleared when crossed hellos close our dial in favour of the peer's.
    outgoing: Option<Arc<dyn Connection>>,
    waiters: Vec<SessionWaiter>,
}

#[derive(Default)]
struct State {
    active: HashMap<LocationId, Arc<Session>>,
    pending: HashMap<LocationId, PendingSession>,
    by_connection: HashMap<ConnectionId, Arc<Session>>,
}

/// Thread-safe session bookkeeping for one client.
#[derive(Clone, Default)]
pub struct SessionManager {
    state: Arc<RwLock<State>>,
}

fn wake(waiters: Vec<SessionWaiter>, result: impl Fn() -> WireResult<Arc<Session>>) {
    for waiter in waiters {
        // A dropped receiver just means nobody is waiting any more.
        let _ = waiter.send(result());
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The established session with `location_id`, if any.
    pub fn active_session(&self, location_id: &LocationId) -> Option<Arc<Session>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.active.get(location_id).cloned()
    }

    pub fn active_sessions(&self) -> Vec<Arc<Session>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.active.values().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.state.read().unwrap_or_else(|e| e.into_inner()).active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state.read().unwrap_or_else(|e| e.into_inner()).pending.len()
    }

    /// Our own not-yet-established dial to `location_id`, if any.
    pub fn outgoing_connection(&self, location_id: &LocationId) -> Option<Arc<dyn Connection>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .pending
            .get(location_id)
            .and_then(|pending| pending.outgoing.clone())
    }

    /// The session carried by `connection`, if it got that far.
    pub fn session_for_connection(&self, connection: ConnectionId) -> Option<Arc<Session>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.by_connection.get(&connection).cloned()
    }

    /// Forget which session `connection` carried.
    pub fn delete_connection(&self, connection: ConnectionId) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.by_connection.remove(&connection);
    }

    /// Join a pending session, if one exists for `location_id`.
    pub fn wait_for_pending(&self, location_id: &LocationId) -> Option<SessionReceiver> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let pending = state.pending.get_mut(location_id)?;
        let (tx, rx) = oneshot::channel();
        pending.waiters.push(tx);
        Some(rx)
    }

    /// Record a freshly dialled connection as the pending session for
    /// `location_id` and return a receiver for its outcome.
    pub fn make_pending_session(
        &self,
        location_id: LocationId,
        outgoing: Arc<dyn Connection>,
    ) -> WireResult<SessionReceiver> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.active.contains_key(&location_id) {
            return Err(WireError::InvariantViolation(format!(
                "Active session for location already exists: {location_id}"
            )));
        }
        if state.pending.contains_key(&location_id) {
            return Err(WireError::InvariantViolation(format!(
                "Pending session for location already exists: {location_id}"
            )));
        }
        let (tx, rx) = oneshot::channel();
        state.pending.insert(
            location_id,
            PendingSession {
                outgoing: Some(outgoing),
                waiters: vec![tx],
            },
        );
        Ok(rx)
    }

    /// Register an established session and wake everyone waiting for it.
    pub fn resolve_session(&self, session: Arc<Session>) -> WireResult<()> {
        let location_id = session.peer_location_id();
        let waiters = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if state.active.contains_key(&location_id) {
                return Err(WireError::InvariantViolation(format!(
                    "Unable to resolve session for {location_id}. Active session already exists."
                )));
            }
            state.active.insert(location_id.clone(), session.clone());
            state
                .by_connection
                .insert(session.connection().id(), session.clone());
            state
                .pending
                .remove(&location_id)
                .map(|pending| pending.waiters)
                .unwrap_or_default()
        };
        wake(waiters, || Ok(session.clone()));
        Ok(())
    }

    /// Forget a session whose connection ended.
    pub fn end_session(&self, session: &Session) {
        let location_id = session.peer_location_id();
        let waiters = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if state
                .active
                .get(&location_id)
                .is_some_and(|active| active.id() == session.id())
            {
                state.active.remove(&location_id);
            }
            state.by_connection.remove(&session.connection().id());
            state
                .pending
                .remove(&location_id)
                .map(|pending| pending.waiters)
                .unwrap_or_default()
        };
        wake(waiters, || {
            Err(WireError::SessionEnded("Session ended.".to_string()))
        });
    }

    /// Fail the pending session dialled over `connection`, if any.
    pub fn reject_pending_for_connection(
        &self,
        connection: ConnectionId,
        error: impl Fn() -> WireError,
    ) -> bool {
        let waiters = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let Some(location_id) = state
                .pending
                .iter()
                .find(|(_, pending)| {
                    pending
                        .outgoing
                        .as_ref()
                        .is_some_and(|outgoing| outgoing.id() == connection)
                })
                .map(|(location_id, _)| location_id.clone())
            else {
                return false;
            };
            state
                .pending
                .remove(&location_id)
                .map(|pending| pending.waiters)
                .unwrap_or_default()
        };
        wake(waiters, || Err(error()));
        true
    }

    /// Keep the waiters of a pending session but stop treating `connection`
    /// as its dial. Used when crossed hellos close our outgoing connection
    /// and the session will arrive on the peer's.
    pub fn detach_outgoing(&self, connection: ConnectionId) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        for pending in state.pending.values_mut() {
            if pending
                .outgoing
                .as_ref()
                .is_some_and(|outgoing| outgoing.id() == connection)
            {
                pending.outgoing = None;
                return true;
            }
        }
        false
    }

    /// Remove every session and fail every pending one.
    pub fn clear(&self) -> Vec<Arc<Session>> {
        let (sessions, waiters) = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.by_connection.clear();
            let sessions: Vec<_> = state.active.drain().map(|(_, s)| s).collect();
            let waiters: Vec<_> = state
                .pending
                .drain()
                .flat_map(|(_, pending)| pending.waiters)
                .collect();
            (sessions, waiters)
        };
        wake(waiters, || {
            Err(WireError::SessionEnded("Client shut down".to_string()))
        });
        sessions
    }
}
