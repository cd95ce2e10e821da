//! The OCapN client: owns netlayers, sessions and sturdy-ref registrations.
//!
//! A [`Client`] dials peers through registered [`Netlayer`]s and accepts
//! whatever they deliver through [`NetlayerHandlers`]. Data on a connection
//! without a session goes to the handshake; data on a connection with one
//! is decoded as CapTP and dispatched to that session's engine.

use crate::bootstrap::{BootstrapObject, SturdyRef, SwissTable};
use crate::connection::{Connection, Netlayer, NetlayerHandlers};
use crate::error::{WireError, WireResult};
use crate::handshake::{send_start_session, Handshake, ABORT_INTERNAL_ERROR};
use crate::message::{encode_frame, split_frames};
use crate::sessions::{PeerIdentity, Session, SessionManager, SessionReceiver};
use ocapn_captp::eventual;
use ocapn_captp::{
    Bootstrap, CapTp, CapTpError, CapTpMessage, CapTpOptions, CapTpResult, Promise, Value,
};
use ocapn_types::{ClientConfig, Location, SessionId, SwissNum};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Handle to a client. Clones share state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    netlayers: RwLock<HashMap<String, Arc<dyn Netlayer>>>,
    sessions: SessionManager,
    swissnums: SwissTable,
}

impl Client {
    /// Create a client with no netlayers and an empty swiss table.
    pub fn new(config: ClientConfig) -> Self {
        info!(label = %config.debug_label, captp_version = %config.captp_version, "OCapN client created");
        Self {
            inner: Arc::new(ClientInner {
                config,
                netlayers: RwLock::new(HashMap::new()),
                sessions: SessionManager::new(),
                swissnums: SwissTable::new(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Active and pending sessions.
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// Build a netlayer with this client's handlers and register it under
    /// its transport name.
    pub fn register_netlayer<N, F>(&self, make: F) -> WireResult<Arc<N>>
    where
        N: Netlayer + 'static,
        F: FnOnce(NetlayerHandlers, &ClientConfig) -> WireResult<N>,
    {
        let handlers = NetlayerHandlers::new(Arc::downgrade(&self.inner));
        let netlayer = Arc::new(make(handlers, &self.inner.config)?);
        let transport = netlayer.location().transport.clone();
        let mut netlayers = self
            .inner
            .netlayers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if netlayers.contains_key(&transport) {
            netlayer.shutdown();
            return Err(WireError::NetlayerExists(transport));
        }
        info!(
            label = %self.inner.config.debug_label,
            location_id = %netlayer.location().id(),
            "Netlayer registered"
        );
        netlayers.insert(transport, netlayer.clone());
        Ok(netlayer)
    }

    /// An established session with `location`: the active one, the pending
    /// one once it completes, or a new one dialled now.
    pub async fn provide_session(&self, location: &Location) -> WireResult<Arc<Session>> {
        let location_id = location.id();
        if let Some(session) = self.inner.sessions.active_session(&location_id) {
            debug!(location_id = %location_id, "Reusing active session");
            return Ok(session);
        }
        if let Some(waiter) = self.inner.sessions.wait_for_pending(&location_id) {
            debug!(location_id = %location_id, "Joining pending session");
            return await_session(waiter).await;
        }
        let waiter = self.establish_session(location).await?;
        await_session(waiter).await
    }

    async fn establish_session(&self, location: &Location) -> WireResult<SessionReceiver> {
        let location_id = location.id();
        let netlayer = self
            .inner
            .netlayers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&location.transport)
            .cloned()
            .ok_or_else(|| WireError::NoNetlayer(location.transport.clone()))?;
        if netlayer.location().id() == location_id {
            return Err(WireError::ConnectToSelf(location_id));
        }

        info!(location_id = %location_id, "Connecting");
        let connection = netlayer.connect(location).await?;
        let waiter = match self
            .inner
            .sessions
            .make_pending_session(location_id.clone(), connection.clone())
        {
            Ok(waiter) => waiter,
            Err(e) => {
                // Someone else got there while we were dialling.
                connection.end();
                if let Some(waiter) = self.inner.sessions.wait_for_pending(&location_id) {
                    return Ok(waiter);
                }
                return Err(e);
            }
        };
        send_start_session(connection.as_ref(), &self.inner.config.captp_version)?;
        Ok(waiter)
    }

    /// Feed data a netlayer received on `connection`.
    pub fn handle_message_data(
        &self,
        connection: &Arc<dyn Connection>,
        data: &[u8],
    ) -> WireResult<()> {
        self.inner.handle_message_data(connection, data)
    }

    /// Tell the client `connection` has closed.
    pub fn handle_connection_close(&self, connection: &Arc<dyn Connection>, reason: Option<&str>) {
        self.inner.handle_connection_close(connection, reason)
    }

    /// Make `object` reachable through `swiss` by sessions created from now on.
    pub fn register_sturdy_ref(&self, swiss: impl Into<SwissNum>, object: Value) {
        self.inner.swissnums.register(swiss.into(), object);
    }

    pub fn make_sturdy_ref(&self, location: Location, swissnum: impl Into<SwissNum>) -> SturdyRef {
        SturdyRef::new(location, swissnum.into())
    }

    /// Fetch the object a sturdy ref names. Sturdy refs to one of our own
    /// netlayers resolve locally without a session.
    pub async fn enliven_sturdy_ref(&self, sturdy_ref: &SturdyRef) -> WireResult<Promise> {
        if self.is_self_location(&sturdy_ref.location) {
            return Ok(match self.inner.swissnums.lookup(&sturdy_ref.swissnum) {
                Some(object) => Promise::resolved(object),
                None => Promise::rejected(Value::error(format!(
                    "{}: Unknown swissnum for sturdyref: {}",
                    self.inner.config.debug_label,
                    hex::encode(sturdy_ref.swissnum.as_bytes())
                ))),
            });
        }
        let session = self.provide_session(&sturdy_ref.location).await?;
        let bootstrap = Value::Promise(session.get_bootstrap());
        Ok(eventual::send(
            &bootstrap,
            "fetch",
            vec![Value::Bytes(sturdy_ref.swissnum.as_bytes().to_vec())],
        ))
    }

    fn is_self_location(&self, location: &Location) -> bool {
        let location_id = location.id();
        self.inner
            .netlayers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .any(|netlayer| netlayer.location().id() == location_id)
    }

    /// Shut down every netlayer and end every session.
    pub fn shutdown(&self) {
        info!(label = %self.inner.config.debug_label, "Shutting down");
        let netlayers: Vec<_> = self
            .inner
            .netlayers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, netlayer)| netlayer)
            .collect();
        for netlayer in netlayers {
            netlayer.shutdown();
        }
        for session in self.inner.sessions.clear() {
            session.abort("Client shut down");
            session.connection().end();
        }
    }
}

async fn await_session(waiter: SessionReceiver) -> WireResult<Arc<Session>> {
    waiter.await.map_err(|_| {
        WireError::SessionEnded("Pending session was dropped".to_string())
    })?
}

impl ClientInner {
    pub(crate) fn handle_message_data(
        &self,
        connection: &Arc<dyn Connection>,
        data: &[u8],
    ) -> WireResult<()> {
        if connection.is_destroyed() {
            debug!(connection = %connection.id(), bytes = data.len(), "Ignoring data on destroyed connection");
            return Ok(());
        }
        match self.sessions.session_for_connection(connection.id()) {
            Some(session) => self.handle_session_data(&session, data),
            None => {
                let prepare = |connection: &Arc<dyn Connection>, id: SessionId, peer: PeerIdentity| {
                    self.prepare_session(connection, id, peer)
                };
                Handshake {
                    sessions: &self.sessions,
                    captp_version: &self.config.captp_version,
                    max_frame_size: self.config.max_frame_size,
                    prepare_session: &prepare,
                }
                .handle_data(connection, data)
            }
        }
    }

    fn handle_session_data(&self, session: &Arc<Session>, data: &[u8]) -> WireResult<()> {
        let messages = split_frames(data, self.config.max_frame_size).and_then(|frames| {
            frames
                .into_iter()
                .map(|body| CapTpMessage::from_json(body).map_err(WireError::from))
                .collect::<WireResult<Vec<_>>>()
        });
        let messages = match messages {
            Ok(messages) => messages,
            Err(e) => {
                error!(
                    location_id = %session.peer_location_id(),
                    error = %e,
                    "Unexpected error while processing session message"
                );
                session.abort(ABORT_INTERNAL_ERROR);
                session.connection().end();
                self.sessions.end_session(session);
                return Err(e);
            }
        };

        for message in messages {
            let kind = message.kind();
            if !session.captp().dispatch(message) {
                warn!(location_id = %session.peer_location_id(), kind, "CapTP message rejected");
            }
            if session.is_aborted() {
                info!(location_id = %session.peer_location_id(), "CapTP aborted, closing session");
                session.connection().end();
                self.sessions.end_session(session);
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn handle_connection_close(
        &self,
        connection: &Arc<dyn Connection>,
        reason: Option<&str>,
    ) {
        let reason = reason.unwrap_or("Connection closed");
        match self.sessions.session_for_connection(connection.id()) {
            Some(session) => {
                info!(location_id = %session.peer_location_id(), reason, "Connection closed, ending session");
                session.abort(reason);
                self.sessions.end_session(&session);
            }
            None => {
                if self.sessions.reject_pending_for_connection(connection.id(), || {
                    WireError::SessionEnded("Connection closed during handshake.".to_string())
                }) {
                    debug!(connection = %connection.id(), "Rejected pending session");
                }
            }
        }
        self.sessions.delete_connection(connection.id());
    }

    /// Wire a CapTP engine to `connection` and wrap it in a session.
    fn prepare_session(
        &self,
        connection: &Arc<dyn Connection>,
        id: SessionId,
        peer: PeerIdentity,
    ) -> Session {
        let label = format!("{}->{}", self.config.debug_label, peer.location.id());
        let bootstrap = BootstrapObject::new(label.clone(), self.swissnums.clone());
        let sink_connection = connection.clone();
        let captp = CapTp::new(
            move |message: CapTpMessage| -> CapTpResult<()> {
                let body = message.to_json()?;
                sink_connection
                    .write(&encode_frame(&body))
                    .map_err(|e| CapTpError::SendFailed(e.to_string()))
            },
            CapTpOptions {
                label,
                epoch: self.config.epoch,
                bootstrap: Some(Bootstrap::Value(Value::object(bootstrap))),
                ..Default::default()
            },
        );
        Session::new(id, connection.clone(), peer, captp)
    }
}
