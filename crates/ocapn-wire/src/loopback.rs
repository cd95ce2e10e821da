//! In-process netlayer for tests and demos.
//!
//! A [`LoopbackNetwork`] is a shared address book. Each [`LoopbackNetlayer`]
//! listens on one address in it. Connecting creates a pair of connections
//! joined by unbounded channels; a spawned task per side delivers frames to
//! that side's client in order, so every `write` arrives as one
//! `handle_message_data` call.

use crate::connection::{Connection, ConnectionId, Netlayer, NetlayerHandlers};
use crate::error::{WireError, WireResult};
use async_trait::async_trait;
use ocapn_types::{Location, SelfIdentity};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

/// Transport name of loopback locations.
pub const LOOPBACK_TRANSPORT: &str = "loopback";

enum Delivery {
    /// One write from the other side.
    Data(Vec<u8>),
    /// The connection ended, with the reason.
    Closed(String),
}

type Outbox = mpsc::UnboundedSender<Delivery>;

struct Endpoint {
    location: Location,
    handlers: NetlayerHandlers,
    connections: Arc<Mutex<Vec<Arc<LoopbackConnection>>>>,
}

/// Shared address book of loopback listeners.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    endpoints: Arc<RwLock<HashMap<String, Endpoint>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered listening addresses.
    pub fn listeners(&self) -> usize {
        self.endpoints.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// One end of an in-process connection.
pub struct LoopbackConnection {
    id: ConnectionId,
    outgoing: bool,
    identity: SelfIdentity,
    /// Frames for the other side.
    peer: Mutex<Option<Outbox>>,
    /// Our own delivery queue; used to report our own close.
    inbox: Mutex<Option<Outbox>>,
    destroyed: AtomicBool,
}

impl LoopbackConnection {
    fn new(outgoing: bool, identity: SelfIdentity, peer: Outbox, inbox: Outbox) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            outgoing,
            identity,
            peer: Mutex::new(Some(peer)),
            inbox: Mutex::new(Some(inbox)),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Mark destroyed and drop both senders. Returns false if already done.
    fn close(&self) -> (bool, Option<Outbox>, Option<Outbox>) {
        let first = !self.destroyed.swap(true, Ordering::SeqCst);
        let peer = self.peer.lock().unwrap_or_else(|e| e.into_inner()).take();
        let inbox = self.inbox.lock().unwrap_or_else(|e| e.into_inner()).take();
        (first, peer, inbox)
    }
}

impl Connection for LoopbackConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn write(&self, bytes: &[u8]) -> WireResult<()> {
        if self.is_destroyed() {
            return Err(WireError::ConnectionClosed);
        }
        let peer = self.peer.lock().unwrap_or_else(|e| e.into_inner());
        match peer.as_ref() {
            Some(tx) => tx
                .send(Delivery::Data(bytes.to_vec()))
                .map_err(|_| WireError::ConnectionClosed),
            None => Err(WireError::ConnectionClosed),
        }
    }

    fn end(&self) {
        let (first, peer, inbox) = self.close();
        if !first {
            return;
        }
        debug!(connection = %self.id, "Loopback connection ended");
        if let Some(peer) = peer {
            let _ = peer.send(Delivery::Closed("Peer ended connection".to_string()));
        }
        if let Some(inbox) = inbox {
            let _ = inbox.send(Delivery::Closed("Connection ended".to_string()));
        }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn is_outgoing(&self) -> bool {
        self.outgoing
    }

    fn self_identity(&self) -> &SelfIdentity {
        &self.identity
    }
}

/// Deliver frames for one side until its connection closes.
fn spawn_pump(
    connection: Arc<LoopbackConnection>,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    handlers: NetlayerHandlers,
) {
    tokio::spawn(async move {
        let as_dyn: Arc<dyn Connection> = connection.clone();
        let reason = loop {
            match rx.recv().await {
                Some(Delivery::Data(bytes)) => handlers.handle_message_data(&as_dyn, &bytes),
                Some(Delivery::Closed(reason)) => break reason,
                None => break "Connection dropped".to_string(),
            }
        };
        connection.close();
        handlers.handle_connection_close(&as_dyn, Some(&reason));
    });
}

/// A netlayer listening on one loopback address.
pub struct LoopbackNetlayer {
    network: LoopbackNetwork,
    location: Location,
    handlers: NetlayerHandlers,
    connections: Arc<Mutex<Vec<Arc<LoopbackConnection>>>>,
}

impl LoopbackNetlayer {
    /// Listen on `address` in `network`.
    pub fn new(
        network: &LoopbackNetwork,
        address: impl Into<String>,
        handlers: NetlayerHandlers,
    ) -> WireResult<Self> {
        let address = address.into();
        let location = Location::new(LOOPBACK_TRANSPORT, address.clone());
        let connections = Arc::new(Mutex::new(Vec::new()));
        let mut endpoints = network
            .endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if endpoints.contains_key(&address) {
            return Err(WireError::AddressInUse(address));
        }
        endpoints.insert(
            address,
            Endpoint {
                location: location.clone(),
                handlers: handlers.clone(),
                connections: connections.clone(),
            },
        );
        Ok(Self {
            network: network.clone(),
            location,
            handlers,
            connections,
        })
    }

    /// Connections this netlayer dialled or accepted that are still open.
    pub fn open_connections(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| !c.is_destroyed())
            .count()
    }
}

#[async_trait]
impl Netlayer for LoopbackNetlayer {
    fn location(&self) -> &Location {
        &self.location
    }

    async fn connect(&self, location: &Location) -> WireResult<Arc<dyn Connection>> {
        if location.transport != LOOPBACK_TRANSPORT {
            return Err(WireError::NoNetlayer(location.transport.clone()));
        }
        let (their_location, their_handlers, their_connections) = {
            let endpoints = self
                .network
                .endpoints
                .read()
                .unwrap_or_else(|e| e.into_inner());
            let endpoint = endpoints
                .get(&location.address)
                .ok_or_else(|| WireError::UnknownLocation(location.id()))?;
            (
                endpoint.location.clone(),
                endpoint.handlers.clone(),
                endpoint.connections.clone(),
            )
        };

        let (to_us, our_rx) = mpsc::unbounded_channel();
        let (to_them, their_rx) = mpsc::unbounded_channel();
        let ours = LoopbackConnection::new(
            true,
            SelfIdentity::generate(self.location.clone())?,
            to_them.clone(),
            to_us.clone(),
        );
        let theirs = LoopbackConnection::new(
            false,
            SelfIdentity::generate(their_location)?,
            to_us,
            to_them,
        );
        debug!(
            from = %self.location.id(),
            to = %location.id(),
            ours = %ours.id,
            theirs = %theirs.id,
            "Loopback connection opened"
        );

        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ours.clone());
        their_connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(theirs.clone());
        spawn_pump(ours.clone(), our_rx, self.handlers.clone());
        spawn_pump(theirs, their_rx, their_handlers);
        Ok(ours)
    }

    fn shutdown(&self) {
        self.network
            .endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.location.address);
        let connections: Vec<_> = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for connection in connections {
            connection.end();
        }
    }
}
