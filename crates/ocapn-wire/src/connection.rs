//! Transport seams: connections, netlayers, and the handlers a netlayer
//! reports inbound data to.

use crate::client::ClientInner;
use crate::error::WireResult;
use async_trait::async_trait;
use ocapn_types::{Location, SelfIdentity};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Process-unique connection identifier. Session bookkeeping is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnectionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One ordered, reliable byte pipe to a peer. Exists before any session.
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Queue bytes for the peer. Fails once the connection is destroyed.
    fn write(&self, bytes: &[u8]) -> WireResult<()>;

    /// Close the connection. Idempotent.
    fn end(&self);

    fn is_destroyed(&self) -> bool;

    /// True if this side dialled the connection.
    fn is_outgoing(&self) -> bool;

    /// The ephemeral identity this side presents on this connection.
    fn self_identity(&self) -> &SelfIdentity;
}

/// Transport adaptor that produces connections.
#[async_trait]
pub trait Netlayer: Send + Sync {
    /// Where peers can reach this netlayer.
    fn location(&self) -> &Location;

    /// Dial `location`. The returned connection is outgoing.
    async fn connect(&self, location: &Location) -> WireResult<Arc<dyn Connection>>;

    /// Stop accepting connections and end the open ones.
    fn shutdown(&self);
}

/// Callbacks a netlayer uses to hand inbound events to its client.
///
/// Holds the client weakly: a netlayer outliving its client drops events.
#[derive(Clone)]
pub struct NetlayerHandlers {
    client: Weak<ClientInner>,
}

impl NetlayerHandlers {
    pub(crate) fn new(client: Weak<ClientInner>) -> Self {
        Self { client }
    }

    /// Hand bytes read from `connection` to the client.
    pub fn handle_message_data(&self, connection: &Arc<dyn Connection>, data: &[u8]) {
        match self.client.upgrade() {
            Some(client) => {
                // Errors were already answered on the connection and logged.
                let _ = client.handle_message_data(connection, data);
            }
            None => debug!(connection = %connection.id(), "Client gone, dropping data"),
        }
    }

    /// Report that `connection` has closed.
    pub fn handle_connection_close(&self, connection: &Arc<dyn Connection>, reason: Option<&str>) {
        if let Some(client) = self.client.upgrade() {
            client.handle_connection_close(connection, reason);
        }
    }
}

impl fmt::Debug for NetlayerHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetlayerHandlers")
            .field("client_alive", &(self.client.strong_count() > 0))
            .finish()
    }
}
