//! OCapN sessions: location identity, session establishment and the client.
//!
//! Peers exchange signed `op:start-session` messages over a [`Connection`]
//! produced by a [`Netlayer`]. Once both sides have verified each other's
//! location signature the connection carries CapTP for the rest of its life.
//!
//! ## Architecture
//!
//! - **Client**: owns netlayers, the session manager and sturdy-ref registrations
//! - **SessionManager**: active and pending sessions, keyed by peer location
//! - **Handshake**: start-session validation and crossed-hello resolution
//! - **LoopbackNetlayer**: in-process transport for tests and demos

pub mod bootstrap;
pub mod client;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod loopback;
pub mod message;
pub mod sessions;

pub use bootstrap::{BootstrapObject, SturdyRef, SwissTable};
pub use client::Client;
pub use connection::{Connection, ConnectionId, Netlayer, NetlayerHandlers};
pub use error::{WireError, WireResult};
pub use loopback::{LoopbackNetlayer, LoopbackNetwork};
pub use message::HandshakeMessage;
pub use sessions::{PeerIdentity, Session, SessionManager};
