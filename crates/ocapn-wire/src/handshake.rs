//! Session establishment over a fresh connection.
//!
//! Each `op:start-session` is checked in a fixed order: CapTP version,
//! existing session on the connection, existing session for the peer,
//! location signature, then crossed hellos. Problems the peer caused are
//! answered with `op:abort` and close the connection. Broken invariants are
//! returned as [`WireError::InvariantViolation`]; the caller of
//! [`Handshake::handle_data`] sees them after the peer has been sent
//! `op:abort('internal error')`.

use crate::connection::Connection;
use crate::error::{WireError, WireResult};
use crate::message::{decode_handshake, encode_message, split_frames, HandshakeMessage};
use crate::sessions::{PeerIdentity, Session, SessionManager};
use ocapn_types::identity::verify_location_signature;
use ocapn_types::{PublicKey, PublicKeyId, SessionId};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Abort reason for a peer speaking another CapTP version.
pub const ABORT_INVALID_VERSION: &str = "invalid-version";
/// Abort reason for a location signature that does not verify.
pub const ABORT_INVALID_SIGNATURE: &str = "Invalid location signature";
/// Abort reason sent on the losing connection of a crossed hello.
pub const ABORT_CROSSED_HELLOS: &str = "Crossed hellos mitigated";
/// Abort reason for a broken local invariant.
pub const ABORT_INTERNAL_ERROR: &str = "internal error";

/// Send our `op:start-session` on `connection`.
pub fn send_start_session(connection: &dyn Connection, captp_version: &str) -> WireResult<()> {
    let message = HandshakeMessage::start_session(connection.self_identity(), captp_version);
    connection.write(&encode_message(&message)?)
}

/// Send `op:abort(reason)` and end the connection.
pub fn send_abort_and_close(connection: &dyn Connection, reason: &str) {
    match encode_message(&HandshakeMessage::abort(reason)) {
        Ok(bytes) => {
            if let Err(e) = connection.write(&bytes) {
                debug!(connection = %connection.id(), error = %e, "Could not deliver op:abort");
            }
        }
        Err(e) => error!(error = %e, "Failed to encode op:abort"),
    }
    connection.end();
}

/// Which of two crossed connections survives.
///
/// `outgoing_id` is our key on the connection we dialled, `incoming_id` the
/// peer's key on the connection they dialled. The outgoing connection wins
/// iff its id is greater as unsigned bytes. Both peers reach the same answer.
pub fn outgoing_survives(outgoing_id: &PublicKeyId, incoming_id: &PublicKeyId) -> bool {
    outgoing_id > incoming_id
}

/// Builds the CapTP side of a session once the handshake has succeeded.
pub(crate) type PrepareSession<'a> =
    &'a dyn Fn(&Arc<dyn Connection>, SessionId, PeerIdentity) -> Session;

/// Everything handshake processing needs from the client.
pub(crate) struct Handshake<'a> {
    /// The client's session manager.
    pub sessions: &'a SessionManager,
    /// Version we speak; a peer announcing another one is aborted.
    pub captp_version: &'a str,
    /// Largest frame accepted before the session exists.
    pub max_frame_size: u32,
    /// Builds the session once the peer is verified.
    pub prepare_session: PrepareSession<'a>,
}

impl Handshake<'_> {
    /// Process handshake-phase data received on `connection`.
    pub fn handle_data(&self, connection: &Arc<dyn Connection>, data: &[u8]) -> WireResult<()> {
        let result = self.process(connection, data);
        if let Err(e) = &result {
            error!(
                connection = %connection.id(),
                error = %e,
                "Unexpected error while processing handshake message"
            );
            send_abort_and_close(connection.as_ref(), ABORT_INTERNAL_ERROR);
            self.sessions.delete_connection(connection.id());
        }
        result
    }

    fn process(&self, connection: &Arc<dyn Connection>, data: &[u8]) -> WireResult<()> {
        for body in split_frames(data, self.max_frame_size)? {
            let message = decode_handshake(body)?;
            if connection.is_destroyed() {
                info!(
                    connection = %connection.id(),
                    kind = message.kind(),
                    "Received message after connection was destroyed"
                );
                continue;
            }
            self.handle_message(connection, message)?;
        }
        Ok(())
    }

    fn handle_message(
        &self,
        connection: &Arc<dyn Connection>,
        message: HandshakeMessage,
    ) -> WireResult<()> {
        debug!(connection = %connection.id(), kind = message.kind(), "Handling handshake message");
        match message {
            HandshakeMessage::StartSession {
                captp_version,
                session_public_key,
                location,
                location_signature,
            } => {
                if captp_version != self.captp_version {
                    warn!(
                        connection = %connection.id(),
                        theirs = %captp_version,
                        ours = %self.captp_version,
                        "Abort during start-session with invalid version"
                    );
                    send_abort_and_close(connection.as_ref(), ABORT_INVALID_VERSION);
                    self.sessions.delete_connection(connection.id());
                    return Ok(());
                }

                let location_id = location.id();
                if self
                    .sessions
                    .session_for_connection(connection.id())
                    .is_some()
                {
                    return Err(WireError::InvariantViolation(format!(
                        "Session already exists on {}",
                        connection.id()
                    )));
                }
                if self.sessions.active_session(&location_id).is_some() {
                    return Err(WireError::InvariantViolation(format!(
                        "Active session already exists for {location_id}"
                    )));
                }

                let peer_key = match PublicKey::from_descriptor(&session_public_key).and_then(
                    |key| {
                        verify_location_signature(&location, &location_signature, &key)
                            .map(|()| key)
                    },
                ) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(location_id = %location_id, error = %e, "Rejecting start-session");
                        send_abort_and_close(connection.as_ref(), ABORT_INVALID_SIGNATURE);
                        self.sessions.delete_connection(connection.id());
                        return Ok(());
                    }
                };
                debug!(location_id = %location_id, "Location signature valid");

                if let Some(outgoing) = self.sessions.outgoing_connection(&location_id) {
                    if outgoing.id() != connection.id() {
                        let ours = outgoing.self_identity().public_key().id();
                        let (to_close, incoming_closed) =
                            if outgoing_survives(&ours, &peer_key.id()) {
                                (connection.clone(), true)
                            } else {
                                (outgoing, false)
                            };
                        info!(
                            location_id = %location_id,
                            closing = %to_close.id(),
                            "Crossed hellos"
                        );
                        if !incoming_closed {
                            self.sessions.detach_outgoing(to_close.id());
                        }
                        send_abort_and_close(to_close.as_ref(), ABORT_CROSSED_HELLOS);
                        self.sessions.delete_connection(to_close.id());
                        if incoming_closed {
                            return Ok(());
                        }
                    }
                }

                if !connection.is_outgoing() {
                    debug!(location_id = %location_id, "Sending op:start-session");
                    send_start_session(connection.as_ref(), self.captp_version)?;
                }

                let self_key_id = connection.self_identity().public_key().id();
                let session_id = SessionId::from_key_ids(&self_key_id, &peer_key.id());
                let peer = PeerIdentity {
                    public_key: peer_key,
                    location,
                    location_signature,
                };
                let session = Arc::new((self.prepare_session)(connection, session_id, peer));
                self.sessions.resolve_session(session)?;
                info!(location_id = %location_id, session_id = %session_id, "Session established");
                Ok(())
            }

            HandshakeMessage::Abort { reason } => {
                info!(connection = %connection.id(), reason = %reason, "Received op:abort");
                if reason == ABORT_CROSSED_HELLOS {
                    self.sessions.detach_outgoing(connection.id());
                } else {
                    self.sessions
                        .reject_pending_for_connection(connection.id(), || {
                            WireError::PeerAborted(reason.clone())
                        });
                }
                connection.end();
                self.sessions.delete_connection(connection.id());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_survives_iff_greater() {
        let low = PublicKeyId([0x01; 32]);
        let mut high_bytes = [0x01; 32];
        high_bytes[31] = 0x02;
        let high = PublicKeyId(high_bytes);
        assert!(outgoing_survives(&high, &low));
        assert!(!outgoing_survives(&low, &high));
        assert!(!outgoing_survives(&low, &low));
    }

    #[test]
    fn test_comparison_is_unsigned() {
        let mut top = [0u8; 32];
        top[0] = 0x80;
        assert!(outgoing_survives(&PublicKeyId(top), &PublicKeyId([0x7f; 32])));
    }
}
