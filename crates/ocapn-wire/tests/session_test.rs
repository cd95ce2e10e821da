//! End-to-end session tests over the loopback netlayer.
//!
//! Clients share one `LoopbackNetwork`. Handshake edge cases
//! that need a misbehaving peer are driven through a recording connection
//! fed straight into `Client::handle_message_data`.

use ocapn_captp::{eventual, Capability, Promise, Value};
use ocapn_types::{ClientConfig, Location, SelfIdentity, SwissNum};
use ocapn_wire::connection::{Connection, ConnectionId};
use ocapn_wire::message::{decode_handshake, encode_message, split_frames};
use ocapn_wire::{
    Client, HandshakeMessage, LoopbackNetlayer, LoopbackNetwork, Netlayer, WireError, WireResult,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Counter {
    count: Mutex<i64>,
}

impl Capability for Counter {
    fn get(&self, property: &str) -> Promise {
        match property {
            "count" => Promise::resolved(Value::Int(*self.count.lock().unwrap())),
            other => Promise::rejected(Value::error(format!("no property {other}"))),
        }
    }

    fn invoke(&self, method: &str, args: Vec<Value>) -> Promise {
        match method {
            "add" => {
                let by = args.first().and_then(Value::as_int).unwrap_or(1);
                let mut count = self.count.lock().unwrap();
                *count += by;
                Promise::resolved(Value::Int(*count))
            }
            "makeChild" => Promise::resolved(Value::object(Counter::default())),
            other => Promise::rejected(Value::error(format!("no method {other}"))),
        }
    }

    fn interface(&self) -> &str {
        "Counter"
    }
}

fn node(network: &LoopbackNetwork, name: &str) -> (Client, Location) {
    node_with(network, ClientConfig::with_label(name), name)
}

fn node_with(network: &LoopbackNetwork, config: ClientConfig, address: &str) -> (Client, Location) {
    let client = Client::new(config);
    let netlayer = client
        .register_netlayer(|handlers, _| LoopbackNetlayer::new(network, address, handlers))
        .unwrap();
    let location = netlayer.location().clone();
    (client, location)
}

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// An incoming connection that records everything written to it.
struct RecordingConnection {
    id: ConnectionId,
    identity: SelfIdentity,
    written: Mutex<Vec<u8>>,
    ended: AtomicBool,
}

impl RecordingConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            identity: SelfIdentity::generate(Location::new("loopback", "alice")).unwrap(),
            written: Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
        })
    }

    fn sent(&self) -> Vec<HandshakeMessage> {
        let written = self.written.lock().unwrap();
        split_frames(&written, 1 << 20)
            .unwrap()
            .into_iter()
            .map(|body| decode_handshake(body).unwrap())
            .collect()
    }
}

impl Connection for RecordingConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn write(&self, bytes: &[u8]) -> WireResult<()> {
        if self.is_destroyed() {
            return Err(WireError::ConnectionClosed);
        }
        self.written.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    fn is_destroyed(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn is_outgoing(&self) -> bool {
        false
    }

    fn self_identity(&self) -> &SelfIdentity {
        &self.identity
    }
}

fn mallory_hello(version: &str) -> HandshakeMessage {
    let mallory = SelfIdentity::generate(Location::new("loopback", "mallory")).unwrap();
    HandshakeMessage::start_session(&mallory, version)
}

// ---------------------------------------------------------------------------
// Sessions over loopback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fetch_and_call_through_sturdy_ref() {
    let network = LoopbackNetwork::new();
    let (alice, alice_location) = node(&network, "alice");
    let (bob, _) = node(&network, "bob");
    alice.register_sturdy_ref("counter", Value::object(Counter::default()));

    let sturdy = alice.make_sturdy_ref(alice_location.clone(), "counter");
    let counter = within(bob.enliven_sturdy_ref(&sturdy)).await.unwrap();
    let counter = within(counter).await.unwrap();
    assert!(counter.as_object().is_some());

    let after = within(eventual::send(&counter, "add", vec![Value::Int(5)])).await;
    assert_eq!(after, Ok(Value::Int(5)));
    let count = within(eventual::get(&counter, "count")).await;
    assert_eq!(count, Ok(Value::Int(5)));

    assert_eq!(bob.sessions().active_count(), 1);
    let session = bob.sessions().active_session(&alice_location.id()).unwrap();
    assert_eq!(session.peer().location, alice_location);
}

#[tokio::test]
async fn test_calls_pipeline_on_unresolved_fetch() {
    let network = LoopbackNetwork::new();
    let (alice, alice_location) = node(&network, "alice");
    let (bob, _) = node(&network, "bob");
    alice.register_sturdy_ref("counter", Value::object(Counter::default()));

    let sturdy = alice.make_sturdy_ref(alice_location, "counter");
    let counter = within(bob.enliven_sturdy_ref(&sturdy)).await.unwrap();
    let child = eventual::send(&Value::Promise(counter), "makeChild", vec![]);
    let added = eventual::send(&Value::Promise(child.clone()), "add", vec![Value::Int(2)]);
    assert!(!child.is_settled());

    assert_eq!(within(added).await, Ok(Value::Int(2)));
}

#[tokio::test]
async fn test_unknown_swissnum_rejects() {
    let network = LoopbackNetwork::new();
    let (_alice, alice_location) = node(&network, "alice");
    let (bob, _) = node(&network, "bob");

    let sturdy = bob.make_sturdy_ref(alice_location, SwissNum::new(vec![0xde, 0xad]));
    let result = within(within(bob.enliven_sturdy_ref(&sturdy)).await.unwrap()).await;
    match result {
        Err(Value::Error(message)) => {
            assert!(message.contains("Unknown swissnum for sturdyref: dead"), "{message}")
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_sturdy_ref_to_self_resolves_locally() {
    let network = LoopbackNetwork::new();
    let (alice, alice_location) = node(&network, "alice");
    let counter = Value::object(Counter::default());
    alice.register_sturdy_ref("counter", counter.clone());

    let sturdy = alice.make_sturdy_ref(alice_location, "counter");
    let fetched = within(alice.enliven_sturdy_ref(&sturdy)).await.unwrap();
    assert_eq!(within(fetched).await, Ok(counter));
    assert_eq!(alice.sessions().active_count(), 0);
}

#[tokio::test]
async fn test_provide_session_reuses_pending_and_active() {
    let network = LoopbackNetwork::new();
    let (alice, _) = node(&network, "alice");
    let (bob, bob_location) = node(&network, "bob");

    let (first, second) = within(async {
        tokio::join!(
            alice.provide_session(&bob_location),
            alice.provide_session(&bob_location)
        )
    })
    .await;
    let first = first.unwrap();
    assert!(Arc::ptr_eq(&first, &second.unwrap()));

    let third = within(alice.provide_session(&bob_location)).await.unwrap();
    assert!(Arc::ptr_eq(&first, &third));
    eventually("bob's session", || bob.sessions().active_count() == 1).await;
    assert_eq!(bob.sessions().active_sessions()[0].id(), first.id());
}

#[tokio::test]
async fn test_crossed_hellos_leave_one_session() {
    let network = LoopbackNetwork::new();
    let (alice, alice_location) = node(&network, "alice");
    let (bob, bob_location) = node(&network, "bob");

    let (from_alice, from_bob) = within(async {
        tokio::join!(
            alice.provide_session(&bob_location),
            bob.provide_session(&alice_location)
        )
    })
    .await;
    let from_alice = from_alice.unwrap();
    let from_bob = from_bob.unwrap();

    assert_eq!(from_alice.id(), from_bob.id());
    assert_ne!(
        from_alice.connection().is_outgoing(),
        from_bob.connection().is_outgoing()
    );
    assert_eq!(alice.sessions().active_count(), 1);
    assert_eq!(bob.sessions().active_count(), 1);
    assert_eq!(alice.sessions().pending_count(), 0);
    assert_eq!(bob.sessions().pending_count(), 0);

    // The survivor carries CapTP.
    bob.register_sturdy_ref("counter", Value::object(Counter::default()));
    let sturdy = bob.make_sturdy_ref(bob_location, "counter");
    let counter = within(alice.enliven_sturdy_ref(&sturdy)).await.unwrap();
    let added = eventual::send(&Value::Promise(counter), "add", vec![Value::Int(3)]);
    assert_eq!(within(added).await, Ok(Value::Int(3)));
}

#[tokio::test]
async fn test_registrations_after_session_are_fetchable_over_it() {
    let network = LoopbackNetwork::new();
    let (alice, alice_location) = node(&network, "alice");
    let (bob, _) = node(&network, "bob");

    let session = within(bob.provide_session(&alice_location)).await.unwrap();
    alice.register_sturdy_ref("late", Value::object(Counter::default()));

    let sturdy = bob.make_sturdy_ref(alice_location.clone(), "late");
    let counter = within(bob.enliven_sturdy_ref(&sturdy)).await.unwrap();
    let added = eventual::send(&Value::Promise(counter), "add", vec![Value::Int(4)]);
    assert_eq!(within(added).await, Ok(Value::Int(4)));

    let reused = bob.sessions().active_session(&alice_location.id()).unwrap();
    assert_eq!(reused.id(), session.id());
    assert_eq!(bob.sessions().active_count(), 1);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_version_mismatch_rejects_dialler() {
    let network = LoopbackNetwork::new();
    let (alice, _) = node(&network, "alice");
    let old = ClientConfig {
        captp_version: "0.9".to_string(),
        ..ClientConfig::with_label("bob")
    };
    let (bob, bob_location) = node_with(&network, old, "bob");

    let err = within(alice.provide_session(&bob_location)).await.unwrap_err();
    match err {
        WireError::PeerAborted(reason) => assert_eq!(reason, "invalid-version"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(alice.sessions().pending_count(), 0);
    assert_eq!(bob.sessions().active_count(), 0);
}

#[tokio::test]
async fn test_close_during_handshake_rejects_pending() {
    let network = LoopbackNetwork::new();
    let (alice, _) = node(&network, "alice");
    // A listener whose client is gone never answers.
    let silent = {
        let ghost = Client::new(ClientConfig::with_label("ghost"));
        ghost
            .register_netlayer(|handlers, _| LoopbackNetlayer::new(&network, "ghost", handlers))
            .unwrap()
    };
    let ghost_location = silent.location().clone();

    let dialling = {
        let alice = alice.clone();
        tokio::spawn(async move { alice.provide_session(&ghost_location).await })
    };
    eventually("pending session", || alice.sessions().pending_count() == 1).await;
    silent.shutdown();

    let err = within(dialling).await.unwrap().unwrap_err();
    assert!(matches!(err, WireError::SessionEnded(_)), "{err}");
    assert_eq!(alice.sessions().pending_count(), 0);
}

#[tokio::test]
async fn test_no_netlayer_and_connect_to_self() {
    let network = LoopbackNetwork::new();
    let (alice, alice_location) = node(&network, "alice");

    let err = alice
        .provide_session(&Location::new("onion", "abc"))
        .await
        .unwrap_err();
    assert!(matches!(err, WireError::NoNetlayer(t) if t == "onion"));

    let err = alice.provide_session(&alice_location).await.unwrap_err();
    assert!(matches!(err, WireError::ConnectToSelf(_)));

    let err = alice
        .provide_session(&Location::new("loopback", "nobody"))
        .await
        .unwrap_err();
    assert!(matches!(err, WireError::UnknownLocation(_)));
    assert_eq!(alice.sessions().pending_count(), 0);
}

#[tokio::test]
async fn test_abort_ends_session_on_both_sides() {
    let network = LoopbackNetwork::new();
    let (alice, alice_location) = node(&network, "alice");
    let (bob, _) = node(&network, "bob");

    let session = within(bob.provide_session(&alice_location)).await.unwrap();
    eventually("alice's session", || alice.sessions().active_count() == 1).await;

    session.abort("done here");
    assert!(session.is_aborted());
    eventually("alice to drop the session", || alice.sessions().active_count() == 0).await;
    eventually("bob to drop the session", || bob.sessions().active_count() == 0).await;
    assert!(session.connection().is_destroyed());
}

#[tokio::test]
async fn test_shutdown_ends_peer_sessions() {
    let network = LoopbackNetwork::new();
    let (alice, alice_location) = node(&network, "alice");
    let (bob, _) = node(&network, "bob");

    within(bob.provide_session(&alice_location)).await.unwrap();
    eventually("alice's session", || alice.sessions().active_count() == 1).await;

    alice.shutdown();
    assert_eq!(alice.sessions().active_count(), 0);
    assert_eq!(network.listeners(), 1);
    eventually("bob to notice", || bob.sessions().active_count() == 0).await;
}

// ---------------------------------------------------------------------------
// Handshake validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_forged_location_signature_is_refused() {
    let client = Client::new(ClientConfig::with_label("alice"));
    let connection = RecordingConnection::new();
    let as_dyn: Arc<dyn Connection> = connection.clone();

    let forger = SelfIdentity::generate(Location::new("loopback", "mallory")).unwrap();
    let victim = SelfIdentity::generate(Location::new("loopback", "mallory")).unwrap();
    let forged = HandshakeMessage::StartSession {
        captp_version: "1.0".to_string(),
        session_public_key: forger.public_key().descriptor(),
        location: victim.location.clone(),
        location_signature: victim.location_signature.clone(),
    };

    client
        .handle_message_data(&as_dyn, &encode_message(&forged).unwrap())
        .unwrap();

    assert_eq!(
        connection.sent(),
        vec![HandshakeMessage::abort("Invalid location signature")]
    );
    assert!(connection.is_destroyed());
    assert_eq!(client.sessions().active_count(), 0);
}

#[tokio::test]
async fn test_wrong_version_is_refused() {
    let client = Client::new(ClientConfig::with_label("alice"));
    let connection = RecordingConnection::new();
    let as_dyn: Arc<dyn Connection> = connection.clone();

    client
        .handle_message_data(&as_dyn, &encode_message(&mallory_hello("2.0")).unwrap())
        .unwrap();

    assert_eq!(connection.sent(), vec![HandshakeMessage::abort("invalid-version")]);
    assert!(connection.is_destroyed());
    assert_eq!(client.sessions().active_count(), 0);
}

#[tokio::test]
async fn test_valid_hello_on_incoming_connection_is_answered() {
    let client = Client::new(ClientConfig::with_label("alice"));
    let connection = RecordingConnection::new();
    let as_dyn: Arc<dyn Connection> = connection.clone();

    client
        .handle_message_data(&as_dyn, &encode_message(&mallory_hello("1.0")).unwrap())
        .unwrap();

    let sent = connection.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0],
        HandshakeMessage::start_session(connection.self_identity(), "1.0")
    );
    assert!(!connection.is_destroyed());
    assert!(client
        .sessions()
        .session_for_connection(connection.id())
        .is_some());
}

#[tokio::test]
async fn test_second_hello_on_same_connection_is_invariant_violation() {
    let client = Client::new(ClientConfig::with_label("alice"));
    let connection = RecordingConnection::new();
    let as_dyn: Arc<dyn Connection> = connection.clone();

    let hello = encode_message(&mallory_hello("1.0")).unwrap();
    let mut twice = hello.clone();
    twice.extend_from_slice(&hello);

    let err = client.handle_message_data(&as_dyn, &twice).unwrap_err();
    assert!(matches!(err, WireError::InvariantViolation(_)), "{err}");

    let sent = connection.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1], HandshakeMessage::abort("internal error"));
    assert!(connection.is_destroyed());
}

#[tokio::test]
async fn test_data_on_destroyed_connection_is_ignored() {
    let client = Client::new(ClientConfig::with_label("alice"));
    let connection = RecordingConnection::new();
    connection.end();
    let as_dyn: Arc<dyn Connection> = connection.clone();

    client
        .handle_message_data(&as_dyn, &encode_message(&mallory_hello("1.0")).unwrap())
        .unwrap();
    assert!(connection.sent().is_empty());
    assert_eq!(client.sessions().active_count(), 0);
}
