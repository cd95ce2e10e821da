//! Two loopback clients talking CapTP.
//!
//! Alice publishes a counter under a swiss number. Bob enlivens the sturdy
//! ref, reads and bumps the counter, then calls through an unresolved result.

use anyhow::{anyhow, Context};
use ocapn_captp::{eventual, Capability, Promise, Value};
use ocapn_types::{ClientConfig, SwissNum};
use ocapn_wire::{Client, LoopbackNetlayer, LoopbackNetwork, Netlayer};
use std::sync::Mutex;
use tracing::info;

#[derive(Default)]
struct Counter {
    count: Mutex<i64>,
}

impl Counter {
    fn current(&self) -> i64 {
        *self.count.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Capability for Counter {
    fn get(&self, property: &str) -> Promise {
        match property {
            "count" => Promise::resolved(Value::Int(self.current())),
            other => Promise::rejected(Value::error(format!("Counter has no property {other:?}"))),
        }
    }

    fn invoke(&self, method: &str, args: Vec<Value>) -> Promise {
        match method {
            "add" => {
                let Some(by) = args.first().and_then(Value::as_int) else {
                    return Promise::rejected(Value::error("add expects an integer"));
                };
                let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
                *count += by;
                Promise::resolved(Value::Int(*count))
            }
            "makeChild" => Promise::resolved(Value::object(Counter::default())),
            other => Promise::rejected(Value::error(format!("Counter has no method {other:?}"))),
        }
    }

    fn interface(&self) -> &str {
        "Counter"
    }
}

fn settled(outcome: Result<Value, Value>) -> anyhow::Result<Value> {
    outcome.map_err(|reason| anyhow!("rejected: {reason:?}"))
}

pub fn cmd_demo(config: &ClientConfig) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(run(config))
}

async fn run(config: &ClientConfig) -> anyhow::Result<()> {
    let network = LoopbackNetwork::new();
    let client = |label: &str| -> anyhow::Result<(Client, ocapn_types::Location)> {
        let client = Client::new(ClientConfig {
            debug_label: label.to_string(),
            ..config.clone()
        });
        let netlayer = client
            .register_netlayer(|handlers, _| LoopbackNetlayer::new(&network, label, handlers))?;
        let location = netlayer.location().clone();
        Ok((client, location))
    };
    let (alice, alice_location) = client("alice")?;
    let (bob, _) = client("bob")?;

    let swiss = SwissNum::random();
    alice.register_sturdy_ref(swiss.clone(), Value::object(Counter::default()));
    let sturdy = alice.make_sturdy_ref(alice_location, swiss);
    info!(location_id = %sturdy.location.id(), "Published counter");

    let counter = settled(bob.enliven_sturdy_ref(&sturdy).await?.await)?;
    println!("fetched:      {counter:?}");

    let count = settled(eventual::get(&counter, "count").await)?;
    println!("count:        {count:?}");

    let added = settled(eventual::send(&counter, "add", vec![Value::Int(41)]).await)?;
    println!("add(41):      {added:?}");

    let child = eventual::send(&counter, "makeChild", vec![]);
    let pipelined = eventual::send(&Value::Promise(child), "add", vec![Value::Int(1)]);
    println!("child.add(1): {:?} (pipelined)", settled(pipelined.await)?);

    if let Some(session) = bob.sessions().active_sessions().first() {
        println!("session:      {}", session.id());
    }
    bob.shutdown();
    alice.shutdown();
    Ok(())
}
