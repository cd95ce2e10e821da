//! Eventual send: `E(target).method(args)` and `E.get(target).prop`.
//!
//! Works uniformly on local objects, remote presences and promises. A
//! pending promise with a handler forwards the operation immediately, which
//! is what lets calls pipeline on unsettled remote results; a pending
//! promise without one queues the operation until it settles.

use crate::promise::{Outcome, Promise};
use crate::value::Value;

enum Op {
    Get(String),
    Invoke(String, Vec<Value>),
}

/// Eventually read `property` from `target`.
pub fn get(target: &Value, property: &str) -> Promise {
    apply(target, Op::Get(property.to_string()))
}

/// Eventually invoke `method` on `target`.
pub fn send(target: &Value, method: &str, args: Vec<Value>) -> Promise {
    apply(target, Op::Invoke(method.to_string(), args))
}

fn apply(target: &Value, op: Op) -> Promise {
    match target {
        Value::Object(object) => match op {
            Op::Get(property) => object.get(&property),
            Op::Invoke(method, args) => object.invoke(&method, args),
        },
        Value::Promise(promise) => apply_to_promise(promise, op),
        Value::Record(fields) => match op {
            Op::Get(property) => match fields.get(&property) {
                Some(value) => Promise::resolved(value.clone()),
                None => Promise::resolved(Value::Undefined),
            },
            Op::Invoke(method, _) => Promise::rejected(Value::error(format!(
                "Cannot invoke {method:?} on a record"
            ))),
        },
        other => Promise::rejected(Value::error(format!(
            "Cannot deliver {} to {other:?}",
            match op {
                Op::Get(property) => format!("get {property:?}"),
                Op::Invoke(method, _) => format!("call {method:?}"),
            }
        ))),
    }
}

fn apply_to_promise(promise: &Promise, op: Op) -> Promise {
    match promise.outcome() {
        Some(Ok(value)) => apply(&value, op),
        Some(Err(reason)) => Promise::rejected(reason),
        None => {
            if let Some(handler) = promise.handler() {
                return match op {
                    Op::Get(property) => handler.get(&property),
                    Op::Invoke(method, args) => handler.invoke(&method, args),
                };
            }
            let (result, resolver) = Promise::pending();
            promise.then(move |outcome: Outcome| match outcome {
                Ok(value) => resolver.resolve(Value::Promise(apply(&value, op))),
                Err(reason) => resolver.reject(reason),
            });
            result
        }
    }
}
