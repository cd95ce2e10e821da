//! The bootstrap object each session exposes, and sturdy refs.

use ocapn_captp::{Capability, Promise, Value};
use ocapn_types::{Location, SwissNum};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Swiss number to object registrations.
///
/// Clones share one table. The client and every session's bootstrap object
/// hold the same table, so a registration is visible to sessions that
/// already exist.
#[derive(Clone, Default)]
pub struct SwissTable {
    entries: Arc<RwLock<HashMap<SwissNum, Value>>>,
}

impl SwissTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `object` under `swiss`, replacing any earlier registration.
    pub fn register(&self, swiss: SwissNum, object: Value) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(swiss, object);
    }

    pub fn lookup(&self, swiss: &SwissNum) -> Option<Value> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(swiss).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Answers `fetch(swissnum)` from the client's live swiss table.
pub struct BootstrapObject {
    label: String,
    swissnums: SwissTable,
}

impl BootstrapObject {
    pub fn new(label: impl Into<String>, swissnums: SwissTable) -> Self {
        Self {
            label: label.into(),
            swissnums,
        }
    }

    fn fetch(&self, args: &[Value]) -> Promise {
        let Some(bytes) = args.first().and_then(Value::as_bytes) else {
            return Promise::rejected(Value::error(format!(
                "{}: Bootstrap fetch: swissnum must be bytes",
                self.label
            )));
        };
        match self.swissnums.lookup(&SwissNum::new(bytes)) {
            Some(object) => Promise::resolved(object),
            None => Promise::rejected(Value::error(format!(
                "{}: Bootstrap fetch: Unknown swissnum for sturdyref: {}",
                self.label,
                hex::encode(bytes)
            ))),
        }
    }
}

impl Capability for BootstrapObject {
    fn invoke(&self, method: &str, args: Vec<Value>) -> Promise {
        match method {
            "fetch" => self.fetch(&args),
            other => Promise::rejected(Value::error(format!(
                "{}: Bootstrap has no method {other:?}",
                self.label
            ))),
        }
    }

    fn interface(&self) -> &str {
        "Bootstrap"
    }
}

/// A persistent-style reference: where an object lives and its swiss number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SturdyRef {
    /// Location hosting the object.
    pub location: Location,
    /// Key into that location's swiss table.
    pub swissnum: SwissNum,
}

impl SturdyRef {
    pub fn new(location: Location, swissnum: SwissNum) -> Self {
        Self { location, swissnum }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeter;

    impl Capability for Greeter {
        fn invoke(&self, _method: &str, _args: Vec<Value>) -> Promise {
            Promise::resolved(Value::string("hi"))
        }
    }

    #[test]
    fn test_fetch_known_and_unknown() {
        let table = SwissTable::new();
        let greeter = Value::object(Greeter);
        table.register(SwissNum::from("door"), greeter.clone());
        let boot = BootstrapObject::new("alice", table);

        let found = boot.invoke("fetch", vec![Value::Bytes(b"door".to_vec())]);
        assert_eq!(found.outcome(), Some(Ok(greeter)));

        let missing = boot.invoke("fetch", vec![Value::Bytes(vec![0xab])]);
        assert_eq!(
            missing.outcome(),
            Some(Err(Value::error(
                "alice: Bootstrap fetch: Unknown swissnum for sturdyref: ab"
            )))
        );
    }

    #[test]
    fn test_fetch_requires_bytes() {
        let boot = BootstrapObject::new("alice", SwissTable::new());
        let outcome = boot.invoke("fetch", vec![Value::Int(1)]).outcome().unwrap();
        assert!(outcome.is_err());
        assert!(boot.invoke("withdraw", vec![]).outcome().unwrap().is_err());
    }

    #[test]
    fn test_fetch_sees_later_registrations() {
        let table = SwissTable::new();
        let boot = BootstrapObject::new("alice", table.clone());
        let missing = boot.invoke("fetch", vec![Value::Bytes(b"late".to_vec())]);
        assert!(missing.outcome().unwrap().is_err());

        table.register(SwissNum::from("late"), Value::Int(9));
        let found = boot.invoke("fetch", vec![Value::Bytes(b"late".to_vec())]);
        assert_eq!(found.outcome(), Some(Ok(Value::Int(9))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_sturdy_ref_serializes_swissnum_as_hex() {
        let sturdy = SturdyRef::new(Location::new("loopback", "bob"), SwissNum::from("ok"));
        let json = serde_json::to_string(&sturdy).unwrap();
        assert!(json.ends_with(r#""swissnum":"6f6b"}"#));
    }
}
