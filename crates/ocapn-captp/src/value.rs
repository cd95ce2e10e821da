//! Passable values and the capability trait.

use crate::promise::Promise;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An object that can be referenced and invoked across a connection.
///
/// Both methods return a [`Promise`] so that local objects and remote
/// presences look the same to callers. Business errors are reported by
/// returning a rejected promise.
pub trait Capability: Send + Sync {
    /// Property read. Objects without readable properties reject.
    fn get(&self, property: &str) -> Promise {
        Promise::rejected(Value::error(format!(
            "{} has no property {property:?}",
            self.interface()
        )))
    }

    fn invoke(&self, method: &str, args: Vec<Value>) -> Promise;

    /// Short description used in error messages and logs.
    fn interface(&self) -> &str {
        "Remotable"
    }
}

/// Shared handle to a capability. Identity is the allocation.
pub type ObjectRef = Arc<dyn Capability>;

pub(crate) fn object_id(object: &ObjectRef) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

/// Everything CapTP can carry.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// String-keyed record, passed by copy.
    Record(BTreeMap<String, Value>),
    /// An error passed by copy. Rejection reasons are usually this.
    Error(String),
    /// A local object or a presence for a remote one. Passed by reference.
    Object(ObjectRef),
    /// A local or remote promise. Passed by reference.
    Promise(Promise),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Value::Error(message.into())
    }

    pub fn object<C: Capability + 'static>(capability: C) -> Self {
        Value::Object(Arc::new(capability))
    }

    pub fn record<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Identity of a reference value; `None` for data.
    pub fn ref_id(&self) -> Option<usize> {
        match self {
            Value::Object(o) => Some(object_id(o)),
            Value::Promise(p) => Some(p.id()),
            _ => None,
        }
    }

    /// Error text of a rejection reason, for logs and messages.
    pub fn describe(&self) -> String {
        match self {
            Value::Error(message) => message.clone(),
            Value::String(s) => s.clone(),
            other => format!("{other:?}"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => object_id(a) == object_id(b),
            (Value::Promise(a), Value::Promise(b)) => a.same(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "bytes({})", b.len()),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Record(fields) => f.debug_map().entries(fields).finish(),
            Value::Error(message) => write!(f, "Error({message:?})"),
            Value::Object(o) => write!(f, "Object({})", o.interface()),
            Value::Promise(p) => write!(f, "{p:?}"),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Value::Object(o)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}
