//! Network locations and swiss numbers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Descriptor tag carried by every location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationKind {
    #[serde(rename = "ocapn-node")]
    OcapnNode,
}

/// Where a peer can be reached: `{type:'ocapn-node', transport, address, hints}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "type")]
    pub kind: LocationKind,
    /// Netlayer name, e.g. `tcp-testing-only` or `websocket`.
    pub transport: String,
    /// Transport-specific address.
    pub address: String,
    /// Free-form connection hints. Ordered so that encoding is canonical.
    #[serde(default)]
    pub hints: BTreeMap<String, String>,
}

impl Location {
    pub fn new(transport: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            kind: LocationKind::OcapnNode,
            transport: transport.into(),
            address: address.into(),
            hints: BTreeMap::new(),
        }
    }

    /// Add a connection hint.
    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }

    /// Key used to index sessions and outgoing connections.
    pub fn id(&self) -> LocationId {
        LocationId(format!("{}:{}", self.transport, self.address))
    }
}

/// Map key for a location (`transport:address`). Not part of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationId(pub String);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The canonical `my-location` envelope a peer signs to claim a location.
#[derive(Debug, Clone, Serialize)]
pub struct MyLocation<'a> {
    #[serde(rename = "type")]
    pub kind: MyLocationKind,
    pub location: &'a Location,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub enum MyLocationKind {
    #[serde(rename = "my-location")]
    MyLocation,
}

impl<'a> MyLocation<'a> {
    pub fn new(location: &'a Location) -> Self {
        Self {
            kind: MyLocationKind::MyLocation,
            location,
        }
    }

    /// Canonical bytes covered by a location signature.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// An unguessable capability name. Possession implies access.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SwissNum(#[serde(with = "crate::serde_compat::hex_bytes")] pub Vec<u8>);

impl SwissNum {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Generate a fresh random 32-byte swiss number.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for SwissNum {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

// Swiss numbers are secrets; never print them in full.
impl fmt::Debug for SwissNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SwissNum(<{} bytes>)", self.0.len())
    }
}
