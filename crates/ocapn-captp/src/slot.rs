//! Wire identifiers for capability references.
//!
//! A slot is written from the sender's point of view: `o+3` is object 3
//! exported by the sender, `p-2` is promise 2 exported by the receiver, `q-1`
//! is question 1 whose answer lives on the receiver. Every slot read off the
//! wire is [`flip`](Slot::flip)ped before use so that tables are always keyed
//! from the local point of view.

use crate::error::CapTpError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Which side hosts the referenced value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotDirection {
    /// Hosted here; rendered `+` when we send it.
    LocallyOwned,
    /// Hosted by the peer; rendered `-` when we send it.
    PeerOwned,
}

impl SlotDirection {
    pub fn flip(self) -> Self {
        match self {
            SlotDirection::LocallyOwned => SlotDirection::PeerOwned,
            SlotDirection::PeerOwned => SlotDirection::LocallyOwned,
        }
    }
}

/// What a slot refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKind {
    /// A pass-by-reference object (`o`).
    Object,
    /// A promise that its exporter resolves later (`p`).
    Promise,
    /// The answer to a question (`q`).
    Question,
}

impl SlotKind {
    fn tag(self) -> char {
        match self {
            SlotKind::Object => 'o',
            SlotKind::Promise => 'p',
            SlotKind::Question => 'q',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    /// Which side hosts the value.
    pub direction: SlotDirection,
    /// Object, promise or question.
    pub kind: SlotKind,
    /// Allocated by the hosting side, per kind, starting at 1.
    pub id: u64,
}

impl Slot {
    pub fn new(direction: SlotDirection, kind: SlotKind, id: u64) -> Self {
        Self {
            direction,
            kind,
            id,
        }
    }

    pub fn local(kind: SlotKind, id: u64) -> Self {
        Self::new(SlotDirection::LocallyOwned, kind, id)
    }

    pub fn peer(kind: SlotKind, id: u64) -> Self {
        Self::new(SlotDirection::PeerOwned, kind, id)
    }

    /// The same slot as seen from the other side of the connection.
    pub fn flip(self) -> Self {
        Self {
            direction: self.direction.flip(),
            ..self
        }
    }

    pub fn is_local(&self) -> bool {
        self.direction == SlotDirection::LocallyOwned
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.direction {
            SlotDirection::LocallyOwned => '+',
            SlotDirection::PeerOwned => '-',
        };
        write!(f, "{}{}{}", self.kind.tag(), sign, self.id)
    }
}

impl FromStr for Slot {
    type Err = CapTpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CapTpError::InvalidSlot(s.to_string());
        let mut chars = s.chars();
        let kind = match chars.next() {
            Some('o') => SlotKind::Object,
            Some('p') => SlotKind::Promise,
            Some('q') => SlotKind::Question,
            _ => return Err(invalid()),
        };
        let direction = match chars.next() {
            Some('+') => SlotDirection::LocallyOwned,
            Some('-') => SlotDirection::PeerOwned,
            _ => return Err(invalid()),
        };
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let id = digits.parse().map_err(|_| invalid())?;
        Ok(Slot::new(direction, kind, id))
    }
}

impl Serialize for Slot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Slot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
