//! Promise-pipelined capability messaging (CapTP).
//!
//! One [`CapTp`] engine runs per session. It translates between local
//! [`Value`]s and wire [`Slot`]s, correlates questions with answers, and
//! forwards eventual operations on unsettled remote results to the peer so
//! that calls pipeline without waiting for a round trip.
//!
//! The engine is transport-agnostic: feed inbound [`CapTpMessage`]s to
//! [`CapTp::dispatch`] and deliver outbound ones from the [`MessageSink`].

pub mod engine;
pub mod error;
pub mod eventual;
pub mod message;
pub mod promise;
pub mod slot;
mod tables;
pub mod value;

pub use engine::{Bootstrap, CapTp, CapTpOptions, CapTpStats, MessageSink, SlotHook};
pub use error::{CapTpError, CapTpResult};
pub use message::{CapTpMessage, WireMethod, WireValue};
pub use promise::{Outcome, Promise, PromiseHandler, Resolver};
pub use slot::{Slot, SlotDirection, SlotKind};
pub use value::{Capability, ObjectRef, Value};
