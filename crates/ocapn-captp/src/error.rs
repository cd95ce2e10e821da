//! Error types for the CapTP engine.

use crate::slot::Slot;
use thiserror::Error;

/// Protocol-level failures. Business errors raised by capabilities are not
/// errors here: they travel to the caller as rejected promises.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapTpError {
    /// The engine was aborted and accepts no further traffic.
    #[error("CapTP connection aborted: {0}")]
    Aborted(String),

    /// A slot string did not parse.
    #[error("Invalid slot {0:?}")]
    InvalidSlot(String),

    /// A `CTP_CALL` named neither an export nor a pending answer.
    #[error("Unknown CTP_CALL target {0}")]
    UnknownTarget(Slot),

    /// A `CTP_RETURN` named a question this side never asked.
    #[error("Got an answer to a question we have not asked: {0}")]
    UnknownQuestion(Slot),

    /// A `CTP_RESOLVE` named a promise that is not a pending import.
    #[error("Got a resolution for a promise we have not imported: {0}")]
    UnknownImport(Slot),

    /// A peer tried to settle a promise it does not own.
    #[error("Only the exporter may resolve {0}")]
    NotExporter(Slot),

    /// A value referenced a slot that is not in the tables.
    #[error("Unknown slot {0}")]
    UnknownSlot(Slot),

    /// A question id was reused while its answer is still tracked.
    #[error("Duplicate question {0}")]
    DuplicateQuestion(Slot),

    /// A message had an impossible shape.
    #[error("Malformed {kind} message: {reason}")]
    Malformed { kind: &'static str, reason: String },

    /// A value was nested beyond the serializable depth.
    #[error("Value nesting exceeds {0} levels")]
    TooDeep(usize),

    /// The outbound sink refused a message.
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Alias for Result with CapTpError.
pub type CapTpResult<T> = Result<T, CapTpError>;
