//! CapTP messages and their wire values.
//!
//! Messages are tagged by `type` (`CTP_BOOTSTRAP`, `CTP_CALL`, `CTP_RETURN`,
//! `CTP_RESOLVE`, `CTP_ABORT`) and carry an `epoch`. References inside a
//! payload travel as [`Slot`]s; everything else is passed by copy.

use crate::error::{CapTpError, CapTpResult};
use crate::slot::Slot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value as it appears inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum WireValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    /// Hex on the wire.
    Bytes(#[serde(with = "ocapn_types::serde_compat::hex_bytes")] Vec<u8>),
    List(Vec<WireValue>),
    /// String-keyed, serialized in key order.
    Record(BTreeMap<String, WireValue>),
    /// An error passed by copy; only its message crosses.
    Error(String),
    /// A reference, written from the sender's point of view.
    Slot(Slot),
}

/// `[prop]` for a property read, `[prop, args]` for an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireMethod {
    /// Method name and arguments.
    Invoke(String, Vec<WireValue>),
    /// Property name only.
    Get((String,)),
}

impl WireMethod {
    /// A property read of `property`.
    pub fn get(property: impl Into<String>) -> Self {
        WireMethod::Get((property.into(),))
    }

    pub fn name(&self) -> &str {
        match self {
            WireMethod::Invoke(name, _) | WireMethod::Get((name,)) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CapTpMessage {
    #[serde(rename = "CTP_BOOTSTRAP")]
    Bootstrap {
        epoch: u64,
        #[serde(rename = "questionID")]
        question_id: Slot,
    },

    #[serde(rename = "CTP_CALL")]
    Call {
        epoch: u64,
        #[serde(rename = "questionID")]
        question_id: Slot,
        target: Slot,
        method: WireMethod,
    },

    #[serde(rename = "CTP_RETURN")]
    Return {
        epoch: u64,
        #[serde(rename = "answerID")]
        answer_id: Slot,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<WireValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exception: Option<WireValue>,
    },

    #[serde(rename = "CTP_RESOLVE")]
    Resolve {
        epoch: u64,
        #[serde(rename = "promiseID")]
        promise_id: Slot,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        res: Option<WireValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rej: Option<WireValue>,
    },

    #[serde(rename = "CTP_ABORT")]
    Abort { epoch: u64, exception: WireValue },
}

impl CapTpMessage {
    /// The `type` tag, used for logging and stats.
    pub fn kind(&self) -> &'static str {
        match self {
            CapTpMessage::Bootstrap { .. } => "CTP_BOOTSTRAP",
            CapTpMessage::Call { .. } => "CTP_CALL",
            CapTpMessage::Return { .. } => "CTP_RETURN",
            CapTpMessage::Resolve { .. } => "CTP_RESOLVE",
            CapTpMessage::Abort { .. } => "CTP_ABORT",
        }
    }

    pub fn epoch(&self) -> u64 {
        match self {
            CapTpMessage::Bootstrap { epoch, .. }
            | CapTpMessage::Call { epoch, .. }
            | CapTpMessage::Return { epoch, .. }
            | CapTpMessage::Resolve { epoch, .. }
            | CapTpMessage::Abort { epoch, .. } => *epoch,
        }
    }

    pub fn to_json(&self) -> CapTpResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CapTpError::Malformed {
            kind: self.kind(),
            reason: e.to_string(),
        })
    }

    pub fn from_json(bytes: &[u8]) -> CapTpResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CapTpError::Malformed {
            kind: "CapTP",
            reason: e.to_string(),
        })
    }
}

/// Split a settlement into its success or failure value. Exactly one must be
/// present.
pub(crate) fn one_of(
    kind: &'static str,
    ok: Option<WireValue>,
    err: Option<WireValue>,
) -> CapTpResult<Result<WireValue, WireValue>> {
    match (ok, err) {
        (Some(value), None) => Ok(Ok(value)),
        (None, Some(reason)) => Ok(Err(reason)),
        (Some(_), Some(_)) => Err(CapTpError::Malformed {
            kind,
            reason: "both a value and an exception".to_string(),
        }),
        (None, None) => Err(CapTpError::Malformed {
            kind,
            reason: "neither a value nor an exception".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::SlotKind;

    #[test]
    fn test_call_wire_shape() {
        let message = CapTpMessage::Call {
            epoch: 0,
            question_id: Slot::peer(SlotKind::Question, 1),
            target: Slot::peer(SlotKind::Object, 3),
            method: WireMethod::Invoke("add".into(), vec![WireValue::Int(2)]),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(
            json,
            r#"{"type":"CTP_CALL","epoch":0,"questionID":"q-1","target":"o-3","method":["add",[{"kind":"int","value":2}]]}"#
        );
        assert_eq!(CapTpMessage::from_json(json.as_bytes()).unwrap(), message);
    }

    #[test]
    fn test_property_get_is_single_element_array() {
        let method = WireMethod::get("name");
        assert_eq!(serde_json::to_string(&method).unwrap(), r#"["name"]"#);
        let back: WireMethod = serde_json::from_str(r#"["name"]"#).unwrap();
        assert_eq!(back, method);
        assert_eq!(back.name(), "name");
    }

    #[test]
    fn test_return_omits_missing_side() {
        let message = CapTpMessage::Return {
            epoch: 2,
            answer_id: Slot::local(SlotKind::Question, 4),
            result: None,
            exception: Some(WireValue::Error("boom".into())),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(!json.contains("result"));
        assert!(json.contains(r#""answerID":"q+4""#));
    }

    #[test]
    fn test_bytes_travel_as_hex() {
        let value = WireValue::Bytes(vec![0xca, 0xfe]);
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"kind":"bytes","value":"cafe"}"#
        );
        assert_eq!(
            serde_json::to_string(&WireValue::Undefined).unwrap(),
            r#"{"kind":"undefined"}"#
        );
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let err = CapTpMessage::from_json(br#"{"type":"CTP_DROP","epoch":0}"#).unwrap_err();
        assert!(matches!(err, CapTpError::Malformed { .. }));
    }

    #[test]
    fn test_one_of_requires_exactly_one() {
        assert!(one_of("CTP_RETURN", Some(WireValue::Null), None).unwrap().is_ok());
        assert!(one_of("CTP_RETURN", None, Some(WireValue::Null)).unwrap().is_err());
        assert!(one_of("CTP_RETURN", None, None).is_err());
    }
}
