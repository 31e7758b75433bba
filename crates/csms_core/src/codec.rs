//! OCPP-J envelope framing
//!
//! Every frame on the socket is a JSON array whose first element selects the kind:
//! - CALL: `[2, uniqueId, action, payload]`
//! - CALLRESULT: `[3, uniqueId, payload]`
//! - CALLERROR: `[4, uniqueId, errorCode, errorDescription, errorDetails]`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::DecodeError;

pub const CALL: u8 = 2;
pub const CALL_RESULT: u8 = 3;
pub const CALL_ERROR: u8 = 4;

/// Error codes defined by OCPP 1.6-J for CALLERROR frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    /// Spelled as in the 1.6 schema.
    OccurenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::ProtocolError => "ProtocolError",
            ErrorCode::SecurityError => "SecurityError",
            ErrorCode::FormationViolation => "FormationViolation",
            ErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            ErrorCode::OccurenceConstraintViolation => "OccurenceConstraintViolation",
            ErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            ErrorCode::GenericError => "GenericError",
        }
    }

    /// Unknown codes collapse to `GenericError`.
    pub fn parse(code: &str) -> Self {
        match code {
            "NotImplemented" => ErrorCode::NotImplemented,
            "NotSupported" => ErrorCode::NotSupported,
            "InternalError" => ErrorCode::InternalError,
            "ProtocolError" => ErrorCode::ProtocolError,
            "SecurityError" => ErrorCode::SecurityError,
            "FormationViolation" => ErrorCode::FormationViolation,
            "PropertyConstraintViolation" => ErrorCode::PropertyConstraintViolation,
            "OccurenceConstraintViolation" => ErrorCode::OccurenceConstraintViolation,
            "TypeConstraintViolation" => ErrorCode::TypeConstraintViolation,
            _ => ErrorCode::GenericError,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Call {
        unique_id: String,
        action: String,
        payload: Map<String, Value>,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        error_code: ErrorCode,
        error_description: String,
        details: Value,
    },
}

impl Envelope {
    /// Builds a CALLERROR with an empty details object.
    pub fn call_error(
        unique_id: impl Into<String>,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Envelope::CallError {
            unique_id: unique_id.into(),
            error_code,
            error_description: error_description.into(),
            details: Value::Object(Map::new()),
        }
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Envelope::Call { unique_id, .. }
            | Envelope::CallResult { unique_id, .. }
            | Envelope::CallError { unique_id, .. } => unique_id,
        }
    }

    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Array(mut items) = value else {
            return Err(DecodeError::NotAnArray);
        };

        let message_type = items
            .first()
            .and_then(Value::as_u64)
            .ok_or(DecodeError::MissingMessageType)?;

        let min_len = match message_type {
            2 => 4,
            3 => 3,
            4 => 5,
            other => return Err(DecodeError::UnknownMessageType(other)),
        };
        let too_short = DecodeError::TooShort {
            message_type,
            len: items.len(),
        };

        let unique_id = match items.get_mut(1).map(Value::take) {
            Some(Value::String(id)) => id,
            Some(_) => return Err(DecodeError::InvalidUniqueId),
            None => return Err(too_short),
        };
        if items.len() < min_len {
            // A call with a readable id can still be answered.
            if message_type == 2 {
                let missing = if items.len() < 3 { "action" } else { "payload" };
                return Err(DecodeError::FormationViolation {
                    unique_id,
                    reason: format!("call is missing its {}", missing),
                });
            }
            return Err(too_short);
        }

        match message_type {
            2 => {
                let action = match items[2].take() {
                    Value::String(action) => action,
                    _ => {
                        return Err(DecodeError::FormationViolation {
                            unique_id,
                            reason: "action must be a string".into(),
                        });
                    }
                };
                let payload = match items[3].take() {
                    Value::Object(payload) => payload,
                    _ => {
                        return Err(DecodeError::FormationViolation {
                            unique_id,
                            reason: "payload must be an object".into(),
                        });
                    }
                };
                Ok(Envelope::Call {
                    unique_id,
                    action,
                    payload,
                })
            }
            3 => Ok(Envelope::CallResult {
                unique_id,
                payload: items[2].take(),
            }),
            _ => Ok(Envelope::CallError {
                unique_id,
                error_code: items[2]
                    .as_str()
                    .map_or(ErrorCode::GenericError, ErrorCode::parse),
                error_description: items[3].as_str().unwrap_or_default().to_string(),
                details: items[4].take(),
            }),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Envelope::Call {
                unique_id,
                action,
                payload,
            } => json!([CALL, unique_id, action, payload]),
            Envelope::CallResult { unique_id, payload } => json!([CALL_RESULT, unique_id, payload]),
            Envelope::CallError {
                unique_id,
                error_code,
                error_description,
                details,
            } => json!([
                CALL_ERROR,
                unique_id,
                error_code.as_str(),
                error_description,
                details
            ]),
        }
    }

    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_call_round_trip() {
        let raw = r#"[2,"1","BootNotification",{"chargePointModel":"X1","chargePointVendor":"Acme"}]"#;
        let envelope = Envelope::decode(raw).unwrap();
        match &envelope {
            Envelope::Call {
                unique_id,
                action,
                payload,
            } => {
                assert_eq!(unique_id, "1");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["chargePointVendor"], "Acme");
            }
            _ => panic!("Expected Call"),
        }
        assert_eq!(Envelope::decode(&envelope.encode()).unwrap(), envelope);
    }

    #[test]
    fn test_call_result_and_error_parsing() {
        let result = Envelope::decode(r#"[3, "abc", {"status": "Accepted"}]"#).unwrap();
        assert_eq!(
            result,
            Envelope::CallResult {
                unique_id: "abc".into(),
                payload: json!({"status": "Accepted"}),
            }
        );

        let error =
            Envelope::decode(r#"[4, "abc", "NotImplemented", "nope", {"hint": 1}]"#).unwrap();
        match error {
            Envelope::CallError {
                unique_id,
                error_code,
                error_description,
                details,
            } => {
                assert_eq!(unique_id, "abc");
                assert_eq!(error_code, ErrorCode::NotImplemented);
                assert_eq!(error_description, "nope");
                assert_eq!(details, json!({"hint": 1}));
            }
            _ => panic!("Expected CallError"),
        }
    }

    #[test]
    fn test_unknown_error_code_is_generic() {
        let error = Envelope::decode(r#"[4, "abc", "Whatever", "", {}]"#).unwrap();
        assert!(matches!(
            error,
            Envelope::CallError {
                error_code: ErrorCode::GenericError,
                ..
            }
        ));
    }

    #[test]
    fn test_call_error_encoding() {
        let envelope = Envelope::call_error("42", ErrorCode::NotSupported, "FooBar");
        assert_eq!(envelope.encode(), r#"[4,"42","NotSupported","FooBar",{}]"#);
    }

    #[test]
    fn test_transport_frame_errors() {
        assert!(matches!(
            Envelope::decode("not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            Envelope::decode(r#"{"a": 1}"#),
            Err(DecodeError::NotAnArray)
        ));
        assert!(matches!(
            Envelope::decode(r#"["2", "1", "Heartbeat", {}]"#),
            Err(DecodeError::MissingMessageType)
        ));
        assert!(matches!(
            Envelope::decode(r#"[7, "1", {}]"#),
            Err(DecodeError::UnknownMessageType(7))
        ));
        assert!(matches!(
            Envelope::decode(r#"[2]"#),
            Err(DecodeError::TooShort {
                message_type: 2,
                len: 1
            })
        ));
        assert!(matches!(
            Envelope::decode(r#"[3, "1"]"#),
            Err(DecodeError::TooShort { .. })
        ));
        assert!(matches!(
            Envelope::decode(r#"[4, "1", "GenericError", "x"]"#),
            Err(DecodeError::TooShort { .. })
        ));
        assert!(matches!(
            Envelope::decode(r#"[2, 17, "Heartbeat", {}]"#),
            Err(DecodeError::InvalidUniqueId)
        ));
    }

    #[test]
    fn test_formation_violation_keeps_unique_id() {
        let err = Envelope::decode(r#"[2, "9", "Heartbeat", [1, 2]]"#).unwrap_err();
        assert_eq!(err.unique_id(), Some("9"));
        assert!(matches!(err, DecodeError::FormationViolation { .. }));

        let err = Envelope::decode(r#"[2, "10", 5, {}]"#).unwrap_err();
        assert_eq!(err.unique_id(), Some("10"));
    }

    #[test]
    fn test_short_call_is_formation_violation() {
        let err = Envelope::decode(r#"[2, "7", "Heartbeat"]"#).unwrap_err();
        assert_eq!(err.unique_id(), Some("7"));
        assert!(err.to_string().contains("payload"));

        let err = Envelope::decode(r#"[2, "8"]"#).unwrap_err();
        assert_eq!(err.unique_id(), Some("8"));
        assert!(err.to_string().contains("action"));

        // Without a string id there is nothing to answer
        assert!(matches!(
            Envelope::decode(r#"[2, 8]"#),
            Err(DecodeError::InvalidUniqueId)
        ));
    }

    #[test]
    fn test_envelopes_survive_encoding() {
        let envelopes = [
            Envelope::Call {
                unique_id: "c1".into(),
                action: "DataTransfer".into(),
                payload: json!({
                    "vendorId": "Acme",
                    "data": {"nested": [1, {"deep": null}, "x"], "flag": true, "ratio": 0.5}
                })
                .as_object()
                .cloned()
                .unwrap(),
            },
            Envelope::Call {
                unique_id: "c2".into(),
                action: "Heartbeat".into(),
                payload: Map::new(),
            },
            Envelope::CallResult {
                unique_id: "r1".into(),
                payload: json!({}),
            },
            Envelope::CallResult {
                unique_id: "r2".into(),
                payload: json!({"idTagInfo": {"status": "Accepted", "expiryDate": "2024-01-01T00:00:00Z"}}),
            },
            Envelope::CallError {
                unique_id: "e1".into(),
                error_code: ErrorCode::OccurenceConstraintViolation,
                error_description: "".into(),
                details: json!({}),
            },
            Envelope::CallError {
                unique_id: "e2".into(),
                error_code: ErrorCode::InternalError,
                error_description: "boom \"quoted\"".into(),
                details: json!({"trace": ["a", "b"]}),
            },
        ];

        for envelope in envelopes {
            assert_eq!(Envelope::decode(&envelope.encode()).unwrap(), envelope);
        }
    }
}
