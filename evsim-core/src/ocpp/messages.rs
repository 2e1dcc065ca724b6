//! OCPP-J message framing
//!
//! OCPP-J carries JSON arrays over a WebSocket text channel:
//! - CALL: [2, messageId, action, payload]
//! - CALLRESULT: [3, messageId, payload]
//! - CALLERROR: [4, messageId, errorCode, errorDescription, errorDetails]

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::types::ProtocolVersion;
use crate::error::{Error, Result};

/// OCPP message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

/// OCPP-J RPC framework error codes
///
/// 1.6 and 2.0.1 spell two codes differently and both spellings are kept. A
/// code outside either list (vendor codes) survives as [`ErrorCode::Other`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    FormatViolation,
    FormationViolation,
    GenericError,
    InternalError,
    MessageTypeNotSupported,
    NotImplemented,
    NotSupported,
    OccurrenceConstraintViolation,
    OccurenceConstraintViolation,
    PropertyConstraintViolation,
    ProtocolError,
    RpcFrameworkError,
    SecurityError,
    TypeConstraintViolation,
    Other(String),
}

impl ErrorCode {
    /// Parse a wire error code, keeping unknown codes verbatim
    pub fn from_wire(code: &str) -> Self {
        match code {
            "FormatViolation" => ErrorCode::FormatViolation,
            "FormationViolation" => ErrorCode::FormationViolation,
            "GenericError" => ErrorCode::GenericError,
            "InternalError" => ErrorCode::InternalError,
            "MessageTypeNotSupported" => ErrorCode::MessageTypeNotSupported,
            "NotImplemented" => ErrorCode::NotImplemented,
            "NotSupported" => ErrorCode::NotSupported,
            "OccurrenceConstraintViolation" => ErrorCode::OccurrenceConstraintViolation,
            "OccurenceConstraintViolation" => ErrorCode::OccurenceConstraintViolation,
            "PropertyConstraintViolation" => ErrorCode::PropertyConstraintViolation,
            "ProtocolError" => ErrorCode::ProtocolError,
            "RpcFrameworkError" => ErrorCode::RpcFrameworkError,
            "SecurityError" => ErrorCode::SecurityError,
            "TypeConstraintViolation" => ErrorCode::TypeConstraintViolation,
            other => ErrorCode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::FormatViolation => "FormatViolation",
            ErrorCode::FormationViolation => "FormationViolation",
            ErrorCode::GenericError => "GenericError",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::MessageTypeNotSupported => "MessageTypeNotSupported",
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            ErrorCode::OccurenceConstraintViolation => "OccurenceConstraintViolation",
            ErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            ErrorCode::ProtocolError => "ProtocolError",
            ErrorCode::RpcFrameworkError => "RpcFrameworkError",
            ErrorCode::SecurityError => "SecurityError",
            ErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            ErrorCode::Other(code) => code,
        }
    }

    /// Code for a malformed payload, in the spelling of `version`
    pub fn format_violation(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::V16 => ErrorCode::FormationViolation,
            ProtocolVersion::V201 => ErrorCode::FormatViolation,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OCPP action names known to either protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    // CP -> CSMS
    BootNotification,
    Heartbeat,
    Authorize,
    StartTransaction,
    StopTransaction,
    StatusNotification,
    MeterValues,
    TransactionEvent,
    FirmwareStatusNotification,

    // CSMS -> CP
    RemoteStartTransaction,
    RemoteStopTransaction,
    RequestStartTransaction,
    RequestStopTransaction,
    Reset,
    UnlockConnector,
}

impl Action {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Action::BootNotification => "BootNotification",
            Action::Heartbeat => "Heartbeat",
            Action::Authorize => "Authorize",
            Action::StartTransaction => "StartTransaction",
            Action::StopTransaction => "StopTransaction",
            Action::StatusNotification => "StatusNotification",
            Action::MeterValues => "MeterValues",
            Action::TransactionEvent => "TransactionEvent",
            Action::FirmwareStatusNotification => "FirmwareStatusNotification",
            Action::RemoteStartTransaction => "RemoteStartTransaction",
            Action::RemoteStopTransaction => "RemoteStopTransaction",
            Action::RequestStartTransaction => "RequestStartTransaction",
            Action::RequestStopTransaction => "RequestStopTransaction",
            Action::Reset => "Reset",
            Action::UnlockConnector => "UnlockConnector",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BootNotification" => Ok(Action::BootNotification),
            "Heartbeat" => Ok(Action::Heartbeat),
            "Authorize" => Ok(Action::Authorize),
            "StartTransaction" => Ok(Action::StartTransaction),
            "StopTransaction" => Ok(Action::StopTransaction),
            "StatusNotification" => Ok(Action::StatusNotification),
            "MeterValues" => Ok(Action::MeterValues),
            "TransactionEvent" => Ok(Action::TransactionEvent),
            "FirmwareStatusNotification" => Ok(Action::FirmwareStatusNotification),
            "RemoteStartTransaction" => Ok(Action::RemoteStartTransaction),
            "RemoteStopTransaction" => Ok(Action::RemoteStopTransaction),
            "RequestStartTransaction" => Ok(Action::RequestStartTransaction),
            "RequestStopTransaction" => Ok(Action::RequestStopTransaction),
            "Reset" => Ok(Action::Reset),
            "UnlockConnector" => Ok(Action::UnlockConnector),
            _ => Err(Error::NotImplemented(s.to_string())),
        }
    }
}

/// OCPP CALL message (request)
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub message_id: String,
    pub action: String,
    pub payload: Value,
}

impl Call {
    /// Create a new CALL message with auto-generated ID
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            action: action.into(),
            payload,
        }
    }

    /// Wire form: [2, messageId, action, payload]
    pub fn to_value(&self) -> Value {
        serde_json::json!([
            MessageType::Call as i32,
            &self.message_id,
            &self.action,
            &self.payload
        ])
    }
}

/// OCPP CALLRESULT message (success response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub message_id: String,
    pub payload: Value,
}

impl CallResult {
    pub fn new(message_id: impl Into<String>, payload: Value) -> Self {
        Self {
            message_id: message_id.into(),
            payload,
        }
    }

    /// Wire form: [3, messageId, payload]
    pub fn to_value(&self) -> Value {
        serde_json::json!([
            MessageType::CallResult as i32,
            &self.message_id,
            &self.payload
        ])
    }

    /// Parse the payload as a specific response type
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// OCPP CALLERROR message (error response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub message_id: String,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl CallError {
    pub fn new(
        message_id: impl Into<String>,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            error_code,
            error_description: error_description.into(),
            error_details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Wire form: [4, messageId, errorCode, errorDescription, errorDetails]
    pub fn to_value(&self) -> Value {
        serde_json::json!([
            MessageType::CallError as i32,
            &self.message_id,
            self.error_code.to_string(),
            &self.error_description,
            &self.error_details
        ])
    }
}

/// Parsed OCPP message (any type)
#[derive(Debug, Clone, PartialEq)]
pub enum OcppMessage {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

impl OcppMessage {
    /// Parse an OCPP message from its text form
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    /// Interpret an already decoded JSON array as a frame
    pub fn from_value(value: &Value) -> Result<Self> {
        let array = value
            .as_array()
            .ok_or_else(|| Error::Protocol("frame is not a JSON array".into()))?;

        if !(3..=5).contains(&array.len()) {
            return Err(Error::Protocol(format!(
                "frame has {} elements, expected 3 to 5",
                array.len()
            )));
        }

        let msg_type = array[0]
            .as_i64()
            .ok_or_else(|| Error::Protocol("message type is not an integer".into()))?;

        let message_id = array[1]
            .as_str()
            .ok_or_else(|| Error::Protocol("message id is not a string".into()))?
            .to_string();

        match msg_type {
            2 => {
                if array.len() != 4 {
                    return Err(Error::Protocol("CALL must have 4 elements".into()));
                }
                let action = array[2]
                    .as_str()
                    .ok_or_else(|| Error::Protocol("action is not a string".into()))?
                    .to_string();

                Ok(OcppMessage::Call(Call {
                    message_id,
                    action,
                    payload: array[3].clone(),
                }))
            }
            3 => {
                if array.len() != 3 {
                    return Err(Error::Protocol("CALLRESULT must have 3 elements".into()));
                }
                Ok(OcppMessage::CallResult(CallResult {
                    message_id,
                    payload: array[2].clone(),
                }))
            }
            4 => {
                if array.len() != 5 {
                    return Err(Error::Protocol("CALLERROR must have 5 elements".into()));
                }
                let error_code = array[2]
                    .as_str()
                    .map(ErrorCode::from_wire)
                    .ok_or_else(|| Error::Protocol("error code is not a string".into()))?;

                Ok(OcppMessage::CallError(CallError {
                    message_id,
                    error_code,
                    error_description: array[3].as_str().unwrap_or("").to_string(),
                    error_details: array[4].clone(),
                }))
            }
            other => Err(Error::Protocol(format!("unknown message type {}", other))),
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            OcppMessage::Call(c) => &c.message_id,
            OcppMessage::CallResult(r) => &r.message_id,
            OcppMessage::CallError(e) => &e.message_id,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            OcppMessage::Call(c) => c.to_value(),
            OcppMessage::CallResult(r) => r.to_value(),
            OcppMessage::CallError(e) => e.to_value(),
        }
    }

    /// Serialize to the text sent over the socket
    pub fn to_text(&self) -> String {
        self.to_value().to_string()
    }
}
