//! Error type shared by the codec, the adapters, the charge point and the CSMS peer.

use serde_json::Value;
use thiserror::Error;

use crate::ocpp::messages::ErrorCode;
use crate::ocpp::types::ProtocolVersion;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while emulating either side of an OCPP-J link
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failed to establish or maintain the socket
    #[error("connection error: {0}")]
    Connection(String),

    #[error("not connected")]
    NotConnected,

    #[error("timeout waiting for response to {action} [{message_id}]")]
    Timeout { action: String, message_id: String },

    /// Malformed frame or payload that failed per-version validation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A CallError received for a call we originated
    #[error("OCPP error from peer: {code} - {description}")]
    RemoteRejection {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("transaction rejected: {0}")]
    TransactionRejected(String),

    /// Inbound call with nobody registered to answer it
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connector {0} not found")]
    ConnectorNotFound(u32),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("charger {0} already exists")]
    DuplicateCharger(String),
}

impl Error {
    /// OCPP error code used when this error answers an inbound call on a
    /// `version` socket
    pub fn call_error_code(&self, version: ProtocolVersion) -> ErrorCode {
        match self {
            Error::NotImplemented(_) => ErrorCode::NotImplemented,
            Error::UnsupportedAction(_) => ErrorCode::NotSupported,
            Error::Protocol(_) => ErrorCode::format_violation(version),
            _ => ErrorCode::InternalError,
        }
    }

    /// Business-level rejection inside an otherwise well-formed reply
    pub fn is_action_rejected(&self) -> bool {
        matches!(
            self,
            Error::AuthorizationFailed(_) | Error::TransactionRejected(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Connection(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Connection(e.to_string())
    }
}
