//! Version-independent OCPP types used inside the core
//!
//! The adapters translate between these and the per-version wire records in
//! [`super::v16`] and [`super::v201`].

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Protocol version
// ============================================================================

/// OCPP-J protocol version spoken by one adapter or negotiated on one socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "ocpp1.6")]
    V16,
    #[serde(rename = "ocpp2.0.1")]
    V201,
}

impl ProtocolVersion {
    /// WebSocket subprotocol string
    pub fn subprotocol(&self) -> &'static str {
        match self {
            ProtocolVersion::V16 => "ocpp1.6",
            ProtocolVersion::V201 => "ocpp2.0.1",
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.subprotocol())
    }
}

impl std::str::FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "ocpp1.6" | "1.6" => Ok(ProtocolVersion::V16),
            "ocpp2.0.1" | "2.0.1" => Ok(ProtocolVersion::V201),
            other => Err(Error::Configuration(format!("unsupported version: {}", other))),
        }
    }
}

// ============================================================================
// Connector status
// ============================================================================

/// Connector status as tracked by the charge point (OCPP 1.6 vocabulary)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorStatus {
    Available,
    Preparing,
    Charging,
    #[serde(rename = "SuspendedEVSE")]
    SuspendedEvse,
    #[serde(rename = "SuspendedEV")]
    SuspendedEv,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl std::fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectorStatus::Available => "Available",
            ConnectorStatus::Preparing => "Preparing",
            ConnectorStatus::Charging => "Charging",
            ConnectorStatus::SuspendedEvse => "SuspendedEVSE",
            ConnectorStatus::SuspendedEv => "SuspendedEV",
            ConnectorStatus::Finishing => "Finishing",
            ConnectorStatus::Reserved => "Reserved",
            ConnectorStatus::Unavailable => "Unavailable",
            ConnectorStatus::Faulted => "Faulted",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Transaction identifier
// ============================================================================

/// Opaque transaction identifier
///
/// OCPP 1.6 uses integers and 2.0.1 uses strings. Both are kept as their
/// decimal/text form so `42` and `"42"` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Native 1.6 representation, if the id is numeric
    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl From<i64> for TransactionId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for TransactionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TransactionId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction id as it may appear on the wire in either version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTransactionId {
    Number(i64),
    Text(String),
}

impl From<WireTransactionId> for TransactionId {
    fn from(id: WireTransactionId) -> Self {
        match id {
            WireTransactionId::Number(n) => TransactionId::from(n),
            WireTransactionId::Text(s) => TransactionId::new(s),
        }
    }
}

// ============================================================================
// Uniform statuses
// ============================================================================

/// Registration status for BootNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

/// Union of the 1.6 idTagInfo and 2.0.1 idTokenInfo statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    ConcurrentTx,
    Expired,
    Invalid,
    NoCredit,
    NotAllowedTypeEVSE,
    NotAtThisLocation,
    NotAtThisTime,
    Unknown,
}

impl std::fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Firmware update progress, reported through FirmwareStatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareStatus {
    Downloaded,
    DownloadFailed,
    Downloading,
    Idle,
    InstallationFailed,
    Installing,
    Installed,
}

/// Reset flavour requested by the CSMS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// 1.6 Soft / 2.0.1 OnIdle
    Soft,
    /// 1.6 Hard / 2.0.1 Immediate
    Hard,
}

/// Direction of a frame relative to the side that observed it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}
