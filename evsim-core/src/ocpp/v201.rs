//! OCPP 2.0.1 message records
//!
//! Subset of the 2.0.1 schemas needed by the emulator:
//! - BootNotification / Heartbeat / Authorize
//! - TransactionEvent (Started, Updated, Ended)
//! - StatusNotification / FirmwareStatusNotification
//! - RequestStartTransaction / RequestStopTransaction / Reset / UnlockConnector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{AuthorizationStatus, ConnectorStatus, FirmwareStatus, RegistrationStatus, WireTransactionId};
use crate::error::{Error, Result};

/// Maximum length of an idToken (IdTokenType.idToken)
pub const ID_TOKEN_MAX_LEN: usize = 36;

pub fn validate_id_token(id_token: &str) -> Result<()> {
    if id_token.is_empty() || id_token.chars().count() > ID_TOKEN_MAX_LEN {
        return Err(Error::Protocol(format!(
            "idToken '{}' must be 1 to {} characters",
            id_token, ID_TOKEN_MAX_LEN
        )));
    }
    Ok(())
}

// ============================================================================
// Enumerations
// ============================================================================

/// Connector status in the reduced 2.0.1 vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorStatusV201 {
    Available,
    Occupied,
    Reserved,
    Unavailable,
    Faulted,
}

impl From<ConnectorStatus> for ConnectorStatusV201 {
    fn from(status: ConnectorStatus) -> Self {
        match status {
            ConnectorStatus::Charging | ConnectorStatus::Preparing => ConnectorStatusV201::Occupied,
            ConnectorStatus::Available => ConnectorStatusV201::Available,
            _ => ConnectorStatusV201::Unavailable,
        }
    }
}

/// Boot reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootReason {
    ApplicationReset,
    FirmwareUpdate,
    LocalReset,
    PowerUp,
    RemoteReset,
    ScheduledReset,
    Triggered,
    Unknown,
    Watchdog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionEventType {
    Started,
    Updated,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerReason {
    Authorized,
    CablePluggedIn,
    ChargingStateChanged,
    EVCommunicationLost,
    MeterValuePeriodic,
    RemoteStart,
    RemoteStop,
    StopAuthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingState {
    Charging,
    EVConnected,
    SuspendedEV,
    SuspendedEVSE,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoppedReason {
    EVDisconnected,
    Local,
    Other,
    Remote,
    SoftReset,
    ImmediateReset,
}

/// Generic OCPP status for responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStartStopStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetType {
    Immediate,
    OnIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetStatus {
    Accepted,
    Rejected,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlockStatus {
    Unlocked,
    UnlockFailed,
    OngoingAuthorizedTransaction,
    UnknownConnector,
}

/// Measurand types for meter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Measurand {
    #[serde(rename = "Energy.Active.Import.Register")]
    EnergyActiveImportRegister,
    #[serde(rename = "Power.Active.Import")]
    PowerActiveImport,
}

/// Reading context for meter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingContext {
    #[serde(rename = "Sample.Periodic")]
    SamplePeriodic,
    #[serde(rename = "Transaction.Begin")]
    TransactionBegin,
    #[serde(rename = "Transaction.End")]
    TransactionEnd,
}

// ============================================================================
// Complex Types
// ============================================================================

/// EVSE identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evse {
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
}

/// Token for identification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdToken {
    pub id_token: String,
    #[serde(rename = "type")]
    pub token_type: String,
}

impl IdToken {
    /// Token of type `Central`, the type the emulator presents
    pub fn central(id_token: impl Into<String>) -> Self {
        Self {
            id_token: id_token.into(),
            token_type: "Central".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTokenInfo {
    pub status: AuthorizationStatus,
}

/// Sampled value for meter readings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ReadingContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<Measurand>,
}

/// Meter value with timestamp and samples
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    pub timestamp: DateTime<Utc>,
    pub sampled_value: Vec<SampledValue>,
}

impl MeterValue {
    /// Single energy register reading in Wh
    pub fn energy_wh(value_wh: u64, context: ReadingContext) -> Self {
        Self {
            timestamp: Utc::now(),
            sampled_value: vec![SampledValue {
                value: value_wh as f64,
                context: Some(context),
                measurand: Some(Measurand::EnergyActiveImportRegister),
            }],
        }
    }
}

/// Charging station information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingStationInfo {
    pub model: String,
    pub vendor_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charging_state: Option<ChargingState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_reason: Option<StoppedReason>,
}

// ============================================================================
// Charging station initiated
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charging_station: ChargingStationInfo,
    pub reason: BootReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub current_time: DateTime<Utc>,
    pub interval: u32,
    pub status: RegistrationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub id_token: IdToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub id_token_info: IdTokenInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEventRequest {
    pub event_type: TransactionEventType,
    pub timestamp: DateTime<Utc>,
    pub trigger_reason: TriggerReason,
    pub seq_no: u32,
    pub transaction_info: TransactionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<IdToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evse: Option<Evse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_value: Option<Vec<MeterValue>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEventResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token_info: Option<IdTokenInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub timestamp: DateTime<Utc>,
    pub connector_status: ConnectorStatusV201,
    pub evse_id: u32,
    pub connector_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareStatusNotificationRequest {
    pub status: FirmwareStatus,
}

// ============================================================================
// CSMS initiated
// ============================================================================

/// RequestStartTransaction; also accepted under the 1.6 action name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStartTransactionRequest {
    pub id_token: IdToken,
    #[serde(default)]
    pub remote_start_id: i32,
    #[serde(default, alias = "connectorId", skip_serializing_if = "Option::is_none")]
    pub evse_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStartTransactionResponse {
    pub status: RequestStartStopStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStopTransactionRequest {
    pub transaction_id: WireTransactionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStopTransactionResponse {
    pub status: RequestStartStopStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    #[serde(rename = "type")]
    pub reset_type: ResetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evse_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: ResetStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockConnectorRequest {
    pub evse_id: u32,
    pub connector_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockConnectorResponse {
    pub status: UnlockStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_remapping() {
        use ConnectorStatus::*;
        assert_eq!(ConnectorStatusV201::from(Charging), ConnectorStatusV201::Occupied);
        assert_eq!(ConnectorStatusV201::from(Preparing), ConnectorStatusV201::Occupied);
        assert_eq!(ConnectorStatusV201::from(Available), ConnectorStatusV201::Available);
        for other in [SuspendedEv, SuspendedEvse, Finishing, Reserved, Unavailable, Faulted] {
            assert_eq!(ConnectorStatusV201::from(other), ConnectorStatusV201::Unavailable);
        }
    }

    #[test]
    fn test_boot_notification_shape() {
        let req = BootNotificationRequest {
            charging_station: ChargingStationInfo {
                model: "M".into(),
                vendor_name: "V".into(),
                serial_number: None,
                firmware_version: None,
            },
            reason: BootReason::PowerUp,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({
                "chargingStation": {"model": "M", "vendorName": "V"},
                "reason": "PowerUp"
            })
        );
    }

    #[test]
    fn test_id_token_limit() {
        assert!(validate_id_token("TAG1").is_ok());
        assert!(validate_id_token(&"x".repeat(36)).is_ok());
        assert!(validate_id_token(&"x".repeat(37)).is_err());
        assert!(validate_id_token("").is_err());
    }

    #[test]
    fn test_remote_start_alias_payload() {
        let req: RequestStartTransactionRequest = serde_json::from_str(
            r#"{"idToken": {"idToken": "TAG1", "type": "ISO14443"}, "connectorId": 2}"#,
        )
        .unwrap();
        assert_eq!(req.id_token.id_token, "TAG1");
        assert_eq!(req.evse_id, Some(2));
        assert_eq!(req.remote_start_id, 0);
    }

    #[test]
    fn test_transaction_event_shape() {
        let req = TransactionEventRequest {
            event_type: TransactionEventType::Started,
            timestamp: Utc::now(),
            trigger_reason: TriggerReason::Authorized,
            seq_no: 0,
            transaction_info: TransactionInfo {
                transaction_id: "tx-1".into(),
                charging_state: Some(ChargingState::Charging),
                stopped_reason: None,
            },
            id_token: Some(IdToken::central("TAG1")),
            evse: Some(Evse { id: 1, connector_id: Some(1) }),
            meter_value: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["eventType"], "Started");
        assert_eq!(value["seqNo"], 0);
        assert_eq!(value["transactionInfo"]["transactionId"], "tx-1");
        assert_eq!(value["idToken"]["type"], "Central");
        assert!(value.get("meterValue").is_none());
    }
}
