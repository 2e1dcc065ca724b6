//! OCPP 2.0.1 adapter
//!
//! Transactions are reported through TransactionEvent. The adapter generates
//! the transaction id itself and numbers each event of a transaction with an
//! increasing `seqNo`, starting at 0 with the Started event.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::link::Link;
use super::{
    AuthorizeResult, BootResult, CommandHandler, CommandRegistry, CommandReply, ProtocolAdapter,
    RemoteCommand, StopReason, TransactionResult,
};
use crate::error::Result;
use crate::ocpp::v201::{
    self, ChargingState, ConnectorStatusV201, Evse, IdToken, MeterValue, ReadingContext,
    RequestStartStopStatus, TransactionEventType, TransactionInfo, TriggerReason,
};
use crate::ocpp::{
    Action, AuthorizationStatus, ConnectorStatus, FirmwareStatus, FrameObserver, ProtocolVersion,
    ResetKind, TransactionId,
};

static INBOUND: CommandRegistry = CommandRegistry {
    decoders: &[
        (Action::RequestStartTransaction.as_str(), decode_request_start),
        (Action::RequestStopTransaction.as_str(), decode_request_stop),
        // 1.6 names accepted with the 2.0.1 payload shape
        (Action::RemoteStartTransaction.as_str(), decode_request_start),
        (Action::RemoteStopTransaction.as_str(), decode_request_stop),
        (Action::Reset.as_str(), decode_reset),
        (Action::UnlockConnector.as_str(), decode_unlock),
    ],
    encode: encode_reply,
};

fn decode_request_start(payload: Value) -> Result<RemoteCommand> {
    let req: v201::RequestStartTransactionRequest = serde_json::from_value(payload)?;
    v201::validate_id_token(&req.id_token.id_token)?;
    Ok(RemoteCommand::RemoteStart {
        id_tag: req.id_token.id_token,
        connector_id: req.evse_id,
    })
}

fn decode_request_stop(payload: Value) -> Result<RemoteCommand> {
    let req: v201::RequestStopTransactionRequest = serde_json::from_value(payload)?;
    Ok(RemoteCommand::RemoteStop {
        transaction_id: req.transaction_id.into(),
    })
}

fn decode_reset(payload: Value) -> Result<RemoteCommand> {
    let req: v201::ResetRequest = serde_json::from_value(payload)?;
    let kind = match req.reset_type {
        v201::ResetType::Immediate => ResetKind::Hard,
        v201::ResetType::OnIdle => ResetKind::Soft,
    };
    Ok(RemoteCommand::Reset { kind })
}

fn decode_unlock(payload: Value) -> Result<RemoteCommand> {
    let req: v201::UnlockConnectorRequest = serde_json::from_value(payload)?;
    // evse ids map one to one onto the emulator's connectors
    Ok(RemoteCommand::UnlockConnector {
        connector_id: req.evse_id,
    })
}

fn encode_reply(command: &RemoteCommand, reply: CommandReply) -> Result<Value> {
    let start_stop = if reply.is_positive() {
        RequestStartStopStatus::Accepted
    } else {
        RequestStartStopStatus::Rejected
    };

    let value = match command {
        RemoteCommand::RemoteStart { .. } => {
            serde_json::to_value(v201::RequestStartTransactionResponse {
                status: start_stop,
                transaction_id: None,
            })?
        }
        RemoteCommand::RemoteStop { .. } => {
            serde_json::to_value(v201::RequestStopTransactionResponse { status: start_stop })?
        }
        RemoteCommand::Reset { .. } => {
            let status = if reply.is_positive() {
                v201::ResetStatus::Accepted
            } else {
                v201::ResetStatus::Rejected
            };
            serde_json::to_value(v201::ResetResponse { status })?
        }
        RemoteCommand::UnlockConnector { .. } => {
            let status = if reply.is_positive() {
                v201::UnlockStatus::Unlocked
            } else {
                v201::UnlockStatus::UnlockFailed
            };
            serde_json::to_value(v201::UnlockConnectorResponse { status })?
        }
    };
    Ok(value)
}

/// Speaks OCPP 2.0.1 over subprotocol `ocpp2.0.1`
pub struct Ocpp201Adapter {
    link: Link,
    /// Next seqNo per open transaction
    seq_numbers: Mutex<HashMap<TransactionId, u32>>,
}

impl Ocpp201Adapter {
    pub fn new(charger_id: &str, request_timeout: Duration) -> Self {
        Self {
            link: Link::new(charger_id, ProtocolVersion::V201, request_timeout),
            seq_numbers: Mutex::new(HashMap::new()),
        }
    }

    fn next_seq_no(&self, transaction_id: &TransactionId) -> u32 {
        let mut seqs = self.seq_numbers.lock();
        let next = seqs.entry(transaction_id.clone()).or_insert(0);
        let seq_no = *next;
        *next += 1;
        seq_no
    }

    fn forget(&self, transaction_id: &TransactionId) {
        self.seq_numbers.lock().remove(transaction_id);
    }

    async fn transaction_event(
        &self,
        req: v201::TransactionEventRequest,
    ) -> Result<v201::TransactionEventResponse> {
        debug!(
            "TransactionEvent {:?} {} seqNo={}",
            req.event_type, req.transaction_info.transaction_id, req.seq_no
        );
        self.link.call(Action::TransactionEvent, &req).await
    }
}

fn token_status(resp: &v201::TransactionEventResponse) -> AuthorizationStatus {
    resp.id_token_info
        .as_ref()
        .map(|info| info.status)
        .unwrap_or(AuthorizationStatus::Accepted)
}

#[async_trait]
impl ProtocolAdapter for Ocpp201Adapter {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V201
    }

    async fn connect(&self, base_url: &str, charger_id: &str) -> Result<()> {
        self.link.open(base_url, charger_id).await
    }

    async fn disconnect(&self) {
        self.link.close();
    }

    fn is_connected(&self) -> bool {
        self.link.is_open()
    }

    fn set_command_handler(&self, handler: CommandHandler) {
        self.link.endpoint().set_handler(INBOUND.inbound_handler(handler));
    }

    fn set_frame_observer(&self, observer: FrameObserver) {
        self.link.endpoint().set_observer(observer);
    }

    async fn send_boot_notification(&self, model: &str, vendor: &str) -> Result<BootResult> {
        let req = v201::BootNotificationRequest {
            charging_station: v201::ChargingStationInfo {
                model: model.to_string(),
                vendor_name: vendor.to_string(),
                serial_number: None,
                firmware_version: None,
            },
            reason: v201::BootReason::PowerUp,
        };
        let resp: v201::BootNotificationResponse =
            self.link.call(Action::BootNotification, &req).await?;

        info!(
            "BootNotification: {:?}, interval={}s",
            resp.status, resp.interval
        );

        Ok(BootResult {
            status: resp.status,
            interval: resp.interval,
            current_time: resp.current_time,
        })
    }

    async fn send_heartbeat(&self) -> Result<DateTime<Utc>> {
        let resp: v201::HeartbeatResponse = self
            .link
            .call(Action::Heartbeat, &v201::HeartbeatRequest {})
            .await?;
        Ok(resp.current_time)
    }

    async fn authorize(&self, id_tag: &str) -> Result<AuthorizeResult> {
        v201::validate_id_token(id_tag)?;

        let req = v201::AuthorizeRequest {
            id_token: IdToken::central(id_tag),
        };
        let resp: v201::AuthorizeResponse = self.link.call(Action::Authorize, &req).await?;

        Ok(AuthorizeResult {
            status: resp.id_token_info.status,
        })
    }

    async fn start_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
        meter_start: u64,
    ) -> Result<TransactionResult> {
        v201::validate_id_token(id_tag)?;

        let transaction_id = TransactionId::new(Uuid::new_v4().to_string());
        let req = v201::TransactionEventRequest {
            event_type: TransactionEventType::Started,
            timestamp: Utc::now(),
            trigger_reason: TriggerReason::Authorized,
            seq_no: self.next_seq_no(&transaction_id),
            transaction_info: TransactionInfo {
                transaction_id: transaction_id.to_string(),
                charging_state: Some(ChargingState::Charging),
                stopped_reason: None,
            },
            id_token: Some(IdToken::central(id_tag)),
            evse: Some(Evse {
                id: connector_id,
                connector_id: Some(1),
            }),
            meter_value: Some(vec![MeterValue::energy_wh(
                meter_start,
                ReadingContext::TransactionBegin,
            )]),
        };

        let resp = match self.transaction_event(req).await {
            Ok(resp) => resp,
            Err(e) => {
                self.forget(&transaction_id);
                return Err(e);
            }
        };

        let status = token_status(&resp);
        let accepted = status == AuthorizationStatus::Accepted;
        if !accepted {
            self.forget(&transaction_id);
        }

        Ok(TransactionResult {
            transaction_id: Some(transaction_id),
            accepted,
            status,
        })
    }

    async fn stop_transaction(
        &self,
        transaction_id: &TransactionId,
        meter_stop: u64,
        id_tag: Option<&str>,
        reason: StopReason,
    ) -> Result<TransactionResult> {
        let (trigger_reason, stopped_reason) = match reason {
            StopReason::Local => (TriggerReason::StopAuthorized, v201::StoppedReason::Local),
            StopReason::Remote => (TriggerReason::RemoteStop, v201::StoppedReason::Remote),
        };
        let req = v201::TransactionEventRequest {
            event_type: TransactionEventType::Ended,
            timestamp: Utc::now(),
            trigger_reason,
            seq_no: self.next_seq_no(transaction_id),
            transaction_info: TransactionInfo {
                transaction_id: transaction_id.to_string(),
                charging_state: Some(ChargingState::Idle),
                stopped_reason: Some(stopped_reason),
            },
            id_token: id_tag.map(IdToken::central),
            evse: None,
            meter_value: Some(vec![MeterValue::energy_wh(
                meter_stop,
                ReadingContext::TransactionEnd,
            )]),
        };

        let result = self.transaction_event(req).await;
        self.forget(transaction_id);

        let status = token_status(&result?);
        Ok(TransactionResult {
            transaction_id: Some(transaction_id.clone()),
            accepted: status == AuthorizationStatus::Accepted,
            status,
        })
    }

    async fn send_status_notification(
        &self,
        connector_id: u32,
        status: ConnectorStatus,
        error_code: Option<&str>,
    ) -> Result<()> {
        if let Some(code) = error_code {
            debug!("2.0.1 StatusNotification has no error code, dropping {}", code);
        }

        let req = v201::StatusNotificationRequest {
            timestamp: Utc::now(),
            connector_status: ConnectorStatusV201::from(status),
            evse_id: connector_id,
            connector_id: 1,
        };
        let _: Value = self.link.call(Action::StatusNotification, &req).await?;
        Ok(())
    }

    async fn send_meter_values(
        &self,
        connector_id: u32,
        transaction_id: &TransactionId,
        value_wh: u64,
    ) -> Result<()> {
        let req = v201::TransactionEventRequest {
            event_type: TransactionEventType::Updated,
            timestamp: Utc::now(),
            trigger_reason: TriggerReason::MeterValuePeriodic,
            seq_no: self.next_seq_no(transaction_id),
            transaction_info: TransactionInfo {
                transaction_id: transaction_id.to_string(),
                charging_state: Some(ChargingState::Charging),
                stopped_reason: None,
            },
            id_token: None,
            evse: Some(Evse {
                id: connector_id,
                connector_id: Some(1),
            }),
            meter_value: Some(vec![MeterValue::energy_wh(
                value_wh,
                ReadingContext::SamplePeriodic,
            )]),
        };
        self.transaction_event(req).await?;
        Ok(())
    }

    async fn send_firmware_status(&self, status: FirmwareStatus) -> Result<()> {
        let req = v201::FirmwareStatusNotificationRequest { status };
        let _: Value = self
            .link
            .call(Action::FirmwareStatusNotification, &req)
            .await?;
        Ok(())
    }
}
