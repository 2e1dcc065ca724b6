//! OCPP 1.6-JSON adapter

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use super::link::Link;
use super::{
    AuthorizeResult, BootResult, CommandHandler, CommandRegistry, CommandReply, ProtocolAdapter,
    RemoteCommand, StopReason, TransactionResult,
};
use crate::error::{Error, Result};
use crate::ocpp::v16::{self, ChargePointErrorCode, RemoteStartStopStatus};
use crate::ocpp::{
    Action, AuthorizationStatus, ConnectorStatus, FirmwareStatus, FrameObserver, ProtocolVersion,
    ResetKind, TransactionId,
};

static INBOUND: CommandRegistry = CommandRegistry {
    decoders: &[
        (Action::RemoteStartTransaction.as_str(), decode_remote_start),
        (Action::RemoteStopTransaction.as_str(), decode_remote_stop),
        (Action::Reset.as_str(), decode_reset),
        (Action::UnlockConnector.as_str(), decode_unlock),
    ],
    encode: encode_reply,
};

fn decode_remote_start(payload: Value) -> Result<RemoteCommand> {
    let req: v16::RemoteStartTransactionRequest = serde_json::from_value(payload)?;
    v16::validate_id_tag(&req.id_tag)?;
    Ok(RemoteCommand::RemoteStart {
        id_tag: req.id_tag,
        connector_id: req.connector_id,
    })
}

fn decode_remote_stop(payload: Value) -> Result<RemoteCommand> {
    let req: v16::RemoteStopTransactionRequest = serde_json::from_value(payload)?;
    Ok(RemoteCommand::RemoteStop {
        transaction_id: req.transaction_id.into(),
    })
}

fn decode_reset(payload: Value) -> Result<RemoteCommand> {
    let req: v16::ResetRequest = serde_json::from_value(payload)?;
    let kind = match req.reset_type {
        v16::ResetType::Hard => ResetKind::Hard,
        v16::ResetType::Soft => ResetKind::Soft,
    };
    Ok(RemoteCommand::Reset { kind })
}

fn decode_unlock(payload: Value) -> Result<RemoteCommand> {
    let req: v16::UnlockConnectorRequest = serde_json::from_value(payload)?;
    Ok(RemoteCommand::UnlockConnector {
        connector_id: req.connector_id,
    })
}

fn encode_reply(command: &RemoteCommand, reply: CommandReply) -> Result<Value> {
    let value = match command {
        RemoteCommand::RemoteStart { .. } | RemoteCommand::RemoteStop { .. } => {
            let status = if reply.is_positive() {
                RemoteStartStopStatus::Accepted
            } else {
                RemoteStartStopStatus::Rejected
            };
            serde_json::to_value(v16::RemoteStartStopResponse { status })?
        }
        RemoteCommand::Reset { .. } => {
            let status = if reply.is_positive() {
                v16::ResetStatus::Accepted
            } else {
                v16::ResetStatus::Rejected
            };
            serde_json::to_value(v16::ResetResponse { status })?
        }
        RemoteCommand::UnlockConnector { .. } => {
            let status = if reply.is_positive() {
                v16::UnlockStatus::Unlocked
            } else {
                v16::UnlockStatus::UnlockFailed
            };
            serde_json::to_value(v16::UnlockConnectorResponse { status })?
        }
    };
    Ok(value)
}

/// Speaks OCPP 1.6-JSON over subprotocol `ocpp1.6`
pub struct Ocpp16Adapter {
    link: Link,
}

impl Ocpp16Adapter {
    pub fn new(charger_id: &str, request_timeout: Duration) -> Self {
        Self {
            link: Link::new(charger_id, ProtocolVersion::V16, request_timeout),
        }
    }
}

#[async_trait]
impl ProtocolAdapter for Ocpp16Adapter {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V16
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
        let req = v16::BootNotificationRequest {
            charge_point_vendor: vendor.to_string(),
            charge_point_model: model.to_string(),
            charge_point_serial_number: None,
            firmware_version: None,
        };
        let resp: v16::BootNotificationResponse =
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
        let resp: v16::HeartbeatResponse = self
            .link
            .call(Action::Heartbeat, &v16::HeartbeatRequest {})
            .await?;
        Ok(resp.current_time)
    }

    async fn authorize(&self, id_tag: &str) -> Result<AuthorizeResult> {
        v16::validate_id_tag(id_tag)?;

        let req = v16::AuthorizeRequest {
            id_tag: id_tag.to_string(),
        };
        let resp: v16::AuthorizeResponse = self.link.call(Action::Authorize, &req).await?;

        Ok(AuthorizeResult {
            status: resp.id_tag_info.status,
        })
    }

    async fn start_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
        meter_start: u64,
    ) -> Result<TransactionResult> {
        v16::validate_id_tag(id_tag)?;

        let req = v16::StartTransactionRequest {
            connector_id,
            id_tag: id_tag.to_string(),
            meter_start,
            timestamp: Utc::now(),
            reservation_id: None,
        };
        let resp: v16::StartTransactionResponse =
            self.link.call(Action::StartTransaction, &req).await?;

        let status = resp.id_tag_info.status;
        Ok(TransactionResult {
            transaction_id: Some(TransactionId::from(resp.transaction_id)),
            accepted: status == AuthorizationStatus::Accepted,
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
        let native_id = transaction_id.as_i64().ok_or_else(|| {
            Error::Protocol(format!(
                "transaction id '{}' is not a 1.6 integer id",
                transaction_id
            ))
        })?;

        let req = v16::StopTransactionRequest {
            transaction_id: native_id,
            id_tag: id_tag.map(str::to_string),
            meter_stop,
            timestamp: Utc::now(),
            // absent means Local
            reason: match reason {
                StopReason::Local => None,
                StopReason::Remote => Some("Remote".to_string()),
            },
        };
        let resp: v16::StopTransactionResponse =
            self.link.call(Action::StopTransaction, &req).await?;

        let status = resp
            .id_tag_info
            .map(|info| info.status)
            .unwrap_or(AuthorizationStatus::Accepted);
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
        let req = v16::StatusNotificationRequest {
            connector_id,
            error_code: ChargePointErrorCode::parse(error_code)?,
            status,
            timestamp: Some(Utc::now()),
            info: None,
        };
        let _: v16::EmptyResponse = self.link.call(Action::StatusNotification, &req).await?;
        Ok(())
    }

    async fn send_meter_values(
        &self,
        connector_id: u32,
        transaction_id: &TransactionId,
        value_wh: u64,
    ) -> Result<()> {
        let req = v16::MeterValuesRequest {
            connector_id,
            transaction_id: transaction_id.as_i64(),
            meter_value: vec![v16::MeterValue {
                timestamp: Utc::now(),
                sampled_value: vec![v16::SampledValue {
                    value: value_wh.to_string(),
                    context: Some("Sample.Periodic".to_string()),
                    measurand: Some("Energy.Active.Import.Register".to_string()),
                    unit: Some("Wh".to_string()),
                }],
            }],
        };
        let _: v16::EmptyResponse = self.link.call(Action::MeterValues, &req).await?;
        Ok(())
    }

    async fn send_firmware_status(&self, status: FirmwareStatus) -> Result<()> {
        let req = v16::FirmwareStatusNotificationRequest { status };
        let _: v16::EmptyResponse = self
            .link
            .call(Action::FirmwareStatusNotification, &req)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::{CallResult, OcppMessage};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Adapter whose correlator writes into a channel instead of a socket
    fn wired() -> (Arc<Ocpp16Adapter>, mpsc::Receiver<String>) {
        let adapter = Arc::new(Ocpp16Adapter::new("CP1", Duration::from_secs(5)));
        let (tx, rx) = mpsc::channel(16);
        adapter.link.endpoint().attach(tx);
        (adapter, rx)
    }

    async fn answer(adapter: &Ocpp16Adapter, rx: &mut mpsc::Receiver<String>, reply: Value) -> (String, Value) {
        let text = rx.recv().await.unwrap();
        let OcppMessage::Call(call) = OcppMessage::parse(&text).unwrap() else { panic!("Expected Call") };
        adapter
            .link
            .endpoint()
            .on_inbound(&CallResult::new(call.message_id, reply).to_value().to_string());
        (call.action, call.payload)
    }

    #[test]
    fn test_decode_remote_commands() {
        let start = INBOUND
            .decode(
                "RemoteStartTransaction",
                serde_json::json!({"idTag": "TAG1", "connectorId": 1}),
            )
            .unwrap();
        assert_eq!(
            start,
            RemoteCommand::RemoteStart { id_tag: "TAG1".into(), connector_id: Some(1) }
        );

        let stop = INBOUND
            .decode("RemoteStopTransaction", serde_json::json!({"transactionId": 999}))
            .unwrap();
        assert_eq!(stop, RemoteCommand::RemoteStop { transaction_id: TransactionId::from("999") });

        let reset = INBOUND.decode("Reset", serde_json::json!({"type": "Hard"})).unwrap();
        assert_eq!(reset, RemoteCommand::Reset { kind: ResetKind::Hard });
    }

    #[test]
    fn test_invalid_payloads_are_protocol_errors() {
        for (action, payload) in [
            ("RemoteStartTransaction", serde_json::json!({})),
            ("RemoteStartTransaction", serde_json::json!({"idTag": "X".repeat(21)})),
            ("Reset", serde_json::json!({"type": "Warm"})),
            ("UnlockConnector", serde_json::json!({"connectorId": "one"})),
        ] {
            let err = INBOUND.decode(action, payload).unwrap_err();
            assert!(matches!(err, Error::Protocol(_)), "{} accepted bad payload", action);
        }
        assert!(matches!(
            INBOUND.decode("RequestStartTransaction", serde_json::json!({})),
            Err(Error::NotImplemented(_))
        ));
    }

    #[test]
    fn test_encode_replies() {
        let start = RemoteCommand::RemoteStart { id_tag: "T".into(), connector_id: None };
        assert_eq!(
            encode_reply(&start, CommandReply::Accepted).unwrap(),
            serde_json::json!({"status": "Accepted"})
        );
        let unlock = RemoteCommand::UnlockConnector { connector_id: 1 };
        assert_eq!(
            encode_reply(&unlock, CommandReply::Unlocked).unwrap(),
            serde_json::json!({"status": "Unlocked"})
        );
        let reset = RemoteCommand::Reset { kind: ResetKind::Soft };
        assert_eq!(
            encode_reply(&reset, CommandReply::Rejected).unwrap(),
            serde_json::json!({"status": "Rejected"})
        );
    }

    #[tokio::test]
    async fn test_boot_notification_payload() {
        let (adapter, mut rx) = wired();

        let a = adapter.clone();
        let boot = tokio::spawn(async move { a.send_boot_notification("M", "V").await });
        let (action, payload) = answer(
            &adapter,
            &mut rx,
            serde_json::json!({"status": "Accepted", "currentTime": "2026-01-20T12:00:00Z", "interval": 60}),
        )
        .await;

        assert_eq!(action, "BootNotification");
        assert_eq!(payload, serde_json::json!({"chargePointVendor": "V", "chargePointModel": "M"}));
        let result = boot.await.unwrap().unwrap();
        assert_eq!(result.interval, 60);
    }

    #[tokio::test]
    async fn test_start_transaction_normalizes_id() {
        let (adapter, mut rx) = wired();

        let a = adapter.clone();
        let start = tokio::spawn(async move { a.start_transaction(1, "TAG1", 0).await });
        let (action, payload) = answer(
            &adapter,
            &mut rx,
            serde_json::json!({"transactionId": 4242, "idTagInfo": {"status": "Accepted"}}),
        )
        .await;

        assert_eq!(action, "StartTransaction");
        assert_eq!(payload["connectorId"], 1);
        assert_eq!(payload["idTag"], "TAG1");
        assert_eq!(payload["meterStart"], 0);

        let result = start.await.unwrap().unwrap();
        assert!(result.accepted);
        assert_eq!(result.transaction_id, Some(TransactionId::from("4242")));
    }

    #[tokio::test]
    async fn test_authorize_rejects_long_tag_without_sending() {
        let (adapter, mut rx) = wired();
        let result = adapter.authorize("ABCDEFGHIJKLMNOPQRSTU").await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_transaction_requires_numeric_id() {
        let (adapter, mut rx) = wired();
        let result = adapter
            .stop_transaction(&TransactionId::from("tx-abc"), 100, None, StopReason::Local)
            .await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remote_stop_carries_reason() {
        let (adapter, mut rx) = wired();

        let a = adapter.clone();
        let stop = tokio::spawn(async move {
            a.stop_transaction(&TransactionId::from(42), 900, Some("TAG1"), StopReason::Remote)
                .await
        });
        let (action, payload) = answer(
            &adapter,
            &mut rx,
            serde_json::json!({"idTagInfo": {"status": "Accepted"}}),
        )
        .await;
        assert_eq!(action, "StopTransaction");
        assert_eq!(payload["transactionId"], 42);
        assert_eq!(payload["reason"], "Remote");
        assert!(stop.await.unwrap().unwrap().accepted);

        let a = adapter.clone();
        let stop = tokio::spawn(async move {
            a.stop_transaction(&TransactionId::from(43), 900, Some("TAG1"), StopReason::Local)
                .await
        });
        let (_, payload) = answer(&adapter, &mut rx, serde_json::json!({})).await;
        assert!(payload.get("reason").is_none());
        stop.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_status_notification_defaults_error_code() {
        let (adapter, mut rx) = wired();

        let a = adapter.clone();
        let send = tokio::spawn(async move {
            a.send_status_notification(1, ConnectorStatus::Preparing, None).await
        });
        let (_, payload) = answer(&adapter, &mut rx, serde_json::json!({})).await;

        assert_eq!(payload["status"], "Preparing");
        assert_eq!(payload["errorCode"], "NoError");
        assert_eq!(payload["connectorId"], 1);
        send.await.unwrap().unwrap();
    }
}
