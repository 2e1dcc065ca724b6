//! Canned replies for charge point initiated calls
//!
//! | Action | Reply |
//! |--------|-------|
//! | BootNotification | `Accepted`, configured interval, current time |
//! | Heartbeat | current time |
//! | Authorize | `Accepted` in `idTagInfo` (1.6) or `idTokenInfo` (2.0.1) |
//! | StartTransaction | fresh numeric `transactionId`, `Accepted` |
//! | anything else | `{}` |

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ocpp::{v16, v201, AuthorizationStatus, ProtocolVersion, RegistrationStatus};

pub struct AutoResponder {
    heartbeat_interval: u32,
    next_transaction_id: AtomicI64,
}

impl AutoResponder {
    pub fn new(heartbeat_interval: u32) -> Self {
        let seed = rand::thread_rng().gen_range(1000..10000);
        Self {
            heartbeat_interval,
            next_transaction_id: AtomicI64::new(seed),
        }
    }

    /// Reply payload for `action`, shaped for the version the payload speaks
    pub fn respond(&self, action: &str, payload: &Value, negotiated: ProtocolVersion) -> Result<Value> {
        let version = infer_version(action, payload).unwrap_or(negotiated);

        match action {
            "BootNotification" => match version {
                ProtocolVersion::V16 => to_payload(v16::BootNotificationResponse {
                    status: RegistrationStatus::Accepted,
                    current_time: Utc::now(),
                    interval: self.heartbeat_interval,
                }),
                ProtocolVersion::V201 => to_payload(v201::BootNotificationResponse {
                    current_time: Utc::now(),
                    interval: self.heartbeat_interval,
                    status: RegistrationStatus::Accepted,
                }),
            },

            "Heartbeat" => to_payload(v16::HeartbeatResponse {
                current_time: Utc::now(),
            }),

            "Authorize" => match version {
                ProtocolVersion::V16 => to_payload(v16::AuthorizeResponse {
                    id_tag_info: v16::IdTagInfo::accepted(),
                }),
                ProtocolVersion::V201 => to_payload(v201::AuthorizeResponse {
                    id_token_info: v201::IdTokenInfo {
                        status: AuthorizationStatus::Accepted,
                    },
                }),
            },

            "StartTransaction" => {
                let transaction_id = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
                to_payload(v16::StartTransactionResponse {
                    transaction_id,
                    id_tag_info: v16::IdTagInfo::accepted(),
                })
            }

            "StopTransaction" | "StatusNotification" | "MeterValues" | "TransactionEvent"
            | "FirmwareStatusNotification" => to_payload(v16::EmptyResponse::default()),

            other => {
                debug!("No canned reply for {}, answering {{}}", other);
                to_payload(v16::EmptyResponse::default())
            }
        }
    }
}

fn to_payload<T: Serialize>(response: T) -> Result<Value> {
    serde_json::to_value(response).map_err(|e| Error::Internal(e.to_string()))
}

/// Version a call payload is written in, when its shape tells
pub fn infer_version(action: &str, payload: &Value) -> Option<ProtocolVersion> {
    let has = |field: &str| payload.get(field).is_some();

    match action {
        "BootNotification" if has("chargingStation") => Some(ProtocolVersion::V201),
        "BootNotification" if has("chargePointVendor") => Some(ProtocolVersion::V16),
        "Authorize" if has("idToken") => Some(ProtocolVersion::V201),
        "Authorize" if has("idTag") => Some(ProtocolVersion::V16),
        "StatusNotification" if has("evseId") => Some(ProtocolVersion::V201),
        "StatusNotification" if has("errorCode") => Some(ProtocolVersion::V16),
        "TransactionEvent" => Some(ProtocolVersion::V201),
        "StartTransaction" | "StopTransaction" | "MeterValues" => Some(ProtocolVersion::V16),
        _ => None,
    }
}
