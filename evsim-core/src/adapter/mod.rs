//! Protocol adapters
//!
//! A [`ProtocolAdapter`] gives the charge point one operation set regardless of
//! the OCPP-J dialect on the wire. Each adapter owns:
//! - a [`link::Link`] (socket + correlator)
//! - the payload shaping for its version
//! - a registry of typed decoders for CSMS-initiated calls
//!
//! Transaction ids leave the adapter as opaque [`TransactionId`]s; only the
//! wire code knows whether the version uses numbers or strings.

pub mod link;
pub mod ocpp16;
pub mod ocpp201;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ocpp::{
    AuthorizationStatus, ConnectorStatus, FirmwareStatus, FrameObserver, InboundHandler,
    ProtocolVersion, RegistrationStatus, ResetKind, TransactionId,
};

pub use link::build_ocpp_url;
pub use ocpp16::Ocpp16Adapter;
pub use ocpp201::Ocpp201Adapter;

/// Outcome of BootNotification
#[derive(Debug, Clone)]
pub struct BootResult {
    pub status: RegistrationStatus,
    /// Heartbeat interval in seconds
    pub interval: u32,
    pub current_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthorizeResult {
    pub status: AuthorizationStatus,
}

impl AuthorizeResult {
    pub fn accepted(&self) -> bool {
        self.status == AuthorizationStatus::Accepted
    }
}

/// Outcome of starting or stopping a transaction
#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub transaction_id: Option<TransactionId>,
    pub accepted: bool,
    pub status: AuthorizationStatus,
}

/// Which side ended a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Local,
    /// Requested by the CSMS through RemoteStop / RequestStop
    Remote,
}

/// CSMS-initiated command, decoded from either dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    RemoteStart {
        id_tag: String,
        connector_id: Option<u32>,
    },
    RemoteStop {
        transaction_id: TransactionId,
    },
    Reset {
        kind: ResetKind,
    },
    UnlockConnector {
        connector_id: u32,
    },
}

impl RemoteCommand {
    pub fn name(&self) -> &'static str {
        match self {
            RemoteCommand::RemoteStart { .. } => "RemoteStart",
            RemoteCommand::RemoteStop { .. } => "RemoteStop",
            RemoteCommand::Reset { .. } => "Reset",
            RemoteCommand::UnlockConnector { .. } => "UnlockConnector",
        }
    }
}

/// Charge point's answer to a [`RemoteCommand`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandReply {
    Accepted,
    Rejected,
    Unlocked,
    UnlockFailed,
}

impl CommandReply {
    pub fn is_positive(&self) -> bool {
        matches!(self, CommandReply::Accepted | CommandReply::Unlocked)
    }
}

/// Charge point side handler for remote commands
pub type CommandHandler =
    Arc<dyn Fn(RemoteCommand) -> BoxFuture<'static, Result<CommandReply>> + Send + Sync>;

/// Uniform operation set over one OCPP-J dialect
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn version(&self) -> ProtocolVersion;

    /// Open `{base_url}/{charger_id}` with this version's subprotocol
    async fn connect(&self, base_url: &str, charger_id: &str) -> Result<()>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn set_command_handler(&self, handler: CommandHandler);

    fn set_frame_observer(&self, observer: FrameObserver);

    async fn send_boot_notification(&self, model: &str, vendor: &str) -> Result<BootResult>;

    /// Returns the CSMS clock
    async fn send_heartbeat(&self) -> Result<DateTime<Utc>>;

    async fn authorize(&self, id_tag: &str) -> Result<AuthorizeResult>;

    async fn start_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
        meter_start: u64,
    ) -> Result<TransactionResult>;

    async fn stop_transaction(
        &self,
        transaction_id: &TransactionId,
        meter_stop: u64,
        id_tag: Option<&str>,
        reason: StopReason,
    ) -> Result<TransactionResult>;

    async fn send_status_notification(
        &self,
        connector_id: u32,
        status: ConnectorStatus,
        error_code: Option<&str>,
    ) -> Result<()>;

    /// Report the connector's energy register in Wh
    async fn send_meter_values(
        &self,
        connector_id: u32,
        transaction_id: &TransactionId,
        value_wh: u64,
    ) -> Result<()>;

    async fn send_firmware_status(&self, status: FirmwareStatus) -> Result<()>;
}

/// Create the adapter for `version`
pub fn for_version(
    version: ProtocolVersion,
    charger_id: &str,
    request_timeout: Duration,
) -> Arc<dyn ProtocolAdapter> {
    match version {
        ProtocolVersion::V16 => Arc::new(Ocpp16Adapter::new(charger_id, request_timeout)),
        ProtocolVersion::V201 => Arc::new(Ocpp201Adapter::new(charger_id, request_timeout)),
    }
}

pub(crate) type CommandDecoder = fn(Value) -> Result<RemoteCommand>;
pub(crate) type ReplyEncoder = fn(&RemoteCommand, CommandReply) -> Result<Value>;

/// Action name to typed decoder, plus the reply encoder of one version
pub(crate) struct CommandRegistry {
    pub(crate) decoders: &'static [(&'static str, CommandDecoder)],
    pub(crate) encode: ReplyEncoder,
}

impl CommandRegistry {
    pub(crate) fn decode(&self, action: &str, payload: Value) -> Result<RemoteCommand> {
        let (_, decoder) = self
            .decoders
            .iter()
            .find(|(name, _)| *name == action)
            .ok_or_else(|| Error::NotImplemented(action.to_string()))?;
        decoder(payload)
    }

    /// Correlator handler: decode, run the charge point handler, encode
    pub(crate) fn inbound_handler(&'static self, handler: CommandHandler) -> InboundHandler {
        Arc::new(move |action: String, payload: Value| {
            let handler = handler.clone();
            async move {
                let command = self.decode(&action, payload)?;
                debug!("Remote command {}: {:?}", action, command);
                let reply = handler(command.clone()).await?;
                (self.encode)(&command, reply)
            }
            .boxed()
        })
    }
}
