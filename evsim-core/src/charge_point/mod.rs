//! Simulated charge point
//!
//! Owns the charger state and drives one [`ProtocolAdapter`]. The happy path
//! for a connector is `Available -> Preparing -> Charging -> Available`.
//!
//! Locking:
//! - `state` is only held for short reads and writes, never across a call to
//!   the adapter
//! - `ops` serializes whole operations (start, stop, connect, reset) so two of
//!   them never interleave their frames
//!
//! Remote commands are answered straight away and acted on later, see
//! [`remote`].

pub mod remote;
pub mod state;

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::{self, BootResult, ProtocolAdapter, RemoteCommand, StopReason};
use crate::config::ChargerConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, SimEvent};
use crate::ocpp::{ConnectorStatus, Direction, FirmwareStatus, ProtocolVersion, RegistrationStatus, TransactionId};

pub use state::{ChargerState, ConnectorState, ResetPhase};

pub struct ChargePoint {
    config: ChargerConfig,
    adapter: Arc<dyn ProtocolAdapter>,
    state: RwLock<ChargerState>,
    ops: Mutex<()>,
    events: EventBus,
    heartbeat: parking_lot::Mutex<Option<JoinHandle<()>>>,
    weak_self: Weak<ChargePoint>,
}

impl ChargePoint {
    /// Charge point speaking `config.version` over a real socket
    pub fn new(config: ChargerConfig, events: EventBus) -> Arc<Self> {
        let adapter = adapter::for_version(config.version, &config.charger_id, config.request_timeout);
        Self::with_adapter(config, adapter, events)
    }

    /// Charge point driving a caller-supplied adapter
    pub fn with_adapter(
        config: ChargerConfig,
        adapter: Arc<dyn ProtocolAdapter>,
        events: EventBus,
    ) -> Arc<Self> {
        let state = ChargerState::new(
            config.charger_id.clone(),
            config.connector_count,
            config.csms_url.clone(),
        );

        let charge_point = Arc::new_cyclic(|weak_self| ChargePoint {
            config,
            adapter,
            state: RwLock::new(state),
            ops: Mutex::new(()),
            events,
            heartbeat: parking_lot::Mutex::new(None),
            weak_self: weak_self.clone(),
        });
        charge_point.install_handlers();
        charge_point
    }

    fn install_handlers(&self) {
        let events = self.events.clone();
        let charger_id = self.config.charger_id.clone();
        self.adapter.set_frame_observer(Arc::new(move |direction: Direction, frame: &Value| {
            events.publish(SimEvent::Log {
                charger_id: charger_id.clone(),
                message: frame.clone(),
                direction,
            });
        }));

        let weak = self.weak_self.clone();
        self.adapter.set_command_handler(Arc::new(move |command: RemoteCommand| {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(charge_point) => charge_point.handle_remote_command(command).await,
                    None => Err(Error::Internal("charge point dropped".into())),
                }
            }
            .boxed()
        }));
    }

    pub fn id(&self) -> &str {
        &self.config.charger_id
    }

    pub fn version(&self) -> ProtocolVersion {
        self.adapter.version()
    }

    pub fn config(&self) -> &ChargerConfig {
        &self.config
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> ChargerState {
        self.state.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.is_connected
    }

    fn notify(&self, state: &ChargerState) {
        self.events.publish(SimEvent::ChargerUpdated {
            charger_id: state.charger_id.clone(),
            status: state.link_status(),
            booted: state.booted,
        });
    }

    async fn require_connected(&self) -> Result<()> {
        if self.state.read().await.is_connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Connect to `csms_url`, or to the last used / configured URL
    pub async fn connect(&self, csms_url: Option<&str>) -> Result<()> {
        let _op = self.ops.lock().await;
        self.connect_locked(csms_url).await
    }

    async fn connect_locked(&self, csms_url: Option<&str>) -> Result<()> {
        let url = match csms_url {
            Some(url) => url.to_string(),
            None => self
                .state
                .read()
                .await
                .csms_url
                .clone()
                .ok_or_else(|| Error::Configuration("CSMS URL is required for connection".into()))?,
        };

        info!("[{}] Connecting to {}...", self.id(), url);
        if let Err(e) = self.adapter.connect(&url, &self.config.charger_id).await {
            self.mark_link_lost().await;
            return Err(e);
        }

        let mut state = self.state.write().await;
        state.is_connected = true;
        state.csms_url = Some(url);
        state.next_generation();
        self.notify(&state);
        Ok(())
    }

    /// A failed dial has already torn down any previous socket
    async fn mark_link_lost(&self) {
        let mut state = self.state.write().await;
        if !state.is_connected {
            return;
        }
        self.stop_heartbeat_loop();
        state.is_connected = false;
        state.next_generation();
        self.notify(&state);
        warn!("[{}] Previous connection lost during reconnect", self.id());
    }

    pub async fn disconnect(&self) {
        let _op = self.ops.lock().await;
        self.disconnect_locked().await;
    }

    async fn disconnect_locked(&self) {
        self.stop_heartbeat_loop();
        self.adapter.disconnect().await;

        let mut state = self.state.write().await;
        state.is_connected = false;
        state.next_generation();
        self.notify(&state);
        info!("[{}] Disconnected", self.id());
    }

    /// Send BootNotification; `booted` follows the registration status
    pub async fn boot(&self, vendor: &str, model: &str) -> Result<BootResult> {
        let _op = self.ops.lock().await;
        self.boot_locked(vendor, model).await
    }

    async fn boot_locked(&self, vendor: &str, model: &str) -> Result<BootResult> {
        self.require_connected().await?;

        let result = self.adapter.send_boot_notification(model, vendor).await?;
        info!("[{}] Booted: {:?}", self.id(), result.status);

        let generation = {
            let mut state = self.state.write().await;
            state.heartbeat_interval = result.interval;
            state.booted = result.status == RegistrationStatus::Accepted;
            self.notify(&state);
            state.generation
        };

        if result.status == RegistrationStatus::Accepted && self.config.auto_heartbeat {
            self.start_heartbeat_loop(generation, result.interval);
        }

        Ok(result)
    }

    pub async fn heartbeat(&self) -> Result<DateTime<Utc>> {
        self.require_connected().await?;
        self.adapter.send_heartbeat().await
    }

    fn start_heartbeat_loop(&self, generation: u64, interval: u32) {
        let weak = self.weak_self.clone();
        let period = Duration::from_secs(u64::from(interval.max(1)));

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let Some(charge_point) = weak.upgrade() else { break };
                if charge_point.state.read().await.generation != generation {
                    debug!("[{}] Heartbeat loop ends with its connection", charge_point.id());
                    break;
                }
                if let Err(e) = charge_point.adapter.send_heartbeat().await {
                    warn!("[{}] Heartbeat failed: {}", charge_point.id(), e);
                }
            }
        });

        if let Some(previous) = self.heartbeat.lock().replace(handle) {
            previous.abort();
        }
    }

    fn stop_heartbeat_loop(&self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
    }

    // ========================================================================
    // Charging
    // ========================================================================

    /// Authorize, start a transaction and move the connector to Charging
    pub async fn start_charging(&self, connector_id: u32, id_tag: &str) -> Result<TransactionId> {
        let _op = self.ops.lock().await;
        self.start_charging_locked(connector_id, id_tag).await
    }

    async fn start_charging_locked(&self, connector_id: u32, id_tag: &str) -> Result<TransactionId> {
        let meter_start = {
            let state = self.state.read().await;
            let connector = state.connector(connector_id)?;
            if connector.status != ConnectorStatus::Available {
                return Err(Error::InvalidState(format!(
                    "connector {} is {}, expected Available",
                    connector_id, connector.status
                )));
            }
            connector.meter_value
        };

        let auth = self.adapter.authorize(id_tag).await?;
        if !auth.accepted() {
            warn!("[{}] Authorization of {} failed: {}", self.id(), id_tag, auth.status);
            return Err(Error::AuthorizationFailed(auth.status.to_string()));
        }

        self.set_status(connector_id, ConnectorStatus::Preparing).await?;

        let transaction_id = match self.request_start(connector_id, id_tag, meter_start).await {
            Ok(transaction_id) => transaction_id,
            Err(e) => {
                self.revert_to_available(connector_id).await;
                return Err(e);
            }
        };

        self.state
            .write()
            .await
            .connector_mut(connector_id)?
            .begin_transaction(transaction_id.clone(), id_tag);
        info!(
            "[{}] Connector {} charging, transaction {}",
            self.id(),
            connector_id,
            transaction_id
        );

        if let Err(e) = self
            .adapter
            .send_status_notification(connector_id, ConnectorStatus::Charging, None)
            .await
        {
            warn!(
                "[{}] Transaction {} started but StatusNotification(Charging) failed: {}",
                self.id(),
                transaction_id,
                e
            );
        }

        Ok(transaction_id)
    }

    async fn request_start(&self, connector_id: u32, id_tag: &str, meter_start: u64) -> Result<TransactionId> {
        self.adapter
            .send_status_notification(connector_id, ConnectorStatus::Preparing, None)
            .await?;

        let result = self
            .adapter
            .start_transaction(connector_id, id_tag, meter_start)
            .await?;

        match result.transaction_id {
            Some(transaction_id) if result.accepted => Ok(transaction_id),
            _ => {
                warn!("[{}] StartTransaction rejected: {}", self.id(), result.status);
                Err(Error::TransactionRejected(result.status.to_string()))
            }
        }
    }

    async fn revert_to_available(&self, connector_id: u32) {
        if self.set_status(connector_id, ConnectorStatus::Available).await.is_err() {
            return;
        }
        if let Err(e) = self
            .adapter
            .send_status_notification(connector_id, ConnectorStatus::Available, None)
            .await
        {
            warn!("[{}] StatusNotification(Available) failed: {}", self.id(), e);
        }
    }

    async fn set_status(&self, connector_id: u32, status: ConnectorStatus) -> Result<()> {
        self.state.write().await.connector_mut(connector_id)?.status = status;
        Ok(())
    }

    /// Stop the connector's transaction and return it to Available
    pub async fn stop_charging(&self, connector_id: u32, id_tag: &str) -> Result<()> {
        let _op = self.ops.lock().await;
        self.stop_charging_locked(connector_id, id_tag, StopReason::Local).await
    }

    async fn stop_charging_locked(&self, connector_id: u32, id_tag: &str, reason: StopReason) -> Result<()> {
        let (transaction_id, meter_stop) = {
            let state = self.state.read().await;
            let connector = state.connector(connector_id)?;
            match (&connector.current_transaction_id, connector.status) {
                (Some(transaction_id), ConnectorStatus::Charging) => {
                    (transaction_id.clone(), connector.meter_value)
                }
                _ => {
                    return Err(Error::InvalidState(format!(
                        "connector {} is not charging",
                        connector_id
                    )))
                }
            }
        };

        self.adapter
            .stop_transaction(&transaction_id, meter_stop, Some(id_tag), reason)
            .await?;

        self.state
            .write()
            .await
            .connector_mut(connector_id)?
            .end_transaction();
        info!(
            "[{}] Transaction {} on connector {} stopped at {} Wh",
            self.id(),
            transaction_id,
            connector_id,
            meter_stop
        );

        self.adapter
            .send_status_notification(connector_id, ConnectorStatus::Available, None)
            .await
    }

    /// Add `energy_wh` to the connector register and report the new reading
    pub async fn send_meter_values(&self, connector_id: u32, energy_wh: u64) -> Result<u64> {
        let _op = self.ops.lock().await;

        let (transaction_id, reading) = {
            let mut state = self.state.write().await;
            let connector = state.connector_mut(connector_id)?;
            let Some(transaction_id) = connector.current_transaction_id.clone().filter(|_| connector.is_charging()) else {
                return Err(Error::InvalidState(format!(
                    "connector {} is not charging",
                    connector_id
                )));
            };
            connector.meter_value = connector.meter_value.saturating_add(energy_wh);
            (transaction_id, connector.meter_value)
        };

        self.adapter
            .send_meter_values(connector_id, &transaction_id, reading)
            .await?;
        Ok(reading)
    }

    pub async fn send_firmware_status(&self, status: FirmwareStatus) -> Result<()> {
        self.require_connected().await?;
        self.adapter.send_firmware_status(status).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory adapter for state machine tests

    use super::*;
    use crate::adapter::{AuthorizeResult, CommandHandler, TransactionResult};
    use crate::ocpp::{AuthorizationStatus, FrameObserver};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::VecDeque;

    /// Records every operation and answers from a script
    #[derive(Default)]
    pub struct ScriptedAdapter {
        pub calls: SyncMutex<Vec<String>>,
        pub auth_status: SyncMutex<Option<AuthorizationStatus>>,
        pub start_results: SyncMutex<VecDeque<Result<TransactionResult>>>,
        pub fail_status: SyncMutex<Option<ConnectorStatus>>,
        pub connect_fails: SyncMutex<bool>,
        pub connected: SyncMutex<bool>,
        pub handler: SyncMutex<Option<CommandHandler>>,
    }

    impl ScriptedAdapter {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        pub fn clear_calls(&self) {
            self.calls.lock().clear();
        }

        pub fn handler(&self) -> CommandHandler {
            self.handler.lock().clone().expect("handler installed")
        }

        fn record(&self, call: String) {
            self.calls.lock().push(call);
        }
    }

    #[async_trait]
    impl ProtocolAdapter for ScriptedAdapter {
        fn version(&self) -> ProtocolVersion {
            ProtocolVersion::V16
        }

        async fn connect(&self, base_url: &str, charger_id: &str) -> Result<()> {
            self.record(format!("connect {}/{}", base_url, charger_id));
            if *self.connect_fails.lock() {
                return Err(Error::Connection("refused".into()));
            }
            *self.connected.lock() = true;
            Ok(())
        }

        async fn disconnect(&self) {
            self.record("disconnect".into());
            *self.connected.lock() = false;
        }

        fn is_connected(&self) -> bool {
            *self.connected.lock()
        }

        fn set_command_handler(&self, handler: CommandHandler) {
            *self.handler.lock() = Some(handler);
        }

        fn set_frame_observer(&self, _observer: FrameObserver) {}

        async fn send_boot_notification(&self, model: &str, vendor: &str) -> Result<BootResult> {
            self.record(format!("BootNotification {} {}", vendor, model));
            Ok(BootResult {
                status: RegistrationStatus::Accepted,
                interval: 60,
                current_time: Utc::now(),
            })
        }

        async fn send_heartbeat(&self) -> Result<DateTime<Utc>> {
            self.record("Heartbeat".into());
            Ok(Utc::now())
        }

        async fn authorize(&self, id_tag: &str) -> Result<AuthorizeResult> {
            self.record(format!("Authorize {}", id_tag));
            Ok(AuthorizeResult {
                status: self.auth_status.lock().unwrap_or(AuthorizationStatus::Accepted),
            })
        }

        async fn start_transaction(&self, connector_id: u32, id_tag: &str, meter_start: u64) -> Result<TransactionResult> {
            self.record(format!("StartTransaction {} {} {}", connector_id, id_tag, meter_start));
            self.start_results.lock().pop_front().unwrap_or_else(|| {
                Ok(TransactionResult {
                    transaction_id: Some(TransactionId::from(999)),
                    accepted: true,
                    status: AuthorizationStatus::Accepted,
                })
            })
        }

        async fn stop_transaction(&self, transaction_id: &TransactionId, meter_stop: u64, id_tag: Option<&str>, reason: StopReason) -> Result<TransactionResult> {
            self.record(format!("StopTransaction {} {} {} {:?}", transaction_id, meter_stop, id_tag.unwrap_or("-"), reason));
            Ok(TransactionResult {
                transaction_id: Some(transaction_id.clone()),
                accepted: true,
                status: AuthorizationStatus::Accepted,
            })
        }

        async fn send_status_notification(&self, connector_id: u32, status: ConnectorStatus, _error_code: Option<&str>) -> Result<()> {
            self.record(format!("StatusNotification {} {}", connector_id, status));
            if *self.fail_status.lock() == Some(status) {
                return Err(Error::Timeout {
                    action: "StatusNotification".into(),
                    message_id: "scripted".into(),
                });
            }
            Ok(())
        }

        async fn send_meter_values(&self, connector_id: u32, transaction_id: &TransactionId, value_wh: u64) -> Result<()> {
            self.record(format!("MeterValues {} {} {}", connector_id, transaction_id, value_wh));
            Ok(())
        }

        async fn send_firmware_status(&self, status: FirmwareStatus) -> Result<()> {
            self.record(format!("FirmwareStatusNotification {:?}", status));
            Ok(())
        }
    }

    pub fn charge_point(adapter: &Arc<ScriptedAdapter>) -> Arc<ChargePoint> {
        let config = ChargerConfig::new("CP1", ProtocolVersion::V16)
            .with_csms_url("ws://csms")
            .with_connector_count(2);
        ChargePoint::with_adapter(config, adapter.clone(), EventBus::new())
    }
}
