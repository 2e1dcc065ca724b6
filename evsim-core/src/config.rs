//! Configuration for simulated charge points and the mock CSMS

use std::net::SocketAddr;
use std::time::Duration;

use crate::ocpp::rpc::{CHARGE_POINT_CALL_TIMEOUT, CSMS_COMMAND_TIMEOUT};
use crate::ocpp::ProtocolVersion;

/// Settings for one simulated charge point
#[derive(Debug, Clone)]
pub struct ChargerConfig {
    /// Identity appended to the CSMS URL
    pub charger_id: String,

    /// CSMS WebSocket URL (without charger id)
    pub csms_url: Option<String>,

    pub version: ProtocolVersion,

    /// Vendor name for BootNotification
    pub vendor: String,

    /// Model name for BootNotification
    pub model: String,

    /// Number of connectors, numbered from 1
    pub connector_count: u32,

    /// Deadline for calls to the CSMS
    pub request_timeout: Duration,

    /// Wait between accepting a remote start/stop and acting on it
    pub remote_action_delay: Duration,

    /// Wait between accepting a Reset and dropping the socket
    pub reset_delay: Duration,

    /// Wait between dropping the socket on Reset and reconnecting
    pub reconnect_delay: Duration,

    /// Send Heartbeat at the CSMS interval after an accepted boot
    pub auto_heartbeat: bool,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            charger_id: "CP-001".to_string(),
            csms_url: None,
            version: ProtocolVersion::V16,
            vendor: "SimVendor".to_string(),
            model: "SimModel".to_string(),
            connector_count: 1,
            request_timeout: CHARGE_POINT_CALL_TIMEOUT,
            remote_action_delay: Duration::from_secs(1),
            reset_delay: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(2),
            auto_heartbeat: false,
        }
    }
}

impl ChargerConfig {
    /// Create config with basic parameters
    pub fn new(charger_id: impl Into<String>, version: ProtocolVersion) -> Self {
        Self {
            charger_id: charger_id.into(),
            version,
            ..Default::default()
        }
    }

    pub fn with_csms_url(mut self, url: impl Into<String>) -> Self {
        self.csms_url = Some(url.into());
        self
    }

    /// Set vendor info
    pub fn with_vendor(mut self, vendor: impl Into<String>, model: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self.model = model.into();
        self
    }

    pub fn with_connector_count(mut self, count: u32) -> Self {
        self.connector_count = count.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the remote action, reset and reconnect delays at once
    pub fn with_delays(mut self, remote_action: Duration, reset: Duration, reconnect: Duration) -> Self {
        self.remote_action_delay = remote_action;
        self.reset_delay = reset;
        self.reconnect_delay = reconnect;
        self
    }

    pub fn with_auto_heartbeat(mut self, enabled: bool) -> Self {
        self.auto_heartbeat = enabled;
        self
    }
}

/// Settings for the mock CSMS
#[derive(Debug, Clone)]
pub struct CsmsConfig {
    pub bind_addr: SocketAddr,

    /// Interval returned in BootNotification replies, in seconds
    pub heartbeat_interval: u32,

    /// Deadline for remote commands sent to charge points
    pub command_timeout: Duration,
}

impl Default for CsmsConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9220)),
            heartbeat_interval: 60,
            command_timeout: CSMS_COMMAND_TIMEOUT,
        }
    }
}

impl CsmsConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_heartbeat_interval(mut self, seconds: u32) -> Self {
        self.heartbeat_interval = seconds;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}
