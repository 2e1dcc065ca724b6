//! # evsim core
//!
//! OCPP-J charge point emulator for OCPP 1.6 and 2.0.1, with a mock CSMS to
//! drive it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │      SimulatorRegistry       │──► EventBus (log / charger_updated / ...)
//! │  ┌────────────────────────┐  │
//! │  │      ChargePoint       │  │  connectors, transactions, reset phases
//! │  └───────────┬────────────┘  │
//! │  ┌───────────▼────────────┐  │
//! │  │    ProtocolAdapter     │  │  Ocpp16Adapter | Ocpp201Adapter
//! │  └───────────┬────────────┘  │
//! │  ┌───────────▼────────────┐  │
//! │  │  RpcEndpoint + Link    │  │  message ids, pending calls, timeouts
//! │  └───────────┬────────────┘  │
//! └──────────────┼───────────────┘
//!                │ WebSocket, ocpp1.6 / ocpp2.0.1
//!                ▼
//! ┌──────────────────────────────┐
//! │  CsmsPeer (AutoResponder)    │  canned replies, remote commands
//! └──────────────────────────────┘
//! ```
//!
//! ## Action mapping
//!
//! | Operation | OCPP 1.6 | OCPP 2.0.1 |
//! |-----------|----------|------------|
//! | boot | BootNotification | BootNotification |
//! | authorize | Authorize (`idTag`) | Authorize (`idToken`) |
//! | start | StartTransaction | TransactionEvent `Started` |
//! | meter values | MeterValues | TransactionEvent `Updated` |
//! | stop | StopTransaction | TransactionEvent `Ended` |
//! | remote start | RemoteStartTransaction | RequestStartTransaction |
//! | remote stop | RemoteStopTransaction | RequestStopTransaction |
//!
//! ## Usage
//!
//! ```no_run
//! use evsim_core::{CsmsConfig, CsmsPeer, ProtocolVersion, SimulatorRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let csms = CsmsPeer::new(CsmsConfig::new("127.0.0.1:9220".parse()?));
//!     let addr = csms.spawn().await?;
//!
//!     let registry = SimulatorRegistry::new();
//!     let charger = registry.create_charger(
//!         "CP-001",
//!         Some(&format!("ws://{}", addr)),
//!         ProtocolVersion::V16,
//!     )?;
//!     charger.connect(None).await?;
//!     charger.boot("SimVendor", "SimModel").await?;
//!     charger.start_charging(1, "TAG1").await?;
//!
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod charge_point;
pub mod config;
pub mod csms;
pub mod error;
pub mod events;
pub mod ocpp;
pub mod registry;

pub use adapter::{BootResult, CommandReply, ProtocolAdapter, RemoteCommand, StopReason};
pub use charge_point::{ChargePoint, ChargerState, ConnectorState, ResetPhase};
pub use config::{ChargerConfig, CsmsConfig};
pub use csms::CsmsPeer;
pub use error::{Error, Result};
pub use events::{EventBus, LinkStatus, SimEvent};
pub use registry::{ChargerSummary, SimulatorRegistry};

// Re-export key types
pub use ocpp::{
    Action, ConnectorStatus, Direction, FirmwareStatus, ProtocolVersion, TransactionId,
};
