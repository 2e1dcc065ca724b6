//! Charge point state
//!
//! Plain data owned by one [`super::ChargePoint`]. Transaction bookkeeping
//! keeps `current_transaction_id` set exactly while a connector is Charging.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::events::LinkStatus;
use crate::ocpp::{ConnectorStatus, TransactionId};

/// Progress of a CSMS-requested reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResetPhase {
    /// No reset in progress
    Idle,
    /// Reset accepted, waiting to drop the socket
    Resetting,
    /// Socket dropped, waiting to reconnect
    Reconnecting,
    /// Reconnected, BootNotification in flight
    Booting,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorState {
    pub connector_id: u32,
    pub status: ConnectorStatus,
    pub current_transaction_id: Option<TransactionId>,
    /// Energy register in Wh
    pub meter_value: u64,
    /// Credential that opened the active transaction
    #[serde(skip)]
    pub id_tag: Option<String>,
}

impl ConnectorState {
    pub fn new(connector_id: u32) -> Self {
        Self {
            connector_id,
            status: ConnectorStatus::Available,
            current_transaction_id: None,
            meter_value: 0,
            id_tag: None,
        }
    }

    pub fn is_charging(&self) -> bool {
        self.status == ConnectorStatus::Charging && self.current_transaction_id.is_some()
    }

    pub(crate) fn begin_transaction(&mut self, transaction_id: TransactionId, id_tag: &str) {
        self.status = ConnectorStatus::Charging;
        self.current_transaction_id = Some(transaction_id);
        self.id_tag = Some(id_tag.to_string());
    }

    pub(crate) fn end_transaction(&mut self) {
        self.status = ConnectorStatus::Available;
        self.current_transaction_id = None;
        self.id_tag = None;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargerState {
    pub charger_id: String,
    pub connectors: BTreeMap<u32, ConnectorState>,
    pub is_connected: bool,
    pub csms_url: Option<String>,
    /// Seconds, as returned by the last BootNotification
    pub heartbeat_interval: u32,
    pub booted: bool,
    /// Connection epoch, bumped on every connect and disconnect
    pub generation: u64,
    pub reset_phase: ResetPhase,
}

impl ChargerState {
    pub fn new(charger_id: impl Into<String>, connector_count: u32, csms_url: Option<String>) -> Self {
        let connectors = (1..=connector_count.max(1))
            .map(|id| (id, ConnectorState::new(id)))
            .collect();

        Self {
            charger_id: charger_id.into(),
            connectors,
            is_connected: false,
            csms_url,
            heartbeat_interval: 60,
            booted: false,
            generation: 0,
            reset_phase: ResetPhase::Idle,
        }
    }

    pub fn connector(&self, connector_id: u32) -> Result<&ConnectorState> {
        self.connectors
            .get(&connector_id)
            .ok_or(Error::ConnectorNotFound(connector_id))
    }

    pub fn connector_mut(&mut self, connector_id: u32) -> Result<&mut ConnectorState> {
        self.connectors
            .get_mut(&connector_id)
            .ok_or(Error::ConnectorNotFound(connector_id))
    }

    /// Connector running `transaction_id`, with the credential that opened it
    pub fn find_transaction(&self, transaction_id: &TransactionId) -> Option<(u32, Option<String>)> {
        self.connectors
            .values()
            .find(|c| c.current_transaction_id.as_ref() == Some(transaction_id))
            .map(|c| (c.connector_id, c.id_tag.clone()))
    }

    pub fn link_status(&self) -> LinkStatus {
        LinkStatus::from_connected(self.is_connected)
    }

    pub(crate) fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = ChargerState::new("CP1", 2, None);
        assert_eq!(state.connectors.len(), 2);
        assert!(state.connectors.values().all(|c| c.status == ConnectorStatus::Available));
        assert!(!state.is_connected);
        assert!(!state.booted);
        assert_eq!(state.heartbeat_interval, 60);
        assert_eq!(state.reset_phase, ResetPhase::Idle);

        assert_eq!(ChargerState::new("CP1", 0, None).connectors.len(), 1);
    }

    #[test]
    fn test_connector_lookup() {
        let mut state = ChargerState::new("CP1", 1, None);
        assert!(state.connector(1).is_ok());
        assert!(matches!(state.connector(3), Err(Error::ConnectorNotFound(3))));
        assert!(matches!(state.connector_mut(0), Err(Error::ConnectorNotFound(0))));
    }

    #[test]
    fn test_transaction_bookkeeping() {
        let mut state = ChargerState::new("CP1", 2, None);
        state
            .connector_mut(2)
            .unwrap()
            .begin_transaction(TransactionId::from(999), "TAG1");

        let connector = state.connector(2).unwrap();
        assert!(connector.is_charging());
        assert_eq!(
            state.find_transaction(&TransactionId::from("999")),
            Some((2, Some("TAG1".to_string())))
        );
        assert_eq!(state.find_transaction(&TransactionId::from("1000")), None);

        state.connector_mut(2).unwrap().end_transaction();
        let connector = state.connector(2).unwrap();
        assert_eq!(connector.status, ConnectorStatus::Available);
        assert!(connector.current_transaction_id.is_none());
        assert!(connector.id_tag.is_none());
    }

    #[test]
    fn test_snapshot_serialization_hides_credentials() {
        let mut state = ChargerState::new("CP1", 1, Some("ws://csms".into()));
        state.connector_mut(1).unwrap().begin_transaction(TransactionId::from(7), "SECRET");

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["chargerId"], "CP1");
        assert_eq!(value["connectors"]["1"]["currentTransactionId"], "7");
        assert!(value["connectors"]["1"].get("idTag").is_none());
    }
}
