//! Simulator registry
//!
//! Explicit owner of every simulated charge point in a process, plus the event
//! bus they publish to.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::charge_point::ChargePoint;
use crate::config::ChargerConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, LinkStatus, SimEvent};
use crate::ocpp::ProtocolVersion;

/// Listing entry returned by [`SimulatorRegistry::chargers`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargerSummary {
    pub charger_id: String,
    pub status: LinkStatus,
    pub version: ProtocolVersion,
}

pub struct SimulatorRegistry {
    chargers: RwLock<HashMap<String, Arc<ChargePoint>>>,
    events: EventBus,
    defaults: ChargerConfig,
}

impl SimulatorRegistry {
    pub fn new() -> Self {
        Self::with_defaults(ChargerConfig::default())
    }

    /// Registry whose chargers start from `defaults` (vendor, delays, ...)
    pub fn with_defaults(defaults: ChargerConfig) -> Self {
        Self {
            chargers: RwLock::new(HashMap::new()),
            events: EventBus::new(),
            defaults,
        }
    }

    pub fn create_charger(
        &self,
        charger_id: &str,
        csms_url: Option<&str>,
        version: ProtocolVersion,
    ) -> Result<Arc<ChargePoint>> {
        let mut chargers = self.chargers.write();
        if chargers.contains_key(charger_id) {
            return Err(Error::DuplicateCharger(charger_id.to_string()));
        }

        let config = ChargerConfig {
            charger_id: charger_id.to_string(),
            csms_url: csms_url.map(str::to_string),
            version,
            ..self.defaults.clone()
        };
        let charge_point = ChargePoint::new(config, self.events.clone());
        chargers.insert(charger_id.to_string(), charge_point.clone());
        drop(chargers);

        info!("Created charger {} ({})", charger_id, version);
        self.events.publish(SimEvent::ChargerCreated {
            charger_id: charger_id.to_string(),
            version,
            csms_url: csms_url.map(str::to_string),
        });
        Ok(charge_point)
    }

    pub fn get_charger(&self, charger_id: &str) -> Option<Arc<ChargePoint>> {
        self.chargers.read().get(charger_id).cloned()
    }

    /// Summary of every charger, sorted by id
    pub async fn chargers(&self) -> Vec<ChargerSummary> {
        let mut chargers: Vec<Arc<ChargePoint>> = self.chargers.read().values().cloned().collect();
        chargers.sort_by(|a, b| a.id().cmp(b.id()));

        let mut summaries = Vec::with_capacity(chargers.len());
        for charge_point in chargers {
            summaries.push(ChargerSummary {
                charger_id: charge_point.id().to_string(),
                status: LinkStatus::from_connected(charge_point.is_connected().await),
                version: charge_point.version(),
            });
        }
        summaries
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SimEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

impl Default for SimulatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_list() {
        let registry = SimulatorRegistry::new();
        let mut events = registry.subscribe();

        registry
            .create_charger("CP2", Some("ws://localhost:9220"), ProtocolVersion::V201)
            .unwrap();
        registry.create_charger("CP1", None, ProtocolVersion::V16).unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            SimEvent::ChargerCreated {
                charger_id: "CP2".into(),
                version: ProtocolVersion::V201,
                csms_url: Some("ws://localhost:9220".into()),
            }
        );

        let listing = registry.chargers().await;
        assert_eq!(
            listing,
            vec![
                ChargerSummary {
                    charger_id: "CP1".into(),
                    status: LinkStatus::Disconnected,
                    version: ProtocolVersion::V16,
                },
                ChargerSummary {
                    charger_id: "CP2".into(),
                    status: LinkStatus::Disconnected,
                    version: ProtocolVersion::V201,
                },
            ]
        );
        assert_eq!(
            serde_json::to_value(&listing[0]).unwrap(),
            serde_json::json!({"chargerId": "CP1", "status": "Disconnected", "version": "ocpp1.6"})
        );
    }

    #[tokio::test]
    async fn test_duplicate_charger() {
        let registry = SimulatorRegistry::new();
        registry.create_charger("CP1", None, ProtocolVersion::V16).unwrap();

        let result = registry.create_charger("CP1", None, ProtocolVersion::V201);
        assert!(matches!(result, Err(Error::DuplicateCharger(ref id)) if id == "CP1"));
        assert_eq!(registry.get_charger("CP1").unwrap().version(), ProtocolVersion::V16);
        assert!(registry.get_charger("CP2").is_none());
    }

    #[tokio::test]
    async fn test_defaults_flow_into_chargers() {
        let registry = SimulatorRegistry::with_defaults(
            ChargerConfig::default().with_vendor("EK", "EK3").with_connector_count(3),
        );
        let charge_point = registry.create_charger("CP1", None, ProtocolVersion::V16).unwrap();

        assert_eq!(charge_point.config().vendor, "EK");
        assert_eq!(charge_point.snapshot().await.connectors.len(), 3);
    }
}
