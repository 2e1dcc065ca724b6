//! Simulator event bus
//!
//! Charge points publish raw frames and connection changes here. Nothing inside
//! the core consumes these events; they exist for dashboards and logs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::ocpp::{Direction, ProtocolVersion};

/// Events buffered per subscriber before the slowest one starts lagging
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

impl LinkStatus {
    pub fn from_connected(connected: bool) -> Self {
        if connected {
            LinkStatus::Connected
        } else {
            LinkStatus::Disconnected
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    /// One OCPP-J frame as it crossed the socket
    #[serde(rename_all = "camelCase")]
    Log {
        charger_id: String,
        message: Value,
        direction: Direction,
    },

    #[serde(rename_all = "camelCase")]
    ChargerUpdated {
        charger_id: String,
        status: LinkStatus,
        booted: bool,
    },

    #[serde(rename_all = "camelCase")]
    ChargerCreated {
        charger_id: String,
        version: ProtocolVersion,
        csms_url: Option<String>,
    },
}

impl SimEvent {
    pub fn charger_id(&self) -> &str {
        match self {
            SimEvent::Log { charger_id, .. }
            | SimEvent::ChargerUpdated { charger_id, .. }
            | SimEvent::ChargerCreated { charger_id, .. } => charger_id,
        }
    }
}

/// Fan-out of [`SimEvent`]s; dropping a receiver unsubscribes it
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SimEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: SimEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SimEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shapes() {
        let log = SimEvent::Log {
            charger_id: "CP1".into(),
            message: serde_json::json!([2, "m1", "Heartbeat", {}]),
            direction: Direction::Out,
        };
        assert_eq!(
            serde_json::to_value(&log).unwrap(),
            serde_json::json!({
                "type": "log",
                "chargerId": "CP1",
                "message": [2, "m1", "Heartbeat", {}],
                "direction": "out"
            })
        );

        let updated = SimEvent::ChargerUpdated {
            charger_id: "CP1".into(),
            status: LinkStatus::Connected,
            booted: true,
        };
        assert_eq!(
            serde_json::to_value(&updated).unwrap(),
            serde_json::json!({"type": "charger_updated", "chargerId": "CP1", "status": "Connected", "booted": true})
        );

        let created = SimEvent::ChargerCreated {
            charger_id: "CP1".into(),
            version: ProtocolVersion::V201,
            csms_url: Some("ws://localhost:9220".into()),
        };
        assert_eq!(
            serde_json::to_value(&created).unwrap(),
            serde_json::json!({
                "type": "charger_created",
                "chargerId": "CP1",
                "version": "ocpp2.0.1",
                "csmsUrl": "ws://localhost:9220"
            })
        );
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new();
        bus.publish(SimEvent::ChargerUpdated {
            charger_id: "nobody-listens".into(),
            status: LinkStatus::Disconnected,
            booted: false,
        });

        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(SimEvent::ChargerUpdated {
            charger_id: "CP1".into(),
            status: LinkStatus::Connected,
            booted: false,
        });
        assert_eq!(rx.recv().await.unwrap().charger_id(), "CP1");

        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
