//! Charge points against a real mock CSMS over loopback sockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;

use evsim_core::{
    ChargePoint, ChargerConfig, ChargerState, ConnectorStatus, CsmsConfig, CsmsPeer, Direction,
    Error, ProtocolVersion, ResetPhase, SimEvent, SimulatorRegistry,
};

fn fast_defaults() -> ChargerConfig {
    ChargerConfig::default()
        .with_request_timeout(Duration::from_secs(5))
        .with_delays(
            Duration::from_millis(100),
            Duration::from_millis(100),
            Duration::from_millis(200),
        )
}

async fn start_csms() -> (Arc<CsmsPeer>, SocketAddr) {
    let csms = CsmsPeer::new(CsmsConfig::new("127.0.0.1:0".parse().unwrap()));
    let addr = csms.spawn().await.unwrap();
    (csms, addr)
}

async fn wait_for_state(charge_point: &ChargePoint, condition: impl Fn(&ChargerState) -> bool) {
    for _ in 0..300 {
        if condition(&charge_point.snapshot().await) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("charger {} never reached the expected state", charge_point.id());
}

async fn wait_for_csms(csms: &CsmsPeer, charger_id: &str) {
    for _ in 0..300 {
        if csms.is_connected(charger_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("CSMS never saw {}", charger_id);
}

/// Outgoing calls observed so far, as (action, payload)
fn drain_outgoing_calls(events: &mut broadcast::Receiver<SimEvent>) -> Vec<(String, Value)> {
    let mut calls = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SimEvent::Log { message, direction: Direction::Out, .. } = event {
            if message[0] == 2 {
                calls.push((message[2].as_str().unwrap_or_default().to_string(), message[3].clone()));
            }
        }
    }
    calls
}

#[tokio::test]
async fn test_v16_boot_and_remote_session() {
    let (csms, addr) = start_csms().await;
    let registry = SimulatorRegistry::with_defaults(fast_defaults());
    let charger = registry
        .create_charger("CP1", Some(&format!("ws://{}/ocpp", addr)), ProtocolVersion::V16)
        .unwrap();

    charger.connect(None).await.unwrap();
    let boot = charger.boot("SimVendor", "SimModel").await.unwrap();
    assert_eq!(boot.interval, 60);
    let state = charger.snapshot().await;
    assert!(state.booted);
    assert_eq!(state.heartbeat_interval, 60);

    wait_for_csms(&csms, "CP1").await;
    assert_eq!(csms.connection_version("CP1"), Some(ProtocolVersion::V16));

    let mut events = registry.subscribe();
    let reply = csms
        .trigger_command("CP1", "RemoteStartTransaction", json!({"idTag": "TAG1", "connectorId": 1}))
        .await
        .unwrap();
    assert_eq!(reply, json!({"status": "Accepted"}));

    wait_for_state(&charger, |s| s.connectors[&1].status == ConnectorStatus::Charging).await;
    // StatusNotification(Charging) follows the state change
    tokio::time::sleep(Duration::from_millis(200)).await;
    let calls = drain_outgoing_calls(&mut events);
    let flow: Vec<String> = calls
        .iter()
        .map(|(action, payload)| match action.as_str() {
            "StatusNotification" => format!("StatusNotification({})", payload["status"].as_str().unwrap_or("")),
            _ => action.clone(),
        })
        .collect();
    assert_eq!(
        flow,
        vec![
            "Authorize",
            "StatusNotification(Preparing)",
            "StartTransaction",
            "StatusNotification(Charging)",
        ]
    );

    let transaction_id = charger.snapshot().await.connectors[&1]
        .current_transaction_id
        .clone()
        .unwrap();
    let numeric_id = transaction_id.as_i64().unwrap();
    assert!((1000..10000).contains(&numeric_id));

    // unknown transaction: acknowledged, nothing sent
    let reply = csms
        .trigger_command("CP1", "RemoteStopTransaction", json!({"transactionId": "999"}))
        .await
        .unwrap();
    assert_eq!(reply, json!({"status": "Accepted"}));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(drain_outgoing_calls(&mut events).is_empty());
    assert!(charger.snapshot().await.connectors[&1].is_charging());

    let reply = csms
        .trigger_command("CP1", "RemoteStopTransaction", json!({"transactionId": numeric_id}))
        .await
        .unwrap();
    assert_eq!(reply, json!({"status": "Accepted"}));
    wait_for_state(&charger, |s| s.connectors[&1].status == ConnectorStatus::Available).await;

    let calls = drain_outgoing_calls(&mut events);
    assert_eq!(calls[0].0, "StopTransaction");
    assert_eq!(calls[0].1["idTag"], "TAG1");
    assert_eq!(calls[0].1["transactionId"], numeric_id);
    assert_eq!(calls[0].1["reason"], "Remote");

    charger.disconnect().await;
    csms.shutdown();
}

#[tokio::test]
async fn test_v201_transaction_events() {
    let (csms, addr) = start_csms().await;
    let registry = SimulatorRegistry::with_defaults(fast_defaults());
    let charger = registry
        .create_charger("CS201", Some(&format!("ws://{}", addr)), ProtocolVersion::V201)
        .unwrap();

    charger.connect(None).await.unwrap();
    charger.boot("SimVendor", "SimModel").await.unwrap();
    wait_for_csms(&csms, "CS201").await;
    assert_eq!(csms.connection_version("CS201"), Some(ProtocolVersion::V201));

    let mut events = registry.subscribe();
    let transaction_id = charger.start_charging(1, "TAG1").await.unwrap();
    assert_eq!(charger.send_meter_values(1, 1200).await.unwrap(), 1200);
    charger.stop_charging(1, "TAG1").await.unwrap();

    let transaction_events: Vec<Value> = drain_outgoing_calls(&mut events)
        .into_iter()
        .filter(|(action, _)| action == "TransactionEvent")
        .map(|(_, payload)| payload)
        .collect();
    assert_eq!(transaction_events.len(), 3);

    let kinds: Vec<(&str, u64)> = transaction_events
        .iter()
        .map(|e| (e["eventType"].as_str().unwrap(), e["seqNo"].as_u64().unwrap()))
        .collect();
    assert_eq!(kinds, vec![("Started", 0), ("Updated", 1), ("Ended", 2)]);
    assert!(transaction_events
        .iter()
        .all(|e| e["transactionInfo"]["transactionId"] == transaction_id.as_str()));

    let connector = charger.snapshot().await.connectors[&1].clone();
    assert_eq!(connector.status, ConnectorStatus::Available);
    assert_eq!(connector.meter_value, 1200);

    charger.disconnect().await;
    csms.shutdown();
}

#[tokio::test]
async fn test_reset_reconnects_and_boots() {
    let (csms, addr) = start_csms().await;
    let registry = SimulatorRegistry::with_defaults(fast_defaults());
    let charger = registry
        .create_charger("CP-R", Some(&format!("ws://{}", addr)), ProtocolVersion::V16)
        .unwrap();

    charger.connect(None).await.unwrap();
    charger.boot("SimVendor", "SimModel").await.unwrap();
    wait_for_csms(&csms, "CP-R").await;

    let reply = csms
        .trigger_command("CP-R", "Reset", json!({"type": "Soft"}))
        .await
        .unwrap();
    assert_eq!(reply, json!({"status": "Accepted"}));

    wait_for_state(&charger, |s| !s.is_connected).await;
    wait_for_state(&charger, |s| {
        s.is_connected && s.booted && s.reset_phase == ResetPhase::Idle
    })
    .await;
    wait_for_csms(&csms, "CP-R").await;

    charger.disconnect().await;
    csms.shutdown();
}

#[tokio::test]
async fn test_csms_shutdown_drops_charger_link() {
    let (csms, addr) = start_csms().await;
    let registry = SimulatorRegistry::with_defaults(fast_defaults());
    let charger = registry
        .create_charger("CP-S", Some(&format!("ws://{}", addr)), ProtocolVersion::V16)
        .unwrap();

    charger.connect(None).await.unwrap();
    charger.boot("SimVendor", "SimModel").await.unwrap();
    wait_for_csms(&csms, "CP-S").await;

    csms.shutdown();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = tokio::time::Instant::now();
    let result = charger.heartbeat().await;
    assert!(
        matches!(result, Err(Error::NotConnected) | Err(Error::Connection(_))),
        "heartbeat after CSMS shutdown: {:?}",
        result
    );
    assert!(started.elapsed() < Duration::from_secs(1));

    charger.disconnect().await;
}

#[tokio::test]
async fn test_unsupported_command_is_call_error() {
    let (csms, addr) = start_csms().await;
    let charger = ChargePoint::new(
        fast_defaults().with_csms_url(format!("ws://{}", addr)),
        Default::default(),
    );
    charger.connect(None).await.unwrap();
    wait_for_csms(&csms, charger.id()).await;

    let result = csms
        .trigger_command(charger.id(), "DataTransfer", json!({"vendorId": "x"}))
        .await;
    assert!(matches!(result, Err(Error::RemoteRejection { .. })));

    charger.disconnect().await;
    csms.shutdown();
}

#[tokio::test]
async fn test_trigger_unknown_charger() {
    let (csms, _) = start_csms().await;
    let result = csms.trigger_command("nobody", "Reset", json!({"type": "Hard"})).await;
    assert!(matches!(result, Err(Error::NotConnected)));
    csms.shutdown();
}
