//! Mock CSMS
//!
//! Accepts charge point sockets on `ws://{bind_addr}/.../{chargerId}`, answers
//! their calls through an [`AutoResponder`] and lets the operator push remote
//! commands down a live connection.

pub mod responder;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, FutureExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tracing::{debug, error, info, warn};

use crate::adapter::link::spawn_pumps;
use crate::config::CsmsConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, SimEvent};
use crate::ocpp::{Direction, ProtocolVersion, RpcEndpoint};

pub use responder::{infer_version, AutoResponder};

/// First wait after a failed accept
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Longest wait between failed accepts
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(5);

/// One accepted charge point socket
pub struct PeerConnection {
    pub charger_id: String,
    pub version: ProtocolVersion,
    endpoint: Arc<RpcEndpoint>,
    reader: AbortHandle,
}

impl PeerConnection {
    /// Aborting the reader drops the last outbound sender, so the writer
    /// sends Close and the charge point sees the socket end
    fn close(&self) {
        self.reader.abort();
        self.endpoint.detach();
    }
}

pub struct CsmsPeer {
    config: CsmsConfig,
    responder: Arc<AutoResponder>,
    connections: RwLock<HashMap<String, Arc<PeerConnection>>>,
    server: Mutex<Option<JoinHandle<()>>>,
    events: EventBus,
}

impl CsmsPeer {
    pub fn new(config: CsmsConfig) -> Arc<Self> {
        Self::with_events(config, EventBus::new())
    }

    /// Peer publishing every frame it sends or receives on `events`
    pub fn with_events(config: CsmsConfig, events: EventBus) -> Arc<Self> {
        let responder = Arc::new(AutoResponder::new(config.heartbeat_interval));
        Arc::new(Self {
            config,
            responder,
            connections: RwLock::new(HashMap::new()),
            server: Mutex::new(None),
            events,
        })
    }

    /// Frames seen from the CSMS side, `direction` relative to the CSMS
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SimEvent> {
        self.events.subscribe()
    }

    /// Bind `config.bind_addr` and accept connections in the background
    pub async fn spawn(self: &Arc<Self>) -> Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        info!("Mock CSMS listening on ws://{}", addr);

        let handle = tokio::spawn(Self::serve(self.clone(), listener));
        if let Some(previous) = self.server.lock().replace(handle) {
            previous.abort();
        }
        Ok(addr)
    }

    /// Accept loop; runs until the task is aborted
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        let mut backoff = ACCEPT_BACKOFF;
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    backoff = ACCEPT_BACKOFF;
                    tokio::spawn(self.clone().handle_connection(stream, addr));
                }
                Err(e) => {
                    warn!("Accept failed: {}, retrying in {:?}", e, backoff);
                    tokio::time::sleep(backoff).await;
                    backoff = next_accept_backoff(backoff);
                }
            }
        }
    }

    /// Stop accepting and drop every live connection
    pub fn shutdown(&self) {
        if let Some(server) = self.server.lock().take() {
            server.abort();
        }
        let drained: Vec<Arc<PeerConnection>> =
            self.connections.write().drain().map(|(_, c)| c).collect();
        for connection in drained {
            info!("Closing connection to {}", connection.charger_id);
            connection.close();
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let mut path = String::new();
        let mut selected = None;

        let callback = |request: &Request, mut response: Response| -> std::result::Result<Response, ErrorResponse> {
            path = request.uri().path().to_string();
            let offered = request
                .headers()
                .get(header::SEC_WEBSOCKET_PROTOCOL)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            selected = select_subprotocol(offered);
            if let Some(version) = selected {
                response.headers_mut().insert(
                    header::SEC_WEBSOCKET_PROTOCOL,
                    HeaderValue::from_static(version.subprotocol()),
                );
            }
            Ok(response)
        };

        let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                error!("WebSocket handshake with {} failed: {}", addr, e);
                return;
            }
        };

        let charger_id = charger_id_from_path(&path).unwrap_or_else(|| {
            warn!("No charger id in path {:?}, using peer address {}", path, addr);
            addr.to_string()
        });
        let version = selected.unwrap_or(ProtocolVersion::V16);
        info!("Charger {} connected ({})", charger_id, version);

        let endpoint = Arc::new(RpcEndpoint::new(format!("CSMS/{}", charger_id), version));
        let responder = self.responder.clone();
        endpoint.set_handler(Arc::new(move |action: String, payload: Value| {
            future::ready(responder.respond(&action, &payload, version)).boxed()
        }));

        let events = self.events.clone();
        let observed_id = charger_id.clone();
        endpoint.set_observer(Arc::new(move |direction: Direction, frame: &Value| {
            events.publish(SimEvent::Log {
                charger_id: observed_id.clone(),
                message: frame.clone(),
                direction,
            });
        }));

        let reader = spawn_pumps(ws_stream, endpoint.clone());
        let connection = Arc::new(PeerConnection {
            charger_id: charger_id.clone(),
            version,
            endpoint: endpoint.clone(),
            reader: reader.abort_handle(),
        });
        if self
            .connections
            .write()
            .insert(charger_id.clone(), connection.clone())
            .is_some()
        {
            warn!("Charger {} reconnected, replacing previous connection", charger_id);
        }

        if let Err(e) = reader.await {
            debug!("Reader for {} ended: {}", charger_id, e);
        }
        endpoint.detach();

        let mut connections = self.connections.write();
        if connections
            .get(&charger_id)
            .is_some_and(|current| Arc::ptr_eq(current, &connection))
        {
            connections.remove(&charger_id);
            info!("Charger {} disconnected", charger_id);
        }
    }

    /// Ids of the charge points currently connected, sorted
    pub fn connected_chargers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_connected(&self, charger_id: &str) -> bool {
        self.connections.read().contains_key(charger_id)
    }

    /// Negotiated version of a live connection
    pub fn connection_version(&self, charger_id: &str) -> Option<ProtocolVersion> {
        self.connections.read().get(charger_id).map(|c| c.version)
    }

    /// Send a CSMS-initiated call and wait for the charge point's reply
    pub async fn trigger_command(&self, charger_id: &str, action: &str, payload: Value) -> Result<Value> {
        let endpoint = self
            .connections
            .read()
            .get(charger_id)
            .map(|c| c.endpoint.clone())
            .ok_or(Error::NotConnected)?;

        info!("Sending {} to {}", action, charger_id);
        endpoint
            .send_request(action, payload, self.config.command_timeout)
            .await
    }
}

impl Drop for CsmsPeer {
    fn drop(&mut self) {
        if let Some(server) = self.server.get_mut().take() {
            server.abort();
        }
    }
}

fn next_accept_backoff(current: Duration) -> Duration {
    std::cmp::min(current * 2, MAX_ACCEPT_BACKOFF)
}

/// Prefer 2.0.1 when the client offers both
fn select_subprotocol(offered: &str) -> Option<ProtocolVersion> {
    let offered: Vec<&str> = offered.split(',').map(str::trim).collect();
    [ProtocolVersion::V201, ProtocolVersion::V16]
        .into_iter()
        .find(|v| offered.contains(&v.subprotocol()))
}

fn charger_id_from_path(path: &str) -> Option<String> {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}
