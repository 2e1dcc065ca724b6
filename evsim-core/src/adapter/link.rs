//! WebSocket link between a correlator and its peer
//!
//! Handles:
//! - client connection with the OCPP subprotocol offered
//! - one writer task draining the outbound queue into the socket
//! - one reader task feeding text frames to the correlator in arrival order

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header, HeaderValue},
        Message,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::ocpp::{Action, ProtocolVersion, RpcEndpoint};

/// Capacity of the per-socket outbound queue
const OUTBOUND_QUEUE: usize = 64;

/// Build the full OCPP WebSocket URL
pub fn build_ocpp_url(base_url: &str, charger_id: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), charger_id)
}

/// Attach `endpoint` to an open socket and start its reader and writer
///
/// Returns the reader handle. Aborting it closes the socket: the writer sends
/// a Close frame once the last outbound sender is gone.
pub(crate) fn spawn_pumps<S>(ws_stream: WebSocketStream<S>, endpoint: Arc<RpcEndpoint>) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (send_tx, mut send_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    endpoint.attach(send_tx.clone());

    let label = endpoint.label().to_string();
    tokio::spawn(async move {
        while let Some(text) = send_rx.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                error!("[{}] Failed to send WebSocket message: {}", label, e);
                break;
            }
        }
        let _ = ws_tx.close().await;
        debug!("[{}] Writer finished", label);
    });

    tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => endpoint.on_inbound(&text),
                Ok(Message::Close(_)) => {
                    info!("[{}] WebSocket closed by peer", endpoint.label());
                    break;
                }
                Ok(Message::Binary(_)) => {
                    warn!("[{}] Ignoring binary frame", endpoint.label());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("[{}] WebSocket error: {}", endpoint.label(), e);
                    break;
                }
            }
        }
        endpoint.detach_if(&send_tx);
    })
}

/// Client side socket plus correlator for one charge point
pub struct Link {
    endpoint: Arc<RpcEndpoint>,
    version: ProtocolVersion,
    request_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Link {
    pub fn new(label: &str, version: ProtocolVersion, request_timeout: Duration) -> Self {
        Self {
            endpoint: Arc::new(RpcEndpoint::new(label, version)),
            version,
            request_timeout,
            reader: Mutex::new(None),
        }
    }

    pub(crate) fn endpoint(&self) -> &Arc<RpcEndpoint> {
        &self.endpoint
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Open `{base_url}/{charger_id}`, replacing any previous socket
    pub async fn open(&self, base_url: &str, charger_id: &str) -> Result<()> {
        self.close();

        let url = build_ocpp_url(base_url, charger_id);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Connection(format!("invalid CSMS url {}: {}", url, e)))?;
        request.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(self.version.subprotocol()),
        );

        info!("[{}] Connecting to CSMS: {}", self.endpoint.label(), url);

        let (ws_stream, response) = connect_async(request).await.map_err(|e| {
            error!("[{}] WebSocket connection failed: {}", self.endpoint.label(), e);
            Error::Connection(format!("{}: {}", url, e))
        })?;

        let accepted_protocol = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());

        if accepted_protocol != Some(self.version.subprotocol()) {
            warn!(
                "[{}] CSMS did not accept {} subprotocol, got: {:?}",
                self.endpoint.label(),
                self.version,
                accepted_protocol
            );
        }

        info!("[{}] WebSocket connected to {}", self.endpoint.label(), url);
        *self.reader.lock() = Some(spawn_pumps(ws_stream, self.endpoint.clone()));
        Ok(())
    }

    pub fn close(&self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.endpoint.detach();
    }

    pub fn is_open(&self) -> bool {
        self.endpoint.is_attached()
    }

    /// Send one typed request and decode the typed reply
    pub async fn call<Req, Resp>(&self, action: Action, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)?;
        let reply = self
            .endpoint
            .send_request(action.as_str(), payload, self.request_timeout)
            .await?;

        serde_json::from_value(reply)
            .map_err(|e| Error::Protocol(format!("invalid {} response: {}", action, e)))
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::{v16, CallResult, OcppMessage};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    #[test]
    fn test_build_ocpp_url() {
        let url = build_ocpp_url("ws://localhost:9220/ocpp", "CP-001");
        assert_eq!(url, "ws://localhost:9220/ocpp/CP-001");

        let url = build_ocpp_url("ws://localhost:9220/ocpp/", "CP-001");
        assert_eq!(url, "ws://localhost:9220/ocpp/CP-001");
    }

    #[tokio::test]
    async fn test_unreachable_csms_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let link = Link::new("CP1", ProtocolVersion::V16, Duration::from_secs(1));
        let result = link.open(&format!("ws://{}", addr), "CP1").await;
        assert!(matches!(result, Err(Error::Connection(_))));
        assert!(!link.is_open());
    }

    #[tokio::test]
    async fn test_call_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut path = String::new();
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, mut resp: Response| -> std::result::Result<Response, ErrorResponse> {
                path = req.uri().path().to_string();
                resp.headers_mut().insert(
                    header::SEC_WEBSOCKET_PROTOCOL,
                    HeaderValue::from_static("ocpp1.6"),
                );
                Ok(resp)
            })
            .await
            .unwrap();

            let Some(Ok(Message::Text(text))) = ws.next().await else { panic!("Expected text") };
            let OcppMessage::Call(call) = OcppMessage::parse(&text).unwrap() else { panic!("Expected Call") };
            assert_eq!(call.action, "Heartbeat");

            let reply = CallResult::new(
                call.message_id,
                serde_json::json!({"currentTime": "2026-01-20T12:00:00Z"}),
            );
            ws.send(Message::Text(reply.to_value().to_string().into())).await.unwrap();
            path
        });

        let link = Link::new("CP1", ProtocolVersion::V16, Duration::from_secs(5));
        link.open(&format!("ws://{}/ocpp/", addr), "CP1").await.unwrap();
        assert!(link.is_open());

        let resp: v16::HeartbeatResponse = link
            .call(Action::Heartbeat, &v16::HeartbeatRequest {})
            .await
            .unwrap();
        assert_eq!(resp.current_time.to_rfc3339(), "2026-01-20T12:00:00+00:00");
        assert_eq!(server.await.unwrap(), "/ocpp/CP1");

        link.close();
        assert!(!link.is_open());
    }
}
