//! OCPP-J request/response correlation
//!
//! One [`RpcEndpoint`] sits on each socket, on the charge point side as well as
//! on the CSMS side. It:
//! - assigns message ids and tracks outstanding CALLs until their reply or deadline
//! - routes CALLRESULT / CALLERROR frames to the waiting caller
//! - hands inbound CALLs to a registered handler and writes the answer back
//! - reports every frame to an optional observer (audit log only)
//!
//! The endpoint never touches the socket itself. Outbound text goes through an
//! mpsc queue drained by the connection's writer task, and the reader task
//! feeds inbound text to [`RpcEndpoint::on_inbound`] in arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use super::messages::*;
use super::types::{Direction, ProtocolVersion};
use crate::error::{Error, Result};

/// Deadline for calls originated by a charge point
pub const CHARGE_POINT_CALL_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Deadline for remote commands originated by the CSMS
pub const CSMS_COMMAND_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Answers an inbound CALL with the CALLRESULT payload
pub type InboundHandler =
    Arc<dyn Fn(String, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Receives every frame sent or received, as its JSON array
pub type FrameObserver = Arc<dyn Fn(Direction, &Value) + Send + Sync>;

/// Pending request awaiting response
struct PendingRequest {
    action: String,
    response_tx: oneshot::Sender<Result<Value>>,
}

/// Correlation engine for one OCPP-J socket
pub struct RpcEndpoint {
    label: String,
    version: ProtocolVersion,
    pending: Mutex<HashMap<String, PendingRequest>>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    handler: RwLock<Option<InboundHandler>>,
    observer: RwLock<Option<FrameObserver>>,
}

impl RpcEndpoint {
    /// `label` names the peer in log lines (usually the charger id);
    /// `version` picks the error code spelling for CALLERRORs we send
    pub fn new(label: impl Into<String>, version: ProtocolVersion) -> Self {
        Self {
            label: label.into(),
            version,
            pending: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
            handler: RwLock::new(None),
            observer: RwLock::new(None),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Bind the endpoint to a live socket's outbound queue
    pub fn attach(&self, outbound: mpsc::Sender<String>) {
        *self.outbound.lock() = Some(outbound);
    }

    /// Unbind from the socket and fail everything still outstanding
    pub fn detach(&self) {
        self.outbound.lock().take();

        let drained: Vec<PendingRequest> = self.pending.lock().drain().map(|(_, req)| req).collect();
        for req in drained {
            debug!("[{}] Failing {} on disconnect", self.label, req.action);
            let _ = req
                .response_tx
                .send(Err(Error::Connection("connection closed".into())));
        }
    }

    /// Detach only if `outbound` is still the attached queue
    ///
    /// Used by a socket's reader when it ends, so a closing old socket never
    /// tears down a newer one attached in the meantime.
    pub fn detach_if(&self, outbound: &mpsc::Sender<String>) {
        let current = self
            .outbound
            .lock()
            .as_ref()
            .map(|tx| tx.same_channel(outbound))
            .unwrap_or(false);
        if current {
            self.detach();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.outbound
            .lock()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    pub fn set_handler(&self, handler: InboundHandler) {
        *self.handler.write() = Some(handler);
    }

    pub fn clear_handler(&self) {
        self.handler.write().take();
    }

    pub fn set_observer(&self, observer: FrameObserver) {
        *self.observer.write() = Some(observer);
    }

    /// Number of CALLs still waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn sender(&self) -> Option<mpsc::Sender<String>> {
        self.outbound
            .lock()
            .as_ref()
            .filter(|tx| !tx.is_closed())
            .cloned()
    }

    fn observe(&self, direction: Direction, frame: &Value) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer(direction, frame);
        }
    }

    /// Send a CALL and wait for its CALLRESULT payload
    ///
    /// Resolves exactly once: with the reply, with the peer's CALLERROR as
    /// [`Error::RemoteRejection`], or with [`Error::Timeout`] once `timeout`
    /// elapses. A reply arriving after the timeout is discarded.
    pub async fn send_request(&self, action: &str, payload: Value, timeout: Duration) -> Result<Value> {
        let tx = self.sender().ok_or(Error::NotConnected)?;
        let (response_tx, mut response_rx) = oneshot::channel();

        let call = {
            let mut pending = self.pending.lock();
            let mut call = Call::new(action, payload);
            while pending.contains_key(&call.message_id) {
                call.message_id = Uuid::new_v4().to_string();
            }
            pending.insert(
                call.message_id.clone(),
                PendingRequest {
                    action: action.to_string(),
                    response_tx,
                },
            );
            call
        };

        let frame = call.to_value();
        debug!("[{}] Sending: {}", self.label, frame);
        self.observe(Direction::Out, &frame);

        if tx.send(frame.to_string()).await.is_err() {
            self.pending.lock().remove(&call.message_id);
            return Err(Error::Connection(format!(
                "failed to send {} [{}]",
                action, call.message_id
            )));
        }

        match tokio::time::timeout(timeout, &mut response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Connection("connection closed".into())),
            Err(_) => {
                let expired = self.pending.lock().remove(&call.message_id);
                if expired.is_some() {
                    warn!(
                        "[{}] Timeout waiting for response to {} [{}]",
                        self.label, action, call.message_id
                    );
                    return Err(Error::Timeout {
                        action: action.to_string(),
                        message_id: call.message_id,
                    });
                }
                // the reply claimed the entry first
                match response_rx.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(Error::Connection("connection closed".into())),
                }
            }
        }
    }

    /// Feed one received text frame
    ///
    /// Malformed frames are logged and dropped. Inbound CALLs are answered on a
    /// spawned task so a slow handler never stalls the reader.
    pub fn on_inbound(self: &Arc<Self>, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!("[{}] Dropping non-JSON frame: {}", self.label, e);
                return;
            }
        };

        if value.is_array() {
            self.observe(Direction::In, &value);
        }

        let message = match OcppMessage::from_value(&value) {
            Ok(message) => message,
            Err(e) => {
                warn!("[{}] Dropping malformed frame {}: {}", self.label, value, e);
                return;
            }
        };

        debug!("[{}] Received: {}", self.label, value);

        match message {
            OcppMessage::CallResult(result) => {
                self.resolve(&result.message_id, Ok(result.payload));
            }
            OcppMessage::CallError(error) => {
                self.resolve(
                    &error.message_id,
                    Err(Error::RemoteRejection {
                        code: error.error_code,
                        description: error.error_description,
                        details: error.error_details,
                    }),
                );
            }
            OcppMessage::Call(call) => self.dispatch_call(call),
        }
    }

    fn resolve(&self, message_id: &str, outcome: Result<Value>) {
        let entry = self.pending.lock().remove(message_id);
        match entry {
            Some(req) => {
                debug!("[{}] {} [{}] answered", self.label, req.action, message_id);
                let _ = req.response_tx.send(outcome);
            }
            None => {
                debug!(
                    "[{}] Discarding reply to unknown or expired request {}",
                    self.label, message_id
                );
            }
        }
    }

    fn dispatch_call(self: &Arc<Self>, call: Call) {
        let handler = self.handler.read().clone();
        let endpoint = Arc::clone(self);

        tokio::spawn(async move {
            let reply = match handler {
                None => OcppMessage::CallError(CallError::new(
                    call.message_id,
                    ErrorCode::NotSupported,
                    "No handler registered",
                )),
                Some(handler) => match handler(call.action.clone(), call.payload).await {
                    Ok(payload) => OcppMessage::CallResult(CallResult::new(call.message_id, payload)),
                    Err(e) => {
                        warn!("[{}] {} failed: {}", endpoint.label, call.action, e);
                        OcppMessage::CallError(CallError::new(
                            call.message_id,
                            e.call_error_code(endpoint.version),
                            e.to_string(),
                        ))
                    }
                },
            };
            endpoint.write_frame(reply).await;
        });
    }

    async fn write_frame(&self, message: OcppMessage) {
        let Some(tx) = self.sender() else {
            warn!(
                "[{}] Socket gone, dropping reply {}",
                self.label,
                message.message_id()
            );
            return;
        };

        let frame = message.to_value();
        debug!("[{}] Sending: {}", self.label, frame);
        self.observe(Direction::Out, &frame);

        if tx.send(frame.to_string()).await.is_err() {
            warn!("[{}] Failed to queue reply {}", self.label, message.message_id());
        }
    }
}
