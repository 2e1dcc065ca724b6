//! OCPP-J protocol layer
//!
//! - `messages`: JSON-RPC framing (CALL, CALLRESULT, CALLERROR)
//! - `rpc`: message id correlation, timeouts and inbound call dispatch
//! - `types`: version-independent types used by the core
//! - `v16` / `v201`: per-version wire records

pub mod messages;
pub mod rpc;
pub mod types;
pub mod v16;
pub mod v201;

pub use messages::*;
pub use rpc::{FrameObserver, InboundHandler, RpcEndpoint};
pub use types::*;
