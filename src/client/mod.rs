//! Reconnecting WebSocket client for the AutoGLM API
//!
//! Provides:
//! - A connection state machine driven by a single background task
//! - Exponential backoff with jitter and a hard retry ceiling
//! - Fatal handling of rejected tokens
//! - A bounded, ordered log of received responses and a broadcast event stream

mod connection;
mod connector;
mod policy;
mod responses;
mod state;

pub use connection::{AutoGlmClient, ClientConfig};
pub use connector::{Connector, WsConnector, WsSink, WsStream};
pub use policy::{ReconnectConfig, ReconnectPolicy, RetryDecision};
pub use responses::{ResponseLog, ResponseRecord};
pub use state::{ClientEvent, ClientStatus, ConnectionState, FailureReason, TaskReceipt};

#[cfg(test)]
pub(crate) use connector::mock;
