//! Connection state, events and status snapshots

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::ResponseRecord;
use crate::error::Error;

// ─────────────────────────────────────────────────────────────────
// Connection State
// ─────────────────────────────────────────────────────────────────

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected (initial, or between attempts)
    #[default]
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Handshake completed, tasks may be sent
    Connected,
    /// Gave up: retries exhausted or token rejected
    Failed,
    /// Explicitly stopped
    ShutDown,
}

impl ConnectionState {
    /// Lowercase name used in logs and the status API
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::ShutDown => "shutdown",
        }
    }

    /// No handshake will ever be attempted again from this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::ShutDown)
    }

    /// Whether moving to `next` is allowed
    pub(crate) fn can_move_to(&self, next: ConnectionState) -> bool {
        match self {
            ConnectionState::ShutDown => false,
            ConnectionState::Failed => next == ConnectionState::ShutDown,
            _ => *self != next,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────
// Terminal Failure
// ─────────────────────────────────────────────────────────────────

/// Why the client entered [`ConnectionState::Failed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The endpoint rejected the token
    Authentication { message: String },
    /// Too many consecutive failed handshakes
    RetriesExhausted { attempts: u32 },
    /// Any other non-retryable handshake error
    Fatal { message: String },
}

impl FailureReason {
    /// Classify a non-retryable handshake error
    pub(crate) fn from_error(err: &Error) -> Self {
        match err {
            Error::AuthenticationFailed { message } => FailureReason::Authentication {
                message: message.clone(),
            },
            Error::RetriesExhausted { attempts } => FailureReason::RetriesExhausted {
                attempts: *attempts,
            },
            other => FailureReason::Fatal {
                message: other.to_string(),
            },
        }
    }

    /// Error returned to callers for this failure
    pub fn to_error(&self) -> Error {
        match self {
            FailureReason::Authentication { message } => Error::auth(message.clone()),
            FailureReason::RetriesExhausted { attempts } => Error::RetriesExhausted {
                attempts: *attempts,
            },
            FailureReason::Fatal { message } => Error::Internal(message.clone()),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_error())
    }
}

// ─────────────────────────────────────────────────────────────────
// Event Channel
// ─────────────────────────────────────────────────────────────────

/// Events emitted by the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection state changed
    StateChanged(ConnectionState),

    /// A response frame was stored
    Response(ResponseRecord),

    /// The client gave up; emitted exactly once
    Failed(FailureReason),
}

/// Acknowledgement that a task was written to the socket
#[derive(Debug, Clone, Serialize)]
pub struct TaskReceipt {
    /// `msg_id` of the envelope
    pub msg_id: Uuid,

    /// Conversation the task was sent in
    pub conversation_id: String,

    /// When the frame was written
    pub sent_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────
// Client State
// ─────────────────────────────────────────────────────────────────

/// Mutable bookkeeping shared between the connection task and callers
#[derive(Debug, Default)]
pub(crate) struct ClientState {
    /// Consecutive failed handshakes
    pub reconnect_attempts: u32,

    /// Last heartbeat frame or pong
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Conversation assigned by the server
    pub conversation_id: String,

    /// Most recent connection error
    pub last_error: Option<String>,

    /// Set once on entering `Failed`
    pub failure: Option<FailureReason>,

    /// When the current connection was established
    pub connected_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the client
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub conversation_id: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub stored_responses: usize,
}
