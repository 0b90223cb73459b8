//! Protocol message definitions
//!
//! The outbound envelope mirrors what the AutoGLM developer endpoint expects.
//! Inbound frames are kept as raw JSON plus a [`FrameKind`] classification.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// `msg_type` of every outbound task
pub const CLIENT_MSG_TYPE: &str = "client_test";

/// `biz_type` of every outbound task
pub const BIZ_TYPE: &str = "test_agent";

/// Inbound `msg_type` values that mark the end of a task
pub const COMPLETION_MSG_TYPES: [&str; 3] = ["task_result", "task_complete", "agent_finish"];

// ─────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────

/// Envelope wrapping a user task on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Conversation assigned by the server (empty until a session frame arrives)
    pub conversation_id: String,

    /// Always [`CLIENT_MSG_TYPE`]
    pub msg_type: String,

    /// Unique message ID
    pub msg_id: Uuid,

    /// Task payload
    pub data: TaskData,
}

/// Payload of a [`TaskEnvelope`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskData {
    pub biz_type: String,
    pub instruction: String,
}

impl TaskEnvelope {
    /// Wrap an instruction for the given conversation
    pub fn new(instruction: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            conversation_id: conversation_id.into(),
            msg_type: CLIENT_MSG_TYPE.to_string(),
            msg_id: Uuid::new_v4(),
            data: TaskData {
                biz_type: BIZ_TYPE.to_string(),
                instruction: instruction.into(),
            },
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ─────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────

/// Classification of an inbound frame by its `msg_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// `server_heartbeat`: liveness only, never stored
    Heartbeat,
    /// `server_init`
    Init,
    /// `server_session`: carries the conversation id
    Session,
    /// `agent_response`
    AgentResponse,
    /// One of [`COMPLETION_MSG_TYPES`]
    Completion,
    /// `server_error`
    ServerError,
    /// Anything else, including frames without `msg_type`
    Other,
}

impl FrameKind {
    /// Classify a `msg_type` value
    pub fn from_msg_type(msg_type: &str) -> Self {
        match msg_type {
            "server_heartbeat" => FrameKind::Heartbeat,
            "server_init" => FrameKind::Init,
            "server_session" => FrameKind::Session,
            "agent_response" => FrameKind::AgentResponse,
            "server_error" => FrameKind::ServerError,
            t if is_completion(t) => FrameKind::Completion,
            _ => FrameKind::Other,
        }
    }
}

/// Whether a `msg_type` ends a task
pub fn is_completion(msg_type: &str) -> bool {
    COMPLETION_MSG_TYPES.contains(&msg_type)
}

/// A parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    /// `msg_type` field, or `unknown` when absent
    pub msg_type: String,

    /// Full JSON body
    pub body: Value,
}

impl InboundFrame {
    /// Parse a text frame
    pub fn from_json(text: &str) -> Result<Self> {
        let body: Value = serde_json::from_str(text)
            .map_err(|e| Error::malformed(format!("invalid JSON: {}", e)))?;
        Self::from_value(body)
    }

    /// Parse a binary frame (must be UTF-8 JSON)
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::malformed(format!("binary frame is not UTF-8: {}", e)))?;
        Self::from_json(text)
    }

    fn from_value(body: Value) -> Result<Self> {
        let Some(object) = body.as_object() else {
            return Err(Error::malformed("frame is not a JSON object"));
        };
        let msg_type = object
            .get("msg_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Ok(Self { msg_type, body })
    }

    /// Classification of this frame
    pub fn kind(&self) -> FrameKind {
        FrameKind::from_msg_type(&self.msg_type)
    }

    /// Conversation id carried by a session frame, if any
    pub fn conversation_id(&self) -> Option<&str> {
        self.body
            .get("conversation_id")
            .or_else(|| self.body.get("data").and_then(|d| d.get("conversation_id")))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
