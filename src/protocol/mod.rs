//! Wire messages exchanged with the AutoGLM API
//!
//! Outbound tasks are wrapped in a [`TaskEnvelope`]. Inbound frames are JSON
//! objects classified by their optional `msg_type` field; the rest of the
//! payload stays opaque.

mod messages;

pub use messages::*;
