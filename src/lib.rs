//! AutoGLM UI
//!
//! Web and terminal front-ends for the AutoGLM developer API. Tasks are
//! forwarded over a reconnecting, authenticated WebSocket and the streamed
//! responses are kept in a bounded history for the HTTP API and the
//! interactive chat.

pub mod chat;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod version;
