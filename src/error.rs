//! Error types for AutoGLM UI
//!
//! Every failure carries a stable `E###` code grouped by [`ErrorCategory`].
//! The category decides the process exit code; the variant decides whether
//! the reconnect policy may try again.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::client::ConnectionState;

/// Result type alias for AutoGLM UI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad grouping of error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Io,
    Connection,
    Protocol,
    Internal,
}

impl ErrorCategory {
    /// Process exit code for the category
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorCategory::Config => 10,
            ErrorCategory::Io => 20,
            ErrorCategory::Connection => 30,
            ErrorCategory::Protocol => 40,
            ErrorCategory::Internal => 90,
        }
    }
}

/// Stable numeric codes, rendered as `E###`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    ConnectionFailed = 300,
    ConnectionTimeout = 301,
    ConnectionLost = 303,
    NotConnected = 305,
    RetriesExhausted = 306,

    ProtocolMalformed = 401,
    AuthenticationFailed = 403,

    InternalError = 900,
}

impl ErrorCode {
    /// `E` followed by the numeric code
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    pub fn category(&self) -> ErrorCategory {
        match *self as u16 / 100 {
            1 => ErrorCategory::Config,
            2 => ErrorCategory::Io,
            3 => ErrorCategory::Connection,
            4 => ErrorCategory::Protocol,
            _ => ErrorCategory::Internal,
        }
    }

    /// Exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Settings
    // ─────────────────────────────────────────────────────────────

    /// An explicitly requested config file does not exist
    #[error("Config file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// The config file is not valid TOML for [`crate::config::AppConfig`]
    #[error("Invalid TOML in {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A setting is out of range; `field` names it when known
    #[error("Invalid setting: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    #[error("Config error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // Files and encoding
    // ─────────────────────────────────────────────────────────────

    #[error("Cannot read {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Rendering the effective config for `config show`
    #[error("Cannot render config as TOML: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // AutoGLM connection
    // ─────────────────────────────────────────────────────────────

    /// Transport error on an open socket
    #[error("WebSocket transport error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The handshake did not complete
    #[error("Could not reach {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    /// An established connection dropped
    #[error("AutoGLM connection dropped: {message}")]
    ConnectionLost { message: String },

    /// No `Connected` state within the handshake timeout
    #[error("No connection to {url} within {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// A task was submitted outside `Connected`
    #[error("AutoGLM is not connected (state: {state})")]
    NotConnected { state: ConnectionState },

    /// The reconnect budget is spent; the client stays in `Failed`
    #[error("Gave up connecting after {attempts} failed attempts")]
    RetriesExhausted { attempts: u32 },

    // ─────────────────────────────────────────────────────────────
    // AutoGLM protocol
    // ─────────────────────────────────────────────────────────────

    /// Inbound frame that is not a JSON object
    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    /// The endpoint refused the bearer token
    #[error("AutoGLM rejected the token: {message}")]
    AuthenticationFailed { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        use std::io::ErrorKind;

        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } | Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } | Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) if e.kind() == ErrorKind::NotFound => ErrorCode::IoNotFound,
            Error::Io(e) if e.kind() == ErrorKind::PermissionDenied => ErrorCode::IoPermission,
            Error::Io(_) => ErrorCode::IoRead,

            Error::WebSocket(_) | Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ConnectionLost { .. } => ErrorCode::ConnectionLost,
            Error::Timeout { .. } => ErrorCode::ConnectionTimeout,
            Error::NotConnected { .. } => ErrorCode::NotConnected,
            Error::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,

            Error::Json(_) | Error::MalformedFrame { .. } => ErrorCode::ProtocolMalformed,
            Error::AuthenticationFailed { .. } => ErrorCode::AuthenticationFailed,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the reconnect policy may schedule another handshake
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. }
                | Error::ConnectionLost { .. }
                | Error::Timeout { .. }
                | Error::WebSocket(_)
                | Error::Io(_)
        )
    }

    /// Whether the process or client cannot continue
    pub fn is_fatal(&self) -> bool {
        match self.code().category() {
            ErrorCategory::Config | ErrorCategory::Internal => true,
            _ => matches!(
                self,
                Error::AuthenticationFailed { .. } | Error::RetriesExhausted { .. }
            ),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// What the user can do about it
    pub fn suggestion(&self) -> Option<&'static str> {
        let hint = match self {
            Error::ConfigNotFound { .. } => {
                "Run 'autoglm-ui config init' to create a default configuration file."
            }
            Error::ConfigParse { .. } => {
                "Fix the TOML syntax, then check it with 'autoglm-ui config validate'."
            }
            Error::ConfigValidation { field: Some(field), .. } if field == "api.token" => {
                "Set AUTOGLM_AUTOGLM_API_TOKEN, put `token` under [api], or pass --token."
            }
            Error::ConfigValidation { .. } => {
                "Correct the value in the configuration file or environment."
            }
            Error::ConnectionFailed { .. } | Error::WebSocket(_) => {
                "Check the network and the AutoGLM API URL (api.url)."
            }
            Error::Timeout { .. } => {
                "The endpoint is slow or unreachable. Raise websocket.timeout_secs."
            }
            Error::ConnectionLost { .. } => {
                "The client reconnects on its own; retry the task shortly."
            }
            Error::NotConnected { .. } => {
                "Wait until /api/status reports connected, then submit the task again."
            }
            Error::RetriesExhausted { .. } => {
                "Restart once the endpoint is back, or raise websocket.max_reconnect_attempts."
            }
            Error::AuthenticationFailed { .. } => {
                "The token may have expired or been revoked; request a new one."
            }
            _ => return None,
        };
        Some(hint)
    }

    /// Red `Error [E###]` line plus an optional yellow hint
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", self.code(), self);
        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }
        output
    }

    /// `[E###] message` without colors
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code(), self)
    }

    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound { path: path.into() }
    }

    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Validation error naming the offending setting
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedFrame {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Error::AuthenticationFailed {
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
