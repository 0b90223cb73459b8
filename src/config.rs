//! Configuration system for AutoGLM UI
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (AUTOGLM_* prefix, `.env` is loaded by the binary)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Default AutoGLM developer endpoint
pub const DEFAULT_API_URL: &str = "wss://autoglm-api.zhipuai.cn/openapi/v1/autoglm/developer";

/// Placeholder written in place of the token by [`AppConfig::redacted`]
const REDACTED: &str = "********";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Local HTTP server settings
    pub server: ServerSettings,

    /// Remote AutoGLM API settings
    pub api: ApiSettings,

    /// WebSocket connection and reconnect policy
    pub websocket: WebSocketSettings,

    /// In-memory response retention
    pub responses: ResponseSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Debug mode (raises default log level to debug)
    pub debug: bool,
}

/// Remote AutoGLM API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// WebSocket endpoint of the AutoGLM API
    pub url: String,

    /// Bearer token sent on the handshake
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// WebSocket connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketSettings {
    /// Handshake timeout in seconds (also bounds how long `connect` waits)
    pub timeout_secs: u64,

    /// Consecutive failed handshakes tolerated before giving up
    pub max_reconnect_attempts: u32,

    /// First reconnect delay in milliseconds
    pub reconnect_base_delay_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds
    pub reconnect_max_delay_ms: u64,

    /// Random jitter factor applied to each delay, in [0, 1)
    pub reconnect_jitter: f64,

    /// Keepalive ping interval in seconds (0 disables pings)
    pub ping_interval_secs: u64,
}

/// Response retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseSettings {
    /// Maximum number of responses kept in memory
    pub max_retained: usize,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            debug: false,
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_API_URL.to_string(),
            token: None,
        }
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
            reconnect_jitter: 0.2,
            ping_interval_secs: 30,
        }
    }
}

impl Default for ResponseSettings {
    fn default() -> Self {
        Self { max_retained: 100 }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_files: 5,
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = match Self::find_config_file(config_path)? {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides()?;
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading configuration file");
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        info!(path = %path.display(), "Configuration loaded from file");
        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        let search_paths = [
            PathBuf::from("autoglm-ui.toml"),
            dirs::config_dir()
                .map(|p| p.join("autoglm-ui").join("config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".autoglm-ui").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `AUTOGLM_*` overrides read through `lookup`
    ///
    /// A numeric variable that does not parse is a configuration error.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server settings
        if let Some(val) = lookup("AUTOGLM_HOST") {
            self.server.host = val;
        }
        override_parsed(&lookup, "AUTOGLM_PORT", &mut self.server.port)?;
        if let Some(val) = lookup("AUTOGLM_DEBUG") {
            self.server.debug = parse_bool(&val);
        }

        // API settings
        if let Some(val) = lookup("AUTOGLM_AUTOGLM_API_URL") {
            self.api.url = val;
        }
        if let Some(val) = lookup("AUTOGLM_AUTOGLM_API_TOKEN") {
            if !val.trim().is_empty() {
                self.api.token = Some(val);
            }
        }

        // WebSocket settings
        override_parsed(&lookup, "AUTOGLM_WEBSOCKET_TIMEOUT", &mut self.websocket.timeout_secs)?;
        override_parsed(
            &lookup,
            "AUTOGLM_MAX_RECONNECT_ATTEMPTS",
            &mut self.websocket.max_reconnect_attempts,
        )?;
        override_parsed(
            &lookup,
            "AUTOGLM_RECONNECT_BASE_DELAY_MS",
            &mut self.websocket.reconnect_base_delay_ms,
        )?;
        override_parsed(
            &lookup,
            "AUTOGLM_RECONNECT_MAX_DELAY_MS",
            &mut self.websocket.reconnect_max_delay_ms,
        )?;
        override_parsed(&lookup, "AUTOGLM_RECONNECT_JITTER", &mut self.websocket.reconnect_jitter)?;
        override_parsed(&lookup, "AUTOGLM_PING_INTERVAL", &mut self.websocket.ping_interval_secs)?;

        // Response settings
        override_parsed(&lookup, "AUTOGLM_MAX_RESPONSES", &mut self.responses.max_retained)?;

        // Logging settings
        if let Some(val) = lookup("AUTOGLM_LOG_LEVEL") {
            self.logging.level = val.to_lowercase();
        }
        if let Some(val) = lookup("AUTOGLM_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Some(val) = lookup("AUTOGLM_LOG_JSON") {
            self.logging.json_format = parse_bool(&val);
        }

        Ok(())
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::config_field_invalid("server.port", "port must be non-zero"));
        }

        let url = self.api.url.trim();
        if url.is_empty() {
            return Err(Error::config_field_invalid("api.url", "AutoGLM API URL cannot be empty"));
        }
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(Error::config_field_invalid(
                "api.url",
                "AutoGLM API URL must start with ws:// or wss://",
            ));
        }

        let ws = &self.websocket;
        if ws.timeout_secs == 0 {
            return Err(Error::config_field_invalid(
                "websocket.timeout_secs",
                "timeout must be at least 1 second",
            ));
        }
        if ws.max_reconnect_attempts == 0 {
            return Err(Error::config_field_invalid(
                "websocket.max_reconnect_attempts",
                "max_reconnect_attempts must be at least 1",
            ));
        }
        if ws.reconnect_base_delay_ms == 0
            || ws.reconnect_base_delay_ms > ws.reconnect_max_delay_ms
        {
            return Err(Error::config_field_invalid(
                "websocket.reconnect_base_delay_ms",
                "reconnect_base_delay_ms must be between 1 and reconnect_max_delay_ms",
            ));
        }
        if !(0.0..1.0).contains(&ws.reconnect_jitter) {
            return Err(Error::config_field_invalid(
                "websocket.reconnect_jitter",
                "reconnect_jitter must be in [0, 1)",
            ));
        }

        if self.responses.max_retained == 0 {
            return Err(Error::config_field_invalid(
                "responses.max_retained",
                "max_retained must be at least 1",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// The API token, or a validation error naming the missing field
    pub fn require_token(&self) -> Result<&str> {
        match self.api.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(Error::config_field_invalid(
                "api.token",
                "AutoGLM API token is not configured",
            )),
        }
    }

    /// Copy of the configuration safe for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.api.token.is_some() {
            copy.api.token = Some(REDACTED.to_string());
        }
        copy
    }

    /// Socket address string for the HTTP server
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(val) = lookup(key) {
        *target = val.trim().parse().map_err(|e: T::Err| {
            Error::config_field_invalid(key, format!("{} has invalid value '{}': {}", key, val, e))
        })?;
    }
    Ok(())
}

fn parse_bool(val: &str) -> bool {
    let val = val.trim().to_lowercase();
    val == "true" || val == "1" || val == "yes"
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file, returning the path written
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".autoglm-ui")
                .join("config.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    format!(
        r#"# AutoGLM UI Configuration

[server]
# Address and port of the local web UI
host = "127.0.0.1"
port = 8000

# Debug mode raises the default log level to debug
debug = false

[api]
# AutoGLM WebSocket endpoint
url = "{DEFAULT_API_URL}"

# Bearer token (prefer the AUTOGLM_AUTOGLM_API_TOKEN environment variable)
# token = "your-token"

[websocket]
# Handshake timeout in seconds
timeout_secs = 30

# Consecutive failed handshakes tolerated before giving up
max_reconnect_attempts = 5

# Exponential backoff: base delay, cap, and jitter factor in [0, 1)
reconnect_base_delay_ms = 1000
reconnect_max_delay_ms = 30000
reconnect_jitter = 0.2

# Keepalive ping interval in seconds (0 disables pings)
ping_interval_secs = 30

[responses]
# Number of responses kept in memory for /api/responses
max_retained = 100

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.autoglm-ui/logs/autoglm-ui.log"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    )
}
