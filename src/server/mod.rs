//! HTTP surface: embedded web page and JSON API
//!
//! - `GET /` - Web UI
//! - `POST /api/send-task` - Submit a task
//! - `POST /api/send-task-stream` - Submit a task and stream responses as NDJSON
//! - `GET /api/status` - Connection status
//! - `GET /api/responses` - Recent responses
//! - `GET /health` - Health check

mod handlers;
mod stream;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::client::AutoGlmClient;
use crate::config::AppConfig;
use crate::error::{Error, Result};

pub use handlers::{ApiError, TaskRequest, MAX_RESPONSE_LIMIT, MAX_TASK_CHARS};

/// State shared by all handlers
pub struct AppState {
    /// The AutoGLM client
    pub client: Arc<AutoGlmClient>,
}

impl AppState {
    pub fn new(client: Arc<AutoGlmClient>) -> Self {
        Self { client }
    }
}

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health_check))
        .route("/api/send-task", post(handlers::send_task))
        .route("/api/send-task-stream", post(stream::send_task_stream))
        .route("/api/status", get(handlers::status))
        .route("/api/responses", get(handlers::recent_responses))
        .layer(cors)
        .with_state(state)
}

/// Serve the UI until Ctrl+C, keeping the client connected in the background
pub async fn serve(config: &AppConfig, client: Arc<AutoGlmClient>) -> Result<()> {
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Config(format!("Failed to bind {}: {}", addr, e)))?;
    let local_addr = listener.local_addr()?;

    let connecting = client.clone();
    tokio::spawn(async move {
        match connecting.connect().await {
            Ok(()) => info!(url = %connecting.url(), "AutoGLM connection ready"),
            Err(e) if e.is_fatal() => {
                warn!(error = %e, "AutoGLM connection failed; API will report degraded")
            }
            Err(e) => warn!(error = %e, "AutoGLM not connected yet; retrying in background"),
        }
    });

    let router = create_router(Arc::new(AppState::new(client.clone())));
    info!(addr = %local_addr, "Web UI available at http://{}", local_addr);

    let stopping = client.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            // Ends open response streams so the server can drain
            stopping.shutdown().await;
        })
        .await?;

    client.shutdown().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use url::Url;

    use super::{create_router, AppState};
    use crate::client::mock::{ScriptedConnector, ServerEnd};
    use crate::client::{mock, AutoGlmClient, ClientConfig, ReconnectConfig};

    pub fn client_config() -> ClientConfig {
        ClientConfig {
            reconnect: ReconnectConfig {
                max_attempts: 1,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(10),
                jitter: 0.0,
            },
            ping_interval: None,
            ..ClientConfig::new(Url::parse("ws://mock.local/ws").unwrap(), "test-token")
        }
    }

    /// Router over a client that never connected
    pub fn offline() -> (axum::Router, Arc<AutoGlmClient>) {
        let client = Arc::new(AutoGlmClient::with_connector(
            client_config(),
            ScriptedConnector::default(),
        ));
        (create_router(Arc::new(AppState::new(client.clone()))), client)
    }

    /// Router over a connected client and the scripted server behind it
    pub async fn online() -> (axum::Router, Arc<AutoGlmClient>, ServerEnd) {
        let (accept, server) = mock::session();
        let client = Arc::new(AutoGlmClient::with_connector(
            client_config(),
            ScriptedConnector::new([accept]),
        ));
        client.connect().await.unwrap();
        (create_router(Arc::new(AppState::new(client.clone()))), client, server)
    }
}
