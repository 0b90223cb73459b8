//! Route handlers

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::AppState;
use crate::error::{Error, ErrorCode};
use crate::version::BuildInfo;

/// Longest accepted task, in characters
pub const MAX_TASK_CHARS: usize = 10_000;

/// Largest `limit` accepted by `/api/responses`
pub const MAX_RESPONSE_LIMIT: usize = 100;

const INDEX_HTML: &str = include_str!("../../assets/index.html");

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: message.into(),
            code: "BAD_REQUEST".to_string(),
        }
    }

    pub fn invalid_task(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            error: message.into(),
            code: "INVALID_TASK".to_string(),
        }
    }

    pub fn not_connected() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error: "WebSocket client is not connected".to_string(),
            code: "NOT_CONNECTED".to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: message.into(),
            code: "INTERNAL_ERROR".to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err.code() {
            ErrorCode::NotConnected | ErrorCode::ConnectionLost => Self::not_connected(),
            _ => Self::internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Body of the task endpoints
#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    pub task: String,
}

impl TaskRequest {
    /// Check the task length bounds
    pub fn validate(&self) -> Result<&str, ApiError> {
        if self.task.is_empty() {
            return Err(ApiError::invalid_task("Task cannot be empty"));
        }
        if self.task.chars().count() > MAX_TASK_CHARS {
            return Err(ApiError::invalid_task(format!(
                "Task cannot exceed {} characters",
                MAX_TASK_CHARS
            )));
        }
        Ok(&self.task)
    }
}

/// Response of `POST /api/send-task`
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub success: bool,
    pub message: String,
    pub task_id: String,
}

/// GET / - Web UI
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /health - Health check
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connected = state.client.is_connected();
    Json(json!({
        "status": if connected { "healthy" } else { "degraded" },
        "websocket_connected": connected,
        "timestamp": Utc::now(),
        "version": BuildInfo::current().version,
    }))
}

/// POST /api/send-task - Submit a task
pub async fn send_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = request.validate()?;

    if !state.client.is_connected() {
        warn!("Task rejected: not connected");
        return Err(ApiError::not_connected());
    }

    let receipt = state.client.send(task).await?;
    info!(msg_id = %receipt.msg_id, chars = task.chars().count(), "Task submitted");

    Ok(Json(TaskResponse {
        success: true,
        message: "Task sent successfully".to_string(),
        task_id: receipt.msg_id.to_string(),
    }))
}

/// GET /api/status - Connection status
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.client.status();
    Json(json!({
        "connected": status.connected,
        "status": status.state,
        "recent_responses": status.stored_responses,
        "reconnect_attempts": status.reconnect_attempts,
        "conversation_id": status.conversation_id,
        "last_heartbeat": status.last_heartbeat,
        "last_error": status.last_error,
    }))
}

/// Query parameters for `/api/responses`
#[derive(Debug, Deserialize)]
pub struct ResponsesParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

/// GET /api/responses - Recent responses, oldest first
pub async fn recent_responses(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ResponsesParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.limit > MAX_RESPONSE_LIMIT {
        return Err(ApiError::bad_request(format!(
            "Limit cannot exceed {}",
            MAX_RESPONSE_LIMIT
        )));
    }

    Ok(Json(json!({
        "responses": state.client.recent_responses(params.limit),
    })))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::Value;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::util::ServiceExt;

    use super::*;
    use crate::server::test_support::{offline, online};

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_task(uri: &str, task: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "task": task }).to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_index_page() {
        let (app, _client) = offline();
        let response = app.oneshot(get("/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("AutoGLM"));
    }

    #[tokio::test]
    async fn test_health_degraded_when_offline() {
        let (app, _client) = offline();
        let response = app.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["websocket_connected"], false);
    }

    #[tokio::test]
    async fn test_health_when_connected() {
        let (app, _client, _server) = online().await;
        let json = body_json(app.oneshot(get("/health")).await.unwrap()).await;
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn test_send_task_requires_connection() {
        let (app, _client) = offline();
        let response = app.oneshot(post_task("/api/send-task", "hello")).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["code"], "NOT_CONNECTED");
    }

    #[tokio::test]
    async fn test_send_task_validation() {
        let (app, _client) = offline();

        let response = app.clone().oneshot(post_task("/api/send-task", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let long = "x".repeat(MAX_TASK_CHARS + 1);
        let response = app.clone().oneshot(post_task("/api/send-task", &long)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        // Only the length is checked; blank text reaches the connection check
        let response = app.oneshot(post_task("/api/send-task", "   ")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_task_length_bounds() {
        let request = |task: &str| TaskRequest {
            task: task.to_string(),
        };
        assert!(request("").validate().is_err());
        assert_eq!(request(" ").validate().unwrap(), " ");
        assert!(request(&"é".repeat(MAX_TASK_CHARS)).validate().is_ok());
        assert!(request(&"é".repeat(MAX_TASK_CHARS + 1)).validate().is_err());
    }

    #[tokio::test]
    async fn test_send_task_forwards_envelope() {
        let (app, _client, mut server) = online().await;
        let response = app
            .oneshot(post_task("/api/send-task", "open the calendar"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);

        let Some(WsMessage::Text(frame)) = server.from_client.recv().await else {
            panic!("expected the task frame");
        };
        let frame: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame["msg_id"], json["task_id"]);
        assert_eq!(frame["data"]["instruction"], "open the calendar");
    }

    #[tokio::test]
    async fn test_status_offline() {
        let (app, _client) = offline();
        let json = body_json(app.oneshot(get("/api/status")).await.unwrap()).await;

        assert_eq!(json["connected"], false);
        assert_eq!(json["status"], "disconnected");
        assert_eq!(json["recent_responses"], 0);
        assert_eq!(json["reconnect_attempts"], 0);
    }

    #[tokio::test]
    async fn test_responses_limit() {
        let (app, client, server) = online().await;
        let mut events = client.subscribe();
        for n in 0..15 {
            server.push_text(&format!(r#"{{"msg_type": "agent_response", "n": {}}}"#, n));
        }
        let mut received = 0;
        while received < 15 {
            if let crate::client::ClientEvent::Response(_) = events.recv().await.unwrap() {
                received += 1;
            }
        }

        let json = body_json(app.clone().oneshot(get("/api/responses")).await.unwrap()).await;
        let responses = json["responses"].as_array().unwrap();
        assert_eq!(responses.len(), 10);
        assert_eq!(responses[0]["data"]["n"], 5);
        assert_eq!(responses[9]["data"]["n"], 14);

        let response = app.clone().oneshot(get("/api/responses?limit=3")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["responses"].as_array().unwrap().len(), 3);

        let response = app.oneshot(get("/api/responses?limit=101")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Limit cannot exceed 100");
    }
}
