//! `POST /api/send-task-stream`: newline-delimited JSON response stream
//!
//! Lines, in order: one `sent`, one `response` per received frame, then a
//! final `complete` (on a completion frame) or `error` (on terminal failure
//! or shutdown).

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::handlers::{ApiError, TaskRequest};
use super::AppState;
use crate::client::{ClientEvent, ConnectionState};

const NDJSON: &str = "application/x-ndjson";

fn line(value: Value) -> String {
    format!("{}\n", value)
}

/// POST /api/send-task-stream - Submit a task and stream responses
pub async fn send_task_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TaskRequest>,
) -> Result<Response, ApiError> {
    let task = request.validate()?;

    if !state.client.is_connected() {
        warn!("Streaming task rejected: not connected");
        return Err(ApiError::not_connected());
    }

    // Subscribe before sending so no response can slip past
    let mut events = state.client.subscribe();
    let receipt = state.client.send(task).await?;
    let task_id = receipt.msg_id.to_string();
    info!(msg_id = %task_id, "Streaming task submitted");

    let body = async_stream::stream! {
        yield Ok::<_, Infallible>(line(json!({
            "type": "sent",
            "message": "Task sent successfully",
            "task_id": task_id,
        })));

        let mut response_count = 0usize;
        loop {
            match events.recv().await {
                Ok(ClientEvent::Response(record)) => {
                    response_count += 1;
                    let done = record.is_completion();
                    yield Ok(line(json!({ "type": "response", "data": record })));

                    if done {
                        yield Ok(line(json!({
                            "type": "complete",
                            "message": "Task processing completed",
                            "response_count": response_count,
                        })));
                        break;
                    }
                }
                Ok(ClientEvent::Failed(reason)) => {
                    yield Ok(line(json!({ "type": "error", "message": reason.to_string() })));
                    break;
                }
                Ok(ClientEvent::StateChanged(ConnectionState::ShutDown)) => {
                    yield Ok(line(json!({ "type": "error", "message": "Client shut down" })));
                    break;
                }
                Ok(ClientEvent::StateChanged(state)) => {
                    debug!(state = %state, "Connection state changed during stream");
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Response stream lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }

        debug!(msg_id = %task_id, response_count, "Response stream finished");
    };

    Ok(([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(body)).into_response())
}
