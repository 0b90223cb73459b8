//! AutoGLM client handle and its background connection loop

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use url::Url;

use super::connector::{Connector, WsConnector, WsSink, WsStream};
use super::policy::{ReconnectConfig, ReconnectPolicy, RetryDecision};
use super::responses::{ResponseLog, ResponseRecord};
use super::state::{
    ClientEvent, ClientState, ClientStatus, ConnectionState, FailureReason, TaskReceipt,
};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::protocol::{FrameKind, InboundFrame, TaskEnvelope};

/// Upper bound on sending the close frame during shutdown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for the AutoGLM client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint
    pub url: Url,

    /// Bearer token sent on every handshake
    pub token: String,

    /// Bound on each handshake and on waiting in `connect`
    pub handshake_timeout: Duration,

    /// Backoff and retry ceiling
    pub reconnect: ReconnectConfig,

    /// Keepalive ping interval (None disables pings)
    pub ping_interval: Option<Duration>,

    /// Responses retained in memory
    pub max_responses: usize,

    /// Outbound command queue size
    pub command_queue_size: usize,

    /// Event broadcast buffer per subscriber
    pub event_capacity: usize,
}

impl ClientConfig {
    pub fn new(url: Url, token: impl Into<String>) -> Self {
        Self {
            url,
            token: token.into(),
            handshake_timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
            ping_interval: Some(Duration::from_secs(30)),
            max_responses: 100,
            command_queue_size: 32,
            event_capacity: 256,
        }
    }

    /// Build from the application config; requires a token
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        let token = config.require_token()?;
        let url = Url::parse(config.api.url.trim()).map_err(|e| {
            Error::config_field_invalid("api.url", format!("invalid AutoGLM API URL: {}", e))
        })?;

        let ws = &config.websocket;
        Ok(Self {
            handshake_timeout: Duration::from_secs(ws.timeout_secs.max(1)),
            reconnect: ReconnectConfig::from(ws),
            ping_interval: (ws.ping_interval_secs > 0)
                .then(|| Duration::from_secs(ws.ping_interval_secs)),
            max_responses: config.responses.max_retained,
            ..Self::new(url, token)
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Command Channel
// ─────────────────────────────────────────────────────────────────

/// Commands consumed by the connection task
#[derive(Debug)]
enum ClientCommand {
    /// Write a task envelope and report back
    Send {
        instruction: String,
        reply: oneshot::Sender<Result<TaskReceipt>>,
    },
}

fn reject(command: ClientCommand, state: ConnectionState) {
    match command {
        ClientCommand::Send { reply, .. } => {
            let _ = reply.send(Err(Error::NotConnected { state }));
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Shared State
// ─────────────────────────────────────────────────────────────────

struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    status: RwLock<ClientState>,
    responses: ResponseLog,
    events: broadcast::Sender<ClientEvent>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Move to `next` unless the current state forbids it
    fn transition(&self, next: ConnectionState) -> bool {
        let changed = self.state_tx.send_if_modified(|current| {
            if !current.can_move_to(next) {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(state = %next, "Connection state changed");
            let _ = self.events.send(ClientEvent::StateChanged(next));
        }
        changed
    }

    fn mark_connected(&self) {
        {
            let mut s = self.status.write();
            s.reconnect_attempts = 0;
            s.connected_at = Some(Utc::now());
        }
        self.transition(ConnectionState::Connected);
    }

    fn mark_disconnected(&self, err: &Error) {
        {
            let mut s = self.status.write();
            s.last_error = Some(err.to_string());
            s.connected_at = None;
        }
        self.transition(ConnectionState::Disconnected);
    }

    fn fail(&self, reason: FailureReason) {
        {
            let mut s = self.status.write();
            s.last_error = Some(reason.to_string());
            s.connected_at = None;
            s.failure = Some(reason.clone());
        }
        if self.transition(ConnectionState::Failed) {
            let _ = self.events.send(ClientEvent::Failed(reason));
        }
    }

    fn touch_heartbeat(&self) {
        self.status.write().last_heartbeat = Some(Utc::now());
    }

    fn conversation_id(&self) -> String {
        self.status.read().conversation_id.clone()
    }

    /// Classify, store and publish one inbound frame
    fn handle_frame(&self, frame: InboundFrame) {
        self.touch_heartbeat();

        match frame.kind() {
            FrameKind::Heartbeat => {
                debug!("Received heartbeat");
                return;
            }
            FrameKind::Init => info!("Received server initialization"),
            FrameKind::Session => {
                if let Some(id) = frame.conversation_id().map(str::to_string) {
                    info!(conversation_id = %id, "Conversation updated");
                    self.status.write().conversation_id = id;
                }
            }
            FrameKind::AgentResponse | FrameKind::Completion => {
                info!(msg_type = %frame.msg_type, "Received agent message");
            }
            FrameKind::ServerError => {
                error!(body = %frame.body, "AutoGLM reported an error");
            }
            FrameKind::Other => debug!(msg_type = %frame.msg_type, "Received message"),
        }

        let events = &self.events;
        let record = self.responses.append_with(frame, |record| {
            let _ = events.send(ClientEvent::Response(record.clone()));
        });
        debug!(id = record.id, msg_type = %record.msg_type, "Stored response");
    }
}

// ─────────────────────────────────────────────────────────────────
// AutoGLM Client
// ─────────────────────────────────────────────────────────────────

/// Reconnecting WebSocket client for the AutoGLM API
pub struct AutoGlmClient {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    command_tx: mpsc::Sender<ClientCommand>,
    /// Receiver waiting for the first `connect`
    pending: Mutex<Option<mpsc::Receiver<ClientCommand>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AutoGlmClient {
    /// Create a client using the real WebSocket connector
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, WsConnector)
    }

    /// Create a client with a custom connector
    pub fn with_connector(config: ClientConfig, connector: impl Connector) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_queue_size.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let shared = Arc::new(Shared {
            state_tx,
            shutdown_tx,
            status: RwLock::new(ClientState::default()),
            responses: ResponseLog::new(config.max_responses),
            events,
        });

        Self {
            config,
            connector: Arc::new(connector),
            shared,
            command_tx,
            pending: Mutex::new(Some(command_rx)),
            task: Mutex::new(None),
        }
    }

    /// Start the connection loop (first call only) and wait until the
    /// client is connected, has failed, or the handshake timeout elapses.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_started();

        let mut state_rx = self.shared.state_tx.subscribe();
        let state = match tokio::time::timeout(
            self.config.handshake_timeout,
            state_rx.wait_for(|s| *s == ConnectionState::Connected || s.is_terminal()),
        )
        .await
        {
            Err(_) => {
                return Err(Error::Timeout {
                    url: self.config.url.to_string(),
                    timeout_secs: self.config.handshake_timeout.as_secs(),
                })
            }
            Ok(Err(_)) => ConnectionState::ShutDown,
            Ok(Ok(state)) => *state,
        };

        match state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Failed => Err(self
                .failure()
                .map(|reason| reason.to_error())
                .unwrap_or_else(|| Error::Internal("client failed without a reason".to_string()))),
            other => Err(Error::NotConnected { state: other }),
        }
    }

    fn ensure_started(&self) {
        let Some(command_rx) = self.pending.lock().take() else {
            return;
        };

        let ctx = LoopContext {
            config: self.config.clone(),
            connector: self.connector.clone(),
            shared: self.shared.clone(),
            command_rx,
            shutdown_rx: self.shared.shutdown_tx.subscribe(),
        };
        *self.task.lock() = Some(tokio::spawn(run_connection_loop(ctx)));
    }

    /// Send a task; fails fast with `NotConnected` outside `Connected`
    pub async fn send(&self, instruction: &str) -> Result<TaskReceipt> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(Error::NotConnected { state });
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(ClientCommand::Send {
                instruction: instruction.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected { state: self.state() })?;

        reply_rx
            .await
            .map_err(|_| Error::NotConnected { state: self.state() })?
    }

    /// Stop the client from any state and wait for the connection task
    pub async fn shutdown(&self) {
        self.signal_shutdown();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Connection task ended abnormally");
            }
        }
    }

    fn signal_shutdown(&self) {
        self.pending.lock().take();
        if self.shared.transition(ConnectionState::ShutDown) {
            info!("AutoGLM client shut down");
        }
        self.shared.shutdown_tx.send_replace(true);
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reason for entering `Failed`, if it happened
    pub fn failure(&self) -> Option<FailureReason> {
        self.shared.status.read().failure.clone()
    }

    /// Watch the connection state
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to state changes, responses and the terminal failure
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Newest `limit` responses, oldest first
    pub fn recent_responses(&self, limit: usize) -> Vec<ResponseRecord> {
        self.shared.responses.recent(limit)
    }

    /// Snapshot of the client for status displays
    pub fn status(&self) -> ClientStatus {
        let state = self.state();
        let s = self.shared.status.read();
        ClientStatus {
            state,
            connected: state == ConnectionState::Connected,
            reconnect_attempts: s.reconnect_attempts,
            conversation_id: (!s.conversation_id.is_empty()).then(|| s.conversation_id.clone()),
            last_heartbeat: s.last_heartbeat,
            last_error: s.last_error.clone(),
            connected_at: s.connected_at,
            stored_responses: self.shared.responses.len(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.config.url
    }
}

impl Drop for AutoGlmClient {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection Loop
// ─────────────────────────────────────────────────────────────────

struct LoopContext {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    command_rx: mpsc::Receiver<ClientCommand>,
    shutdown_rx: watch::Receiver<bool>,
}

/// How an established connection ended
enum ConnectionEnd {
    Shutdown,
    Lost(Error),
}

async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    // A dropped sender counts as shutdown too
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Main client loop with reconnection logic
async fn run_connection_loop(ctx: LoopContext) {
    let LoopContext {
        config,
        connector,
        shared,
        mut command_rx,
        mut shutdown_rx,
    } = ctx;

    let mut policy = ReconnectPolicy::new(config.reconnect.clone());

    'outer: loop {
        if *shutdown_rx.borrow() {
            break;
        }

        shared.transition(ConnectionState::Connecting);
        info!(url = %config.url, attempt = policy.failures() + 1, "Connecting to AutoGLM");

        let handshake = tokio::time::timeout(
            config.handshake_timeout,
            connector.connect(&config.url, &config.token),
        );
        tokio::pin!(handshake);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown_rx) => break None,
                res = &mut handshake => break Some(res),
                Some(cmd) = command_rx.recv() => reject(cmd, ConnectionState::Connecting),
            }
        };
        let Some(outcome) = outcome else {
            break;
        };

        let result = outcome.unwrap_or_else(|_| {
            Err(Error::Timeout {
                url: config.url.to_string(),
                timeout_secs: config.handshake_timeout.as_secs(),
            })
        });

        let delay = match result {
            Ok((sink, stream)) => {
                info!(url = %config.url, "Connected to AutoGLM");
                policy.record_success();
                shared.mark_connected();

                let end = drive_connection(
                    &config,
                    &shared,
                    &mut command_rx,
                    &mut shutdown_rx,
                    sink,
                    stream,
                )
                .await;
                match end {
                    ConnectionEnd::Shutdown => break,
                    ConnectionEnd::Lost(e) => {
                        warn!(error = %e, "Connection lost");
                        shared.mark_disconnected(&e);
                        policy.next_delay()
                    }
                }
            }
            Err(e) if !e.is_retryable() => {
                error!(error = %e, "Handshake rejected, not retrying");
                shared.fail(FailureReason::from_error(&e));
                break;
            }
            Err(e) => {
                warn!(error = %e, "Handshake failed");
                shared.mark_disconnected(&e);
                match policy.record_failure() {
                    RetryDecision::GiveUp { attempts } => {
                        error!(attempts, "Max reconnection attempts reached");
                        shared.status.write().reconnect_attempts = attempts;
                        shared.fail(FailureReason::RetriesExhausted { attempts });
                        break;
                    }
                    RetryDecision::Retry { attempt, delay } => {
                        shared.status.write().reconnect_attempts = attempt;
                        delay
                    }
                }
            }
        };

        info!(
            delay_ms = delay.as_millis() as u64,
            attempt = policy.failures(),
            "Waiting before reconnection"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown_rx) => break 'outer,
                _ = &mut sleep => break,
                Some(cmd) = command_rx.recv() => reject(cmd, ConnectionState::Disconnected),
            }
        }
    }

    info!("Connection loop terminated");
}

async fn next_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Handle an active WebSocket connection
async fn drive_connection(
    config: &ClientConfig,
    shared: &Shared,
    command_rx: &mut mpsc::Receiver<ClientCommand>,
    shutdown_rx: &mut watch::Receiver<bool>,
    mut write: WsSink,
    mut read: WsStream,
) -> ConnectionEnd {
    let mut ping = config.ping_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            biased;

            _ = shutdown_signalled(shutdown_rx) => {
                debug!("Closing WebSocket");
                let close = write.send(WsMessage::Close(None));
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, close).await;
                return ConnectionEnd::Shutdown;
            }

            // Incoming frame from AutoGLM
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => match InboundFrame::from_json(&text) {
                        Ok(frame) => shared.handle_frame(frame),
                        Err(e) => warn!(error = %e, "Dropping malformed frame"),
                    },
                    Some(Ok(WsMessage::Binary(data))) => {
                        match InboundFrame::from_json_bytes(&data) {
                            Ok(frame) => shared.handle_frame(frame),
                            Err(e) => warn!(error = %e, "Dropping malformed binary frame"),
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = write.send(WsMessage::Pong(data)).await {
                            return ConnectionEnd::Lost(e.into());
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => shared.touch_heartbeat(),
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(frame = ?frame, "Received close frame");
                        return ConnectionEnd::Lost(Error::ConnectionLost {
                            message: "closed by server".to_string(),
                        });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return ConnectionEnd::Lost(Error::ConnectionLost {
                            message: e.to_string(),
                        });
                    }
                    None => {
                        return ConnectionEnd::Lost(Error::ConnectionLost {
                            message: "stream ended".to_string(),
                        });
                    }
                }
            }

            // Keepalive
            _ = next_ping(&mut ping) => {
                if let Err(e) = write.send(WsMessage::Ping(Vec::new())).await {
                    return ConnectionEnd::Lost(e.into());
                }
                debug!("Sent keepalive ping");
            }

            // Command from callers
            cmd = command_rx.recv() => {
                let Some(ClientCommand::Send { instruction, reply }) = cmd else {
                    // Every handle is gone
                    return ConnectionEnd::Shutdown;
                };

                let envelope = TaskEnvelope::new(instruction, shared.conversation_id());
                let json = match envelope.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        continue;
                    }
                };

                if let Err(e) = write.send(WsMessage::Text(json)).await {
                    let message = e.to_string();
                    let _ = reply.send(Err(Error::ConnectionLost { message: message.clone() }));
                    return ConnectionEnd::Lost(Error::ConnectionLost { message });
                }

                info!(msg_id = %envelope.msg_id, "Task sent");
                let _ = reply.send(Ok(TaskReceipt {
                    msg_id: envelope.msg_id,
                    conversation_id: envelope.conversation_id,
                    sent_at: Utc::now(),
                }));
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{refused, session, Outcome, ScriptedConnector};

    fn test_config(max_attempts: u32) -> ClientConfig {
        ClientConfig {
            reconnect: ReconnectConfig {
                max_attempts,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(8),
                jitter: 0.0,
            },
            ping_interval: None,
            ..ClientConfig::new(Url::parse("ws://mock.local/ws").unwrap(), "test-token")
        }
    }

    async fn next_state_change(events: &mut broadcast::Receiver<ClientEvent>) -> ConnectionState {
        loop {
            if let ClientEvent::StateChanged(state) = events.recv().await.unwrap() {
                return state;
            }
        }
    }

    async fn wait_for_state(
        events: &mut broadcast::Receiver<ClientEvent>,
        target: ConnectionState,
    ) {
        while next_state_change(events).await != target {}
    }

    async fn next_response(events: &mut broadcast::Receiver<ClientEvent>) -> ResponseRecord {
        loop {
            if let ClientEvent::Response(record) = events.recv().await.unwrap() {
                return record;
            }
        }
    }

    fn drain_failures(events: &mut broadcast::Receiver<ClientEvent>) -> Vec<FailureReason> {
        let mut failures = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ClientEvent::Failed(reason) = event {
                failures.push(reason);
            }
        }
        failures
    }

    #[test]
    fn test_config_from_app() {
        let mut app = AppConfig::default();
        assert!(ClientConfig::from_app(&app).is_err());

        app.api.token = Some("abc".to_string());
        app.websocket.ping_interval_secs = 0;
        let config = ClientConfig::from_app(&app).unwrap();
        assert_eq!(config.token, "abc");
        assert_eq!(config.handshake_timeout, Duration::from_secs(30));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert!(config.ping_interval.is_none());
        assert_eq!(config.url.scheme(), "wss");
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_failed_handshakes() {
        let (unused, _server) = session();
        let connector = ScriptedConnector::new([refused(), refused(), refused(), unused]);
        let client = AutoGlmClient::with_connector(test_config(3), connector.clone());
        let mut events = client.subscribe();

        let started = Instant::now();
        let err = client.connect().await.unwrap_err();

        assert!(matches!(err, Error::RetriesExhausted { attempts: 3 }));
        assert_eq!(client.state(), ConnectionState::Failed);
        assert_eq!(connector.handshakes(), 3);
        assert_eq!(connector.remaining(), 1);

        // Backoff waited 1s then 2s
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.handshakes(), 3);
        assert_eq!(client.status().reconnect_attempts, 3);

        let failures = drain_failures(&mut events);
        assert_eq!(failures, vec![FailureReason::RetriesExhausted { attempts: 3 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_end_connected() {
        let (accept, _server) = session();
        let connector = ScriptedConnector::new([refused(), refused(), accept]);
        let client = AutoGlmClient::with_connector(test_config(5), connector.clone());

        client.connect().await.unwrap();

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(connector.handshakes(), 3);
        assert_eq!(client.status().reconnect_attempts, 0);
        assert!(client.status().last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_rejection_is_not_retried() {
        let (unused, _server) = session();
        let connector = ScriptedConnector::new([Outcome::Fail(Error::auth("HTTP 401")), unused]);
        let client = AutoGlmClient::with_connector(test_config(5), connector.clone());
        let mut events = client.subscribe();

        let err = client.connect().await.unwrap_err();

        assert!(matches!(err, Error::AuthenticationFailed { .. }));
        assert_eq!(client.state(), ConnectionState::Failed);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.handshakes(), 1);
        assert!(matches!(
            drain_failures(&mut events).as_slice(),
            [FailureReason::Authentication { .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_connection() {
        let (accept, _server) = session();
        let connector = ScriptedConnector::new([refused(), accept]);
        let client = AutoGlmClient::with_connector(test_config(5), connector);

        let err = client.send("too early").await.unwrap_err();
        assert!(matches!(
            err,
            Error::NotConnected { state: ConnectionState::Disconnected }
        ));

        // During reconnect backoff
        let mut events = client.subscribe();
        client.ensure_started();
        wait_for_state(&mut events, ConnectionState::Disconnected).await;
        let err = client.send("during backoff").await.unwrap_err();
        assert!(matches!(err, Error::NotConnected { .. }));

        client.connect().await.unwrap();
        assert!(client.send("now").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_writes_task_envelope() {
        let (accept, mut server) = session();
        let connector = ScriptedConnector::new([accept]);
        let client = AutoGlmClient::with_connector(test_config(3), connector);
        let mut events = client.subscribe();
        client.connect().await.unwrap();

        let receipt = client.send("open the camera").await.unwrap();
        let WsMessage::Text(text) = server.from_client.recv().await.unwrap() else {
            panic!("expected a text frame");
        };
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["data"]["instruction"], "open the camera");
        assert_eq!(json["msg_id"], receipt.msg_id.to_string());
        assert_eq!(json["conversation_id"], "");

        // A session frame sets the conversation for later tasks
        server.push_text(r#"{"msg_type": "server_session", "conversation_id": "conv-9"}"#);
        next_response(&mut events).await;

        let receipt = client.send("next").await.unwrap();
        assert_eq!(receipt.conversation_id, "conv-9");
        assert_eq!(client.status().conversation_id.as_deref(), Some("conv-9"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_responses_keep_receipt_order() {
        let (accept, server) = session();
        let connector = ScriptedConnector::new([accept]);
        let client = AutoGlmClient::with_connector(test_config(3), connector);
        client.connect().await.unwrap();
        let mut events = client.subscribe();

        for n in 0..20 {
            server.push_text(&format!(r#"{{"msg_type": "agent_response", "n": {}}}"#, n));
            if n == 10 {
                server.push_text(r#"{"msg_type": "server_heartbeat"}"#);
            }
        }

        let mut seen = Vec::new();
        for _ in 0..20 {
            seen.push(next_response(&mut events).await);
        }

        let ns: Vec<u64> = seen.iter().map(|r| r.data["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, (0..20).collect::<Vec<_>>());
        assert!(seen.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(client.recent_responses(100), seen);
        assert!(client.status().last_heartbeat.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_is_dropped() {
        let (accept, server) = session();
        let connector = ScriptedConnector::new([accept]);
        let client = AutoGlmClient::with_connector(test_config(3), connector);
        client.connect().await.unwrap();
        let mut events = client.subscribe();

        server.push_text("this is not json");
        server.push_text(r#"["not", "an", "object"]"#);
        server.push_text(r#"{"msg_type": "task_result", "ok": true}"#);

        let record = next_response(&mut events).await;
        assert_eq!(record.msg_type, "task_result");
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.recent_responses(10).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_server_close() {
        let (first, first_server) = session();
        let (second, _second_server) = session();
        let connector = ScriptedConnector::new([first, second]);
        let client = AutoGlmClient::with_connector(test_config(3), connector.clone());
        client.connect().await.unwrap();
        let mut events = client.subscribe();

        first_server.close();

        wait_for_state(&mut events, ConnectionState::Disconnected).await;
        wait_for_state(&mut events, ConnectionState::Connected).await;
        assert_eq!(connector.handshakes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff() {
        let (unused, _server) = session();
        let connector = ScriptedConnector::new([refused(), unused]);
        let client = AutoGlmClient::with_connector(test_config(5), connector.clone());
        let mut events = client.subscribe();

        client.ensure_started();
        wait_for_state(&mut events, ConnectionState::Disconnected).await;

        client.shutdown().await;
        assert_eq!(client.state(), ConnectionState::ShutDown);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.handshakes(), 1);

        assert!(matches!(
            client.send("late").await,
            Err(Error::NotConnected { state: ConnectionState::ShutDown })
        ));
        assert!(matches!(
            client.connect().await,
            Err(Error::NotConnected { state: ConnectionState::ShutDown })
        ));

        // Idempotent
        client.shutdown().await;
        assert_eq!(client.state(), ConnectionState::ShutDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_and_loop_keeps_retrying() {
        let connector = ScriptedConnector::new([Outcome::Hang, Outcome::Hang, Outcome::Hang]);
        let config = ClientConfig {
            handshake_timeout: Duration::from_secs(5),
            ..test_config(3)
        };
        let client = AutoGlmClient::with_connector(config, connector.clone());
        let mut events = client.subscribe();

        let err = client.connect().await.unwrap_err();
        assert!(
            matches!(err, Error::Timeout { timeout_secs: 5, .. }),
            "got {:?}",
            err
        );
        assert!(!client.state().is_terminal());

        // Second handshake starts after the 1s backoff
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(connector.handshakes(), 2);
        assert!(client.failure().is_none());

        // Timed-out handshakes count towards the retry ceiling
        wait_for_state(&mut events, ConnectionState::Failed).await;
        assert_eq!(connector.handshakes(), 3);
        assert_eq!(
            client.failure(),
            Some(FailureReason::RetriesExhausted { attempts: 3 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_handshake() {
        let (unused, _server) = session();
        let connector = ScriptedConnector::new([Outcome::Hang, unused]);
        let client = AutoGlmClient::with_connector(test_config(5), connector.clone());
        let mut events = client.subscribe();

        client.ensure_started();
        wait_for_state(&mut events, ConnectionState::Connecting).await;

        let started = Instant::now();
        client.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(client.state(), ConnectionState::ShutDown);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.handshakes(), 1);
        assert_eq!(connector.remaining(), 1);
        assert_eq!(client.state(), ConnectionState::ShutDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_socket() {
        let (accept, mut server) = session();
        let connector = ScriptedConnector::new([accept]);
        let client = AutoGlmClient::with_connector(test_config(3), connector);
        client.connect().await.unwrap();

        client.shutdown().await;

        assert!(matches!(server.from_client.recv().await, Some(WsMessage::Close(None))));
        assert_eq!(client.state(), ConnectionState::ShutDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_after_failure() {
        let connector = ScriptedConnector::new([refused()]);
        let client = AutoGlmClient::with_connector(test_config(1), connector);
        assert!(client.connect().await.is_err());
        assert_eq!(client.state(), ConnectionState::Failed);

        client.shutdown().await;
        assert_eq!(client.state(), ConnectionState::ShutDown);
        assert!(client.failure().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_ping() {
        let (accept, mut server) = session();
        let config = ClientConfig {
            ping_interval: Some(Duration::from_secs(30)),
            ..test_config(3)
        };
        let client = AutoGlmClient::with_connector(config, ScriptedConnector::new([accept]));
        client.connect().await.unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(matches!(server.from_client.recv().await, Some(WsMessage::Ping(_))));

        server.to_client.send(Ok(WsMessage::Ping(vec![1, 2]))).unwrap();
        let reply = server.from_client.recv().await;
        assert!(matches!(reply, Some(WsMessage::Pong(data)) if data == vec![1, 2]));
    }
}
