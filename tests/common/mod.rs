//! Common test utilities and fixtures
//!
//! An in-process WebSocket endpoint that checks the bearer token the same
//! way the AutoGLM API does.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use url::Url;

use autoglm_ui::client::{ClientConfig, ReconnectConfig};

pub type ServerSocket = WebSocketStream<TcpStream>;

/// Local endpoint accepting only `Bearer <token>`
pub struct TestServer {
    addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<ServerSocket>,
    rejected: Arc<AtomicU32>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(token: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted_tx, accepted) = mpsc::unbounded_channel();
        let rejected = Arc::new(AtomicU32::new(0));

        let expected = format!("Bearer {}", token);
        let rejections = rejected.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let expected = expected.clone();
                let callback = move |req: &Request, resp: Response| {
                    let authorized = req
                        .headers()
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        == Some(expected.as_str());
                    if authorized {
                        Ok(resp)
                    } else {
                        let mut denied = ErrorResponse::new(Some("invalid token".to_string()));
                        *denied.status_mut() = StatusCode::UNAUTHORIZED;
                        Err(denied)
                    }
                };

                match tokio_tungstenite::accept_hdr_async(stream, callback).await {
                    Ok(ws) => {
                        let _ = accepted_tx.send(ws);
                    }
                    Err(_) => {
                        rejections.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

        Self {
            addr,
            accepted,
            rejected,
            task,
        }
    }

    pub fn ws_url(&self) -> Url {
        Url::parse(&format!("ws://{}/ws", self.addr)).unwrap()
    }

    /// Wait for the next authenticated connection
    pub async fn accept(&mut self) -> ServerSocket {
        tokio::time::timeout(Duration::from_secs(5), self.accepted.recv())
            .await
            .expect("no connection within 5s")
            .expect("server stopped")
    }

    pub fn rejected(&self) -> u32 {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Client settings with short delays and no keepalive pings
pub fn fast_client_config(url: Url, token: &str, max_attempts: u32) -> ClientConfig {
    ClientConfig {
        handshake_timeout: Duration::from_secs(5),
        reconnect: ReconnectConfig {
            max_attempts,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(80),
            jitter: 0.0,
        },
        ping_interval: None,
        ..ClientConfig::new(url, token)
    }
}

/// Next text frame sent by the client, skipping control frames
pub async fn next_text(ws: &mut ServerSocket) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no frame within 5s")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return text;
        }
    }
}

pub async fn push(ws: &mut ServerSocket, json: &str) {
    ws.send(Message::Text(json.to_string())).await.unwrap();
}
