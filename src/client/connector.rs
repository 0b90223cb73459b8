//! Handshake seam between the connection loop and the network

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, Stream, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue, StatusCode},
        Error as WsError, Message as WsMessage,
    },
};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Outbound half of an open socket
pub type WsSink = Pin<Box<dyn Sink<WsMessage, Error = WsError> + Send>>;

/// Inbound half of an open socket
pub type WsStream = Pin<Box<dyn Stream<Item = std::result::Result<WsMessage, WsError>> + Send>>;

/// Opens authenticated WebSocket connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform one handshake. Rejected tokens must map to
    /// [`Error::AuthenticationFailed`] so they are not retried.
    async fn connect(&self, url: &Url, token: &str) -> Result<(WsSink, WsStream)>;
}

/// [`Connector`] backed by `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url, token: &str) -> Result<(WsSink, WsStream)> {
        let mut request = url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| Error::auth("token contains characters not allowed in a header"))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        match connect_async(request).await {
            Ok((ws_stream, response)) => {
                debug!(status = %response.status(), "WebSocket handshake completed");
                let (write, read) = ws_stream.split();
                Ok((Box::pin(write), Box::pin(read)))
            }
            Err(WsError::Http(response))
                if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
            {
                Err(Error::auth(format!(
                    "handshake rejected with HTTP {}",
                    response.status()
                )))
            }
            Err(e) => Err(Error::connection_failed(url.as_str(), e.to_string())),
        }
    }
}
