//! The single multiplexed websocket connection.
//!
//! One connect, one subscription message, then text frames until the peer
//! closes or the transport fails. There is no reconnect: the caller's run ends
//! with the connection.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::MonitorError;
use crate::registry::SourceRegistry;
use crate::types::{SourceFilter, SubscriptionRequest};

/// A lazy, non-restartable sequence of raw text frames.
///
/// `next_frame` must be cancel-safe: the run loop races it against the
/// shutdown signal and the flush timer.
#[allow(async_fn_in_trait)]
pub trait FrameSource {
  /// `Ok(None)` once the peer has closed the stream.
  async fn next_frame(&mut self) -> Result<Option<String>, MonitorError>;
}

/// Subscription covering every registered source with the same filter.
pub fn subscription(registry: &SourceRegistry, resources: &[String], event_classes: &[String]) -> SubscriptionRequest {
  let filter = SourceFilter {
    resource: resources.to_vec(),
    event: event_classes.to_vec(),
  };
  SubscriptionRequest {
    sources: registry.ids().map(|id| (id.to_string(), filter.clone())).collect(),
  }
}

pub struct WsConnection {
  stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsConnection {
  /// Connect and send the subscription. Any failure here is a startup error.
  pub async fn connect(endpoint: &str, request: &SubscriptionRequest) -> Result<Self, MonitorError> {
    let (mut stream, response) = connect_async(endpoint)
      .await
      .map_err(|e| MonitorError::Connect(e.to_string()))?;
    debug!(status = %response.status(), "websocket handshake complete");

    let body = serde_json::to_string(request)?;
    stream
      .send(Message::Text(body))
      .await
      .map_err(|e| MonitorError::Connect(format!("subscription send failed: {}", e)))?;
    info!(sources = request.sources.len(), "subscription sent");

    Ok(Self { stream })
  }
}

impl FrameSource for WsConnection {
  async fn next_frame(&mut self) -> Result<Option<String>, MonitorError> {
    loop {
      match self.stream.next().await {
        None => return Ok(None),
        Some(Ok(Message::Text(text))) => return Ok(Some(text)),
        Some(Ok(Message::Binary(bytes))) => {
          return String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| MonitorError::decode(format!("binary frame is not UTF-8: {}", e)));
        }
        Some(Ok(Message::Close(frame))) => {
          info!(?frame, "connection closed by peer");
          return Ok(None);
        }
        // Keepalive is the transport's business.
        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
        Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),
        Some(Err(e)) => return Err(MonitorError::transport(e.to_string())),
      }
    }
  }
}
