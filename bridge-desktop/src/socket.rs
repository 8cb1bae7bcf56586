//! Push Transport Implementation using tokio-tungstenite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    socket::{SocketConnector, SocketFrame, StreamSocket},
};
use bytes::Bytes;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connector opening WebSocket push-transport connections.
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamSocket>> {
        debug!(url, "Opening push transport");
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("WebSocket connect: {}", e)))?;

        let (tx, rx) = ws_stream.split();
        Ok(Box::new(TungsteniteSocket {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One open WebSocket connection.
///
/// The sender and receiver halves are locked independently so the receive
/// loop never blocks outbound control messages.
pub struct TungsteniteSocket {
    tx: Mutex<Option<WsSink>>,
    rx: Mutex<WsStream>,
    closed: AtomicBool,
}

#[async_trait]
impl StreamSocket for TungsteniteSocket {
    async fn recv(&self) -> Result<SocketFrame> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(SocketFrame::Closed { reason: None });
        }

        let mut rx = self.rx.lock().await;
        loop {
            match rx.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(SocketFrame::Binary(Bytes::from(data)));
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(SocketFrame::Text(text.to_string()));
                }
                // Keepalive frames are handled by tungstenite itself.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    self.closed.store(true, Ordering::Release);
                    let reason = frame.map(|f| f.reason.to_string());
                    return Ok(SocketFrame::Closed { reason });
                }
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    warn!(error = %e, "Push transport receive error");
                    self.closed.store(true, Ordering::Release);
                    return Ok(SocketFrame::Closed {
                        reason: Some(e.to_string()),
                    });
                }
                None => {
                    self.closed.store(true, Ordering::Release);
                    return Ok(SocketFrame::Closed { reason: None });
                }
            }
        }
    }

    async fn send_text(&self, payload: &str) -> Result<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard
            .as_mut()
            .ok_or_else(|| BridgeError::TransportClosed("sender released".to_string()))?;

        tx.send(Message::Text(payload.to_string().into()))
            .await
            .map_err(|e| {
                self.closed.store(true, Ordering::Release);
                BridgeError::TransportClosed(e.to_string())
            })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut guard = self.tx.lock().await;
        if let Some(mut tx) = guard.take() {
            if let Err(e) = tx.send(Message::Close(None)).await {
                debug!(error = %e, "Close frame not delivered");
            }
            let _ = tx.close().await;
        }
    }
}
