//! # Connection Manager
//!
//! Owns one push-transport connection: `Closed → Opening → Open → Closed`.
//! On open it immediately requests current track metadata and arms a single
//! timer guarding the *initial* silence window; steady-state liveness is
//! the health monitor's job, and no inbound frame rearms anything here.
//!
//! Inbound frames are classified and dispatched: control markers reach the
//! session (with `TrackTransition` clearing the queue), audio chunks are
//! pushed to the queue and announced, metadata text is forwarded, and
//! malformed payloads are logged and dropped. The session loop reacts to the
//! announcements; the receive loop itself never touches the sink, so a sink
//! swap can never race a frame in flight.
//!
//! The pull transport has no connection manager: the progressive sink hands
//! its URL to the platform and the platform owns the HTTP fetch.

use crate::buffer::BufferQueue;
use crate::error::{Result, StreamError};
use crate::frame::{classify_binary, classify_text, ControlMarker, FrameKind};
use crate::track_info::TrackMetadata;
use bridge_traits::socket::{SocketConnector, SocketFrame, StreamSocket};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
}

/// Notifications from the receive loop to the session.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// An audio chunk was pushed to the queue. The first of these on a
    /// connection confirms data flow, which is what resets the reconnect
    /// ladder.
    ChunkArrived,
    /// Push-delivered now-playing metadata.
    Metadata(TrackMetadata),
    /// A track-boundary control marker.
    TrackBoundary(ControlMarker),
    /// Zero chunks arrived within the initial silence window.
    InitialSilence,
    /// The transport closed.
    Closed { reason: Option<String> },
}

/// Chunk-arrival bookkeeping shared with the health monitor, updated on the
/// hot path without going through the event channel.
#[derive(Default)]
pub struct FlowTracker {
    last_chunk_at: Mutex<Option<Instant>>,
}

impl FlowTracker {
    pub fn record(&self, at: Instant) {
        *self.last_chunk_at.lock() = Some(at);
    }

    pub fn last_chunk_at(&self) -> Option<Instant> {
        *self.last_chunk_at.lock()
    }

    pub fn reset(&self) {
        *self.last_chunk_at.lock() = None;
    }
}

const NOW_PLAYING_REQUEST: &str = r#"{"type":"now_playing_request"}"#;
const PING: &str = r#"{"type":"ping"}"#;

/// One open push-transport connection.
pub struct ConnectionManager {
    socket: Arc<dyn StreamSocket>,
    state: Mutex<ConnectionState>,
}

impl ConnectionManager {
    /// Open a connection to the push transport.
    pub async fn open(connector: &dyn SocketConnector, url: &str) -> Result<Self> {
        debug!(url, "Opening stream connection");
        let socket = connector.connect(url).await.map_err(StreamError::from)?;
        info!(url, "Stream connection open");
        Ok(Self {
            socket: Arc::from(socket),
            state: Mutex::new(ConnectionState::Open),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Ask the server for current track metadata.
    pub async fn request_now_playing(&self) -> Result<()> {
        self.socket
            .send_text(NOW_PLAYING_REQUEST)
            .await
            .map_err(StreamError::from)
    }

    /// Send a liveness probe.
    pub async fn send_ping(&self) -> Result<()> {
        self.socket.send_text(PING).await.map_err(StreamError::from)
    }

    /// Close the transport. Idempotent.
    pub async fn close(&self) {
        *self.state.lock() = ConnectionState::Closed;
        self.socket.close().await;
    }

    /// Receive loop. Runs until the transport closes or `cancel` fires;
    /// classified traffic flows into `queue` and everything the session
    /// must react to is reported through `events`.
    pub async fn run(
        &self,
        queue: Arc<BufferQueue>,
        flow: Arc<FlowTracker>,
        events: mpsc::Sender<ConnectionEvent>,
        initial_data_timeout: Duration,
        cancel: CancellationToken,
    ) {
        // Push transports deliver metadata themselves, but only on request.
        if let Err(e) = self.request_now_playing().await {
            warn!(error = %e, "Initial now-playing request failed");
        }

        let silence_deadline = tokio::time::Instant::now() + initial_data_timeout;
        let mut received_any = false;
        let mut silence_reported = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.close().await;
                    return;
                }
                _ = tokio::time::sleep_until(silence_deadline),
                    if !received_any && !silence_reported =>
                {
                    silence_reported = true;
                    let _ = events.send(ConnectionEvent::InitialSilence).await;
                }
                frame = self.socket.recv() => {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(e) => {
                            *self.state.lock() = ConnectionState::Closed;
                            let _ = events
                                .send(ConnectionEvent::Closed { reason: Some(e.to_string()) })
                                .await;
                            return;
                        }
                    };

                    match frame {
                        SocketFrame::Binary(data) => match classify_binary(data) {
                            FrameKind::Flush => {}
                            FrameKind::Control(marker) => {
                                if marker == ControlMarker::TrackTransition {
                                    // Queued audio belongs to the outgoing
                                    // track and must never play.
                                    queue.clear();
                                }
                                let _ = events
                                    .send(ConnectionEvent::TrackBoundary(marker))
                                    .await;
                            }
                            FrameKind::Audio(chunk) => {
                                received_any = true;
                                flow.record(chunk.arrived_at);
                                queue.push(chunk);
                                let _ = events.send(ConnectionEvent::ChunkArrived).await;
                            }
                            FrameKind::Metadata(_) | FrameKind::Ignored => {}
                        },
                        SocketFrame::Text(text) => match classify_text(&text) {
                            FrameKind::Metadata(metadata) => {
                                let _ = events.send(ConnectionEvent::Metadata(metadata)).await;
                            }
                            // Malformed JSON is logged by the classifier and
                            // discarded; non-fatal.
                            _ => {}
                        },
                        SocketFrame::Closed { reason } => {
                            *self.state.lock() = ConnectionState::Closed;
                            info!(?reason, "Stream connection closed by peer");
                            let _ = events.send(ConnectionEvent::Closed { reason }).await;
                            return;
                        }
                    }
                }
            }
        }
    }
}
