//! # Progressive-Fetch Sink
//!
//! The simplest strategy, and the one restricted platforms are forced onto:
//! the media element is pointed at the pull-transport URL and the platform
//! fetches and buffers the stream itself. There is no chunk queue to manage
//! and nothing to replay: reconnection constructs a new sink around a new
//! URL with an updated position and a fresh cache-buster.

use crate::buffer::AudioChunk;
use crate::error::{Result, StreamError};
use crate::sink::{PlaybackSink, SinkProbe, SinkStrategy};
use async_trait::async_trait;
use bridge_traits::media::MediaHandle;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct ProgressiveState {
    started: bool,
    stopped: bool,
}

/// Progressive-fetch playback strategy.
pub struct ProgressiveSink {
    handle: Arc<dyn MediaHandle>,
    url: String,
    state: Mutex<ProgressiveState>,
}

impl ProgressiveSink {
    /// `url` must already carry the resume position, platform tag, and a
    /// fresh cache-buster; see
    /// [`StreamConfig::direct_stream_url`](crate::config::StreamConfig::direct_stream_url).
    pub fn new(handle: Arc<dyn MediaHandle>, url: String) -> Self {
        Self {
            handle,
            url,
            state: Mutex::new(ProgressiveState::default()),
        }
    }

    /// The URL this sink is playing from.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PlaybackSink for ProgressiveSink {
    fn strategy(&self) -> SinkStrategy {
        SinkStrategy::Progressive
    }

    async fn start(&self, initial_chunks: Vec<AudioChunk>) -> Result<()> {
        // The server streams from the requested position; carried-over
        // chunks never apply to this strategy.
        if !initial_chunks.is_empty() {
            debug!(
                dropped = initial_chunks.len(),
                "Progressive sink ignores carried-over chunks"
            );
        }

        self.handle
            .set_source(&self.url)
            .await
            .map_err(StreamError::from)?;
        self.handle.play().await.map_err(StreamError::from)?;
        self.state.lock().started = true;
        Ok(())
    }

    async fn feed(&self) -> Result<()> {
        // No chunk flow: the platform pulls the stream itself.
        Ok(())
    }

    async fn stop(&self) {
        {
            let mut st = self.state.lock();
            if st.stopped {
                return;
            }
            st.stopped = true;
        }
        let _ = self.handle.pause().await;
        self.handle.release().await;
    }

    async fn probe(&self) -> SinkProbe {
        let (started, stopped) = {
            let st = self.state.lock();
            (st.started, st.stopped)
        };
        if stopped || !started {
            return SinkProbe::idle();
        }

        SinkProbe {
            position: self.handle.position().await,
            paused: self.handle.is_paused().await,
            ready: self.handle.is_ready().await,
            // The platform owns buffering; ahead-time is unknowable here.
            buffered_ahead: None,
        }
    }
}
