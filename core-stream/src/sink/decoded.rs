//! # Decode-and-Schedule Sink
//!
//! Fallback strategy for platforms without a streaming buffer: each chunk is
//! decoded independently and scheduled directly behind the unit currently
//! playing. Completion of one scheduled unit triggers dequeue-and-schedule
//! of the next, so the chain never queues more than one decoded unit behind
//! the playing one.
//!
//! Malformed units are dropped and playback continues from the next chunk;
//! a decode hiccup must never end the session.

use crate::buffer::{AudioChunk, BufferQueue};
use crate::error::Result;
use crate::sink::{PlaybackSink, SinkProbe, SinkStrategy};
use async_trait::async_trait;
use bridge_traits::error::BridgeError;
use bridge_traits::media::ChunkScheduler;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Default)]
struct DecodedState {
    stopped: bool,
    started: bool,
    /// The chain task is alive and will observe queued chunks.
    chain_running: bool,
    /// Playable duration of units scheduled but not yet finished.
    scheduled_ahead: Duration,
}

/// Decode-and-schedule playback strategy.
pub struct DecodeScheduleSink {
    queue: Arc<BufferQueue>,
    scheduler: Arc<dyn ChunkScheduler>,
    state: Mutex<DecodedState>,
    cancel: CancellationToken,
    /// Self-reference so `feed(&self)` can hand the chain task an owner.
    this: Weak<DecodeScheduleSink>,
}

impl DecodeScheduleSink {
    pub fn new(queue: Arc<BufferQueue>, scheduler: Arc<dyn ChunkScheduler>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            queue,
            scheduler,
            state: Mutex::new(DecodedState::default()),
            cancel: CancellationToken::new(),
            this: this.clone(),
        })
    }

    /// Start the chain task if it is not already draining the queue.
    fn ensure_chain(&self) {
        let Some(sink) = self.this.upgrade() else {
            return;
        };
        {
            let mut st = self.state.lock();
            if st.stopped || st.chain_running {
                return;
            }
            st.chain_running = true;
        }
        tokio::spawn(async move { sink.run_chain().await });
    }

    /// Dequeue, decode, and chain scheduled units until the queue drains or
    /// the sink stops.
    async fn run_chain(self: Arc<Self>) {
        let mut pending: Option<(JoinHandle<()>, Duration)> = None;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let Some(chunk) = self.queue.pop() else {
                // Let the tail play out, then hand the chain back. The
                // empty re-check under the lock closes the race against a
                // push landing while the tail finished.
                if let Some((handle, duration)) = pending.take() {
                    let _ = handle.await;
                    self.settle_scheduled(duration);
                }
                let mut st = self.state.lock();
                if self.queue.is_empty() || st.stopped {
                    st.chain_running = false;
                    break;
                }
                continue;
            };

            let unit = match self.scheduler.decode(chunk.data).await {
                Ok(unit) => unit,
                Err(BridgeError::DecodeFailed(msg)) => {
                    warn!(error = %msg, "Dropping malformed audio unit");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Scheduler failure; ending chain");
                    self.state.lock().chain_running = false;
                    break;
                }
            };

            {
                let mut st = self.state.lock();
                st.scheduled_ahead += unit.duration;
                st.started = true;
            }

            // Schedule the new unit behind the playing one *before* waiting
            // for the previous to finish: exactly one unit is queued ahead.
            let scheduler = Arc::clone(&self.scheduler);
            let play = tokio::spawn(async move {
                if let Err(e) = scheduler.play_through(unit).await {
                    warn!(error = %e, "Scheduled unit failed to play");
                }
            });

            if let Some((previous, duration)) = pending.replace((play, unit.duration)) {
                let _ = previous.await;
                self.settle_scheduled(duration);
            }
        }

        debug!("Decode chain ended");
    }

    fn settle_scheduled(&self, played: Duration) {
        let mut st = self.state.lock();
        st.scheduled_ahead = st.scheduled_ahead.saturating_sub(played);
    }
}

#[async_trait]
impl PlaybackSink for DecodeScheduleSink {
    fn strategy(&self) -> SinkStrategy {
        SinkStrategy::Decoded
    }

    async fn start(&self, initial_chunks: Vec<AudioChunk>) -> Result<()> {
        for chunk in initial_chunks.into_iter().rev() {
            self.queue.push_front(chunk);
        }
        self.ensure_chain();
        Ok(())
    }

    async fn feed(&self) -> Result<()> {
        self.ensure_chain();
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
        self.cancel.cancel();
        self.scheduler.stop().await;
    }

    async fn probe(&self) -> SinkProbe {
        let (started, stopped, scheduled_ahead) = {
            let st = self.state.lock();
            (st.started, st.stopped, st.scheduled_ahead)
        };
        if stopped {
            return SinkProbe::idle();
        }

        SinkProbe {
            position: self.scheduler.position().await,
            paused: false,
            ready: started,
            buffered_ahead: Some(self.queue.peek_duration_estimate() + scheduled_ahead),
        }
    }
}
