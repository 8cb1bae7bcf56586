//! # Playback Sinks
//!
//! Three interchangeable strategies for turning received chunks into sound,
//! behind one capability interface. The strategy is chosen once per session
//! from the platform capability probe and never mixed mid-session:
//!
//! - [`BufferedAppendSink`](buffered::BufferedAppendSink) - appends chunks
//!   into a platform streaming buffer. Preferred when available.
//! - [`DecodeScheduleSink`](decoded::DecodeScheduleSink) - decodes each
//!   chunk independently and chains scheduled units. Used only when the
//!   buffered strategy is unavailable.
//! - [`ProgressiveSink`](progressive::ProgressiveSink) - hands the platform
//!   a URL and lets it fetch the stream itself. The fallback for restricted
//!   platforms; reconnection re-requests the URL at an updated position.
//!
//! All sinks consume from the shared [`BufferQueue`](crate::buffer) owned by
//! the session: the transport pushes a chunk, then nudges the sink with
//! `feed()`, and the sink drains as far as its strategy permits. `stop()` is
//! idempotent and releases all platform handles; a sink is never restarted.

pub mod buffered;
pub mod decoded;
pub mod progressive;

use crate::buffer::AudioChunk;
use crate::error::Result;
use async_trait::async_trait;
use bridge_traits::media::MediaCapabilities;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Playback strategy for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SinkStrategy {
    /// Buffered-append into a platform streaming buffer.
    Buffered,
    /// Per-chunk decode-and-schedule.
    Decoded,
    /// Progressive fetch by the platform from a URL.
    Progressive,
}

impl SinkStrategy {
    /// Whether the strategy consumes frames from the push transport.
    /// The progressive strategy pulls over plain HTTP instead.
    pub fn uses_push_transport(&self) -> bool {
        !matches!(self, SinkStrategy::Progressive)
    }

    /// Whether replaying recent unconsumed chunks into a rebuilt sink buys
    /// continuity. The progressive strategy resumes by URL position and
    /// never replays.
    pub fn benefits_from_carry_over(&self) -> bool {
        !matches!(self, SinkStrategy::Progressive)
    }
}

impl std::fmt::Display for SinkStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkStrategy::Buffered => write!(f, "buffered"),
            SinkStrategy::Decoded => write!(f, "decoded"),
            SinkStrategy::Progressive => write!(f, "progressive"),
        }
    }
}

/// Select the playback strategy from the platform capability probe.
///
/// An explicit platform override or an autoplay restriction forces the
/// progressive strategy outright; otherwise the richest supported strategy
/// wins, with decode-and-schedule only standing in where the streaming
/// buffer is missing.
pub fn select_strategy(caps: &MediaCapabilities) -> SinkStrategy {
    if caps.force_progressive || !caps.autoplay_allowed {
        return SinkStrategy::Progressive;
    }
    if caps.append_buffer {
        return SinkStrategy::Buffered;
    }
    if caps.chunk_scheduling {
        return SinkStrategy::Decoded;
    }
    SinkStrategy::Progressive
}

/// One observation of sink state, taken by the watchdog each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkProbe {
    /// Current playback position.
    pub position: Duration,
    /// The underlying element reports paused.
    pub paused: bool,
    /// The element has enough data to keep playing.
    pub ready: bool,
    /// Seconds of received-but-unplayed audio, when the strategy knows it.
    pub buffered_ahead: Option<Duration>,
}

impl SinkProbe {
    /// Probe of a sink that has not started producing sound yet.
    pub fn idle() -> Self {
        Self {
            position: Duration::ZERO,
            paused: true,
            ready: false,
            buffered_ahead: Some(Duration::ZERO),
        }
    }
}

/// Uniform contract over the three playback strategies.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// The strategy this sink implements.
    fn strategy(&self) -> SinkStrategy;

    /// Begin the sink's life, seeding it with carried-over chunks from a
    /// previous sink when the strategy benefits from continuity. Playback
    /// itself may start deferred, once enough data has accumulated.
    async fn start(&self, initial_chunks: Vec<AudioChunk>) -> Result<()>;

    /// New data is available in the shared queue; drain as far as the
    /// strategy permits. Cheap and safe to call on every arrival.
    async fn feed(&self) -> Result<()>;

    /// Stop playback and release every platform handle. Idempotent; the
    /// sink is unusable afterwards.
    async fn stop(&self);

    /// Snapshot the sink for health evaluation.
    async fn probe(&self) -> SinkProbe;
}
