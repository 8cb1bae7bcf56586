//! Platform Media Surface
//!
//! These abstractions cover the three ways a host platform can turn received
//! audio bytes into sound, mirroring the three playback strategies the core
//! selects between:
//!
//! - [`AppendBuffer`] - a streaming-buffer API the host media element
//!   consumes directly (append/trim semantics, quota-limited).
//! - [`ChunkScheduler`] - decode one chunk at a time and schedule it behind
//!   the currently playing unit, for platforms without a streaming buffer.
//! - [`MediaHandle::set_source`] - point the media element at a progressive
//!   URL and let the platform fetch the stream itself.
//!
//! [`MediaBridge`] is the host-provided factory. A fresh [`MediaHandle`] is
//! created for every connection attempt and released on teardown; handles
//! are never reused across sessions: a live element surviving a pause/play
//! race produces spurious rejected-play errors on several platforms.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// What the platform can do, probed once at session start.
#[derive(Debug, Clone)]
pub struct MediaCapabilities {
    /// A streaming-buffer API is available for the buffered-append strategy.
    pub append_buffer: bool,
    /// Per-chunk decode-and-schedule is available.
    pub chunk_scheduling: bool,
    /// The platform permits programmatic playback start.
    pub autoplay_allowed: bool,
    /// Host requests the progressive strategy regardless of other
    /// capabilities.
    pub force_progressive: bool,
    /// Platform tag reported to the pull-transport endpoint.
    pub platform_tag: String,
}

impl MediaCapabilities {
    /// Capabilities of a fully featured platform.
    pub fn full(platform_tag: impl Into<String>) -> Self {
        Self {
            append_buffer: true,
            chunk_scheduling: true,
            autoplay_allowed: true,
            force_progressive: false,
            platform_tag: platform_tag.into(),
        }
    }
}

/// A disposable platform playback element.
///
/// One handle backs one connection attempt. [`MediaHandle::release`] must
/// detach the element and revoke any object URLs it holds; it is idempotent
/// and safe to call on an already-released handle.
#[async_trait]
pub trait MediaHandle: Send + Sync {
    /// Begin playback.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::AutoplayBlocked`](crate::error::BridgeError)
    /// when the platform rejects the start; other failures map to
    /// [`BridgeError::MediaError`](crate::error::BridgeError).
    async fn play(&self) -> Result<()>;

    /// Pause playback, keeping the element alive.
    async fn pause(&self) -> Result<()>;

    /// Point the element at a progressive source URL.
    async fn set_source(&self, url: &str) -> Result<()>;

    /// Current playback position.
    async fn position(&self) -> Duration;

    /// Whether the element is currently paused.
    async fn is_paused(&self) -> bool;

    /// Whether the element has enough data to keep playing.
    async fn is_ready(&self) -> bool;

    /// Most recent element-level error, if any, since the last call.
    async fn take_error(&self) -> Option<String>;

    /// Detach the element and release platform resources. Idempotent.
    async fn release(&self);
}

/// A streaming buffer attached to a media element.
///
/// Appends are asynchronous on every known platform; callers must not issue
/// a second append before the first resolves.
#[async_trait]
pub trait AppendBuffer: Send + Sync {
    /// Append encoded audio bytes to the end of the buffer. Resolves when
    /// the platform has accepted the data.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::QuotaExceeded`](crate::error::BridgeError)
    /// when the platform buffer is full; the caller remediates by trimming.
    async fn append(&self, data: Bytes) -> Result<()>;

    /// Remove the `[from, to)` time range from the buffer. Resolves when the
    /// removal completes.
    async fn remove(&self, from: Duration, to: Duration) -> Result<()>;

    /// The currently buffered time range, or `None` when nothing is
    /// buffered.
    async fn buffered_range(&self) -> Option<(Duration, Duration)>;
}

/// Handle to one decoded, schedulable unit of audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedUnit {
    /// Scheduler-scoped identifier of the decoded data.
    pub id: u64,
    /// Playable duration of the unit.
    pub duration: Duration,
}

/// Per-chunk decode-and-schedule playback surface.
#[async_trait]
pub trait ChunkScheduler: Send + Sync {
    /// Decode one chunk of encoded audio.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DecodeFailed`](crate::error::BridgeError) for
    /// malformed units; the caller drops the unit and continues.
    async fn decode(&self, data: Bytes) -> Result<DecodedUnit>;

    /// Schedule a decoded unit directly behind the currently playing one and
    /// resolve when it has finished playing.
    async fn play_through(&self, unit: DecodedUnit) -> Result<()>;

    /// Current playback position across all units played so far.
    async fn position(&self) -> Duration;

    /// Stop playback and drop any scheduled units. Idempotent.
    async fn stop(&self);
}

/// Host-provided factory for the media surface.
#[async_trait]
pub trait MediaBridge: Send + Sync {
    /// Probe platform capabilities. Called once per session.
    fn capabilities(&self) -> MediaCapabilities;

    /// Construct a fresh playback element for one connection attempt.
    async fn create_handle(&self) -> Result<Arc<dyn MediaHandle>>;

    /// Attach a streaming buffer to `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotAvailable`](crate::error::BridgeError) when
    /// the platform has no streaming-buffer API.
    async fn create_append_buffer(
        &self,
        handle: &Arc<dyn MediaHandle>,
    ) -> Result<Arc<dyn AppendBuffer>>;

    /// Construct a chunk scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotAvailable`](crate::error::BridgeError) when
    /// per-chunk scheduling is not supported.
    async fn create_scheduler(&self) -> Result<Arc<dyn ChunkScheduler>>;
}
