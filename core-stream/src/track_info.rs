//! # Track Info Sync
//!
//! Single entry point for now-playing metadata, whether it arrives by poll
//! (`GET /api/now-playing` on a fixed interval as fallback) or by push over
//! the stream socket. Detects track changes by `id` and decides whether a
//! change warrants a sink reset, debounced so frequent metadata churn never
//! causes restart loops.

use crate::error::{Result, StreamError};
use bridge_traits::http::{HttpClient, HttpRequest};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// ============================================================================
// Metadata Model
// ============================================================================

/// Now-playing metadata for one track.
///
/// `id` is the change-detection key: successive payloads with equal `id`
/// describe the same track regardless of any other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Server-side track identifier (a path).
    pub id: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_seconds: Option<f64>,
    /// Server playback position at the time the payload was produced. Used
    /// only to seed a fresh connection's resume point; never to seek a live
    /// sink.
    pub server_position_seconds: Option<f64>,
    pub active_listeners: Option<u32>,
}

/// Wire format of the now-playing endpoint and of push-delivered metadata
/// objects.
#[derive(Debug, Deserialize)]
pub(crate) struct NowPlayingDto {
    pub path: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<f64>,
    pub playback_position: Option<f64>,
    pub active_listeners: Option<u32>,
    pub error: Option<String>,
}

impl NowPlayingDto {
    /// Convert the wire payload into metadata. Returns `None` for error
    /// payloads or payloads without a track id.
    pub(crate) fn into_metadata(self) -> Option<TrackMetadata> {
        if let Some(error) = self.error {
            debug!(error, "Now-playing payload carried an error");
            return None;
        }
        let id = self.path?;
        Some(TrackMetadata {
            id,
            title: self.title,
            artist: self.artist,
            album: self.album,
            duration_seconds: self.duration,
            server_position_seconds: self.playback_position,
            active_listeners: self.active_listeners,
        })
    }
}

/// Fetch current metadata from the now-playing endpoint.
///
/// Non-2xx responses and error payloads resolve to `Ok(None)`: the caller
/// keeps the previously displayed metadata. Only transport-level failures
/// surface as errors, and even those are non-fatal to playback.
pub async fn fetch_now_playing(
    client: &dyn HttpClient,
    url: &str,
) -> Result<Option<TrackMetadata>> {
    let response = client
        .execute(HttpRequest::get(url))
        .await
        .map_err(|e| StreamError::Metadata(e.to_string()))?;

    if !response.is_success() {
        debug!(status = response.status, "Now-playing fetch returned non-2xx");
        return Ok(None);
    }

    match response.json::<NowPlayingDto>() {
        Ok(dto) => Ok(dto.into_metadata()),
        Err(e) => {
            warn!(error = %e, "Malformed now-playing payload");
            Ok(None)
        }
    }
}

// ============================================================================
// Change Detection
// ============================================================================

/// Outcome of observing a metadata payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackChange {
    /// Same track as before; nothing to do beyond freshness bookkeeping.
    Unchanged,
    /// Track changed; update displays but keep playback running.
    MetadataOnly,
    /// Track changed and the debounce has elapsed; reset the sink to pick
    /// up the new track cleanly.
    ResetSink,
}

/// Debounced track-change detector.
///
/// The reset debounce compares against both the start of stable playback and
/// the previous reset, so back-to-back track changes cannot restart the
/// session in a loop.
pub struct TrackInfoSync {
    debounce: Duration,
    current: Option<TrackMetadata>,
    playing_since: Option<Instant>,
    last_reset_at: Option<Instant>,
}

impl TrackInfoSync {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            current: None,
            playing_since: None,
            last_reset_at: None,
        }
    }

    /// The most recently observed metadata.
    pub fn current(&self) -> Option<&TrackMetadata> {
        self.current.as_ref()
    }

    /// Server position of the current track, used to seed the resume point
    /// of a fresh connection.
    pub fn resume_position_seconds(&self) -> u64 {
        self.current
            .as_ref()
            .and_then(|m| m.server_position_seconds)
            .map(|p| p.max(0.0) as u64)
            .unwrap_or(0)
    }

    /// Record that stable playback began.
    pub fn mark_playing(&mut self, now: Instant) {
        if self.playing_since.is_none() {
            self.playing_since = Some(now);
        }
    }

    /// Record that playback stopped (teardown, reconnect, failure).
    pub fn mark_stopped(&mut self) {
        self.playing_since = None;
    }

    /// Observe one metadata payload from either the poll or the push path.
    pub fn observe(&mut self, metadata: TrackMetadata, now: Instant) -> TrackChange {
        let changed = match &self.current {
            Some(current) => current.id != metadata.id,
            None => true,
        };
        let first_observation = self.current.is_none();
        self.current = Some(metadata);

        if !changed {
            return TrackChange::Unchanged;
        }

        // The first payload of a session names the track we are already
        // joining; it is display-only.
        if first_observation {
            return TrackChange::MetadataOnly;
        }

        if self.reset_allowed(now) {
            self.last_reset_at = Some(now);
            TrackChange::ResetSink
        } else {
            TrackChange::MetadataOnly
        }
    }

    fn reset_allowed(&self, now: Instant) -> bool {
        let stable = self
            .playing_since
            .map(|since| now.duration_since(since) >= self.debounce)
            .unwrap_or(false);
        let spaced = self
            .last_reset_at
            .map(|at| now.duration_since(at) >= self.debounce)
            .unwrap_or(true);
        stable && spaced
    }
}
