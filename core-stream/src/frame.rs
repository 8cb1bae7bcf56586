//! # Frame Classification
//!
//! Inbound push-transport frames carry four distinct payloads that must
//! never be confused: audio bytes, 2-byte control markers, zero-length flush
//! signals, and metadata JSON text. Classification is a pure function so the
//! dispatch rules are testable without a transport.

use crate::buffer::AudioChunk;
use crate::track_info::{NowPlayingDto, TrackMetadata};
use bytes::Bytes;
use serde::Deserialize;
use tracing::warn;

/// Out-of-band sentinel frames signaling server-side track boundaries.
///
/// Markers are control data relative to [`AudioChunk`] and must never be
/// queued as playable audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMarker {
    /// The server switched tracks; queued audio belongs to the old track.
    TrackTransition,
    /// The current track ended.
    TrackEnd,
}

const TRACK_TRANSITION: [u8; 2] = [0xFF, 0xFE];
const TRACK_END: [u8; 2] = [0xFF, 0xFF];

impl ControlMarker {
    /// Parse a 2-byte sentinel. Any other byte sequence is not a marker.
    pub fn parse(data: &[u8]) -> Option<Self> {
        match data {
            d if d == TRACK_TRANSITION => Some(ControlMarker::TrackTransition),
            d if d == TRACK_END => Some(ControlMarker::TrackEnd),
            _ => None,
        }
    }
}

/// Classified inbound frame.
#[derive(Debug)]
pub enum FrameKind {
    /// Playable audio payload.
    Audio(AudioChunk),
    /// Track-boundary control marker.
    Control(ControlMarker),
    /// Zero-length flush signal; a no-op.
    Flush,
    /// Push-delivered now-playing metadata.
    Metadata(TrackMetadata),
    /// Unrecognized or malformed payload, logged and dropped.
    Ignored,
}

/// Classify a binary frame.
pub fn classify_binary(data: Bytes) -> FrameKind {
    if data.is_empty() {
        return FrameKind::Flush;
    }
    if let Some(marker) = ControlMarker::parse(&data) {
        return FrameKind::Control(marker);
    }
    FrameKind::Audio(AudioChunk::new(data))
}

/// Envelope form of push-delivered metadata: `{"type": ..., "track": {...}}`.
#[derive(Debug, Deserialize)]
struct MetadataEnvelope {
    #[serde(rename = "type")]
    kind: String,
    track: Option<NowPlayingDto>,
}

/// Classify a text frame as metadata JSON.
///
/// Accepts both the bare now-playing object and the typed envelope form.
/// Malformed JSON is logged and discarded; a metadata hiccup must never
/// interrupt audio.
pub fn classify_text(text: &str) -> FrameKind {
    if let Ok(envelope) = serde_json::from_str::<MetadataEnvelope>(text) {
        if let Some(metadata) = envelope.track.and_then(NowPlayingDto::into_metadata) {
            return FrameKind::Metadata(metadata);
        }
        warn!(kind = %envelope.kind, "Metadata envelope without usable track payload");
        return FrameKind::Ignored;
    }

    match serde_json::from_str::<NowPlayingDto>(text) {
        Ok(dto) => match dto.into_metadata() {
            Some(metadata) => FrameKind::Metadata(metadata),
            None => FrameKind::Ignored,
        },
        Err(e) => {
            warn!(error = %e, "Discarding malformed metadata frame");
            FrameKind::Ignored
        }
    }
}
