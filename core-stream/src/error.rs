//! # Stream Error Types
//!
//! Error taxonomy for the streaming engine. Every variant maps to one
//! recovery path: transport and starvation failures feed the reconnection
//! scheduler, decode failures drop the offending unit, quota failures are
//! remediated inside the buffered sink, and `Terminal` ends the session
//! until the user reconnects explicitly.

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Errors that can occur during stream playback.
#[derive(Error, Debug)]
pub enum StreamError {
    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Socket or fetch failure, or an unexpected transport close.
    #[error("Transport failure: {0}")]
    Transport(String),

    // ========================================================================
    // Playback Errors
    // ========================================================================
    /// A malformed audio unit was dropped; playback continues.
    #[error("Decode failure: {0}")]
    Decode(String),

    /// Platform buffer quota remained exhausted after remediation.
    #[error("Platform buffer quota exhausted after remediation")]
    BufferQuota,

    /// The playable buffer fell below the continuous-playback minimum.
    #[error("Buffer starved: {0}")]
    Starvation(String),

    /// Platform media surface failure.
    #[error("Media surface error: {0}")]
    Media(String),

    /// The platform rejected programmatic playback start.
    #[error("Playback start blocked by platform autoplay policy")]
    AutoplayBlocked,

    /// The sink cannot continue and must be torn down and recreated with
    /// carried-over chunks.
    #[error("Sink rebuild required")]
    SinkRebuildRequired,

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Reconnect attempts exhausted; the session is terminally failed.
    #[error("Reconnect attempts exhausted after {0} tries")]
    Terminal(u32),

    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Metadata endpoint or payload failure (non-fatal to playback).
    #[error("Metadata error: {0}")]
    Metadata(String),
}

impl StreamError {
    /// Returns `true` if the failure should feed the reconnection scheduler.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StreamError::Transport(_)
                | StreamError::Starvation(_)
                | StreamError::Media(_)
                | StreamError::SinkRebuildRequired
        )
    }

    /// Returns `true` if the session must stop until a new connect intent.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::Terminal(_))
    }
}

impl From<BridgeError> for StreamError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::QuotaExceeded => StreamError::BufferQuota,
            BridgeError::AutoplayBlocked => StreamError::AutoplayBlocked,
            BridgeError::DecodeFailed(msg) => StreamError::Decode(msg),
            BridgeError::MediaError(msg) => StreamError::Media(msg),
            BridgeError::TransportClosed(msg) => StreamError::Transport(msg),
            BridgeError::NotAvailable(msg) => StreamError::Media(msg),
            BridgeError::OperationFailed(msg) => StreamError::Transport(msg),
            BridgeError::Io(e) => StreamError::Transport(e.to_string()),
        }
    }
}

/// Result type for streaming operations.
pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StreamError::Transport("reset".into()).is_transient());
        assert!(StreamError::Starvation("empty".into()).is_transient());
        assert!(StreamError::SinkRebuildRequired.is_transient());
        assert!(!StreamError::Decode("bad unit".into()).is_transient());
        assert!(!StreamError::Terminal(8).is_transient());
    }

    #[test]
    fn fatal_classification() {
        assert!(StreamError::Terminal(8).is_fatal());
        assert!(!StreamError::Transport("reset".into()).is_fatal());
    }

    #[test]
    fn bridge_error_mapping() {
        assert!(matches!(
            StreamError::from(BridgeError::QuotaExceeded),
            StreamError::BufferQuota
        ));
        assert!(matches!(
            StreamError::from(BridgeError::AutoplayBlocked),
            StreamError::AutoplayBlocked
        ));
        assert!(matches!(
            StreamError::from(BridgeError::TransportClosed("gone".into())),
            StreamError::Transport(_)
        ));
        assert!(matches!(
            StreamError::from(BridgeError::DecodeFailed("truncated".into())),
            StreamError::Decode(_)
        ));
    }
}
