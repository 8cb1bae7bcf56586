//! # Player Events
//!
//! The engine's outward-facing surface. UI collaborators such as a status
//! line or a now-playing display subscribe to the bus and render what
//! arrives; the
//! engine never calls into UI code directly.

use crate::session::SessionStatus;
use crate::track_info::TrackMetadata;
use core_runtime::events::EventBus;

/// Events published by the stream controller.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Status-display update.
    StatusChanged {
        message: String,
        is_error: bool,
        /// The display may drop the message after a short delay.
        auto_hide: bool,
    },
    /// Now-playing metadata changed; render it.
    TrackChanged(TrackMetadata),
    /// Session lifecycle transition.
    SessionStatusChanged(SessionStatus),
}

/// Bus carrying [`PlayerEvent`]s.
pub type PlayerEventBus = EventBus<PlayerEvent>;
