//! # Stream Engine
//!
//! Client-side adaptive streaming playback controller for a continuous
//! internet-radio feed. Audio arrives either as binary frames over a
//! persistent socket (push) or as a progressive HTTP body (pull), flows
//! through an ordered buffer into one of three interchangeable playback
//! sinks, and is kept alive across network degradation, server-side track
//! transitions, and platform playback restrictions.
//!
//! ## Components
//!
//! - [`buffer::BufferQueue`] - ordered store of not-yet-rendered chunks
//! - [`sink`] - the three playback strategies behind one interface
//! - [`connection::ConnectionManager`] - push-transport ownership and frame
//!   dispatch
//! - [`health::HealthMonitor`] - latched-timestamp watchdog
//! - [`reconnect::ReconnectionScheduler`] - bounded exponential backoff with
//!   strategy downgrade
//! - [`track_info::TrackInfoSync`] - debounced now-playing change detection
//! - [`session::StreamController`] - the owner wiring it all together
//!
//! ## Usage
//!
//! ```ignore
//! use core_stream::{StreamConfig, StreamController, StreamDependencies};
//! use std::sync::Arc;
//!
//! let deps = StreamDependencies::new(http_client, socket_connector, media_bridge);
//! let controller = StreamController::new(deps, StreamConfig::default())?;
//!
//! let mut events = controller.subscribe();
//! controller.connect().await;
//! while let Ok(event) = events.recv().await {
//!     // Render status and track metadata.
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod frame;
pub mod health;
pub mod reconnect;
pub mod session;
pub mod sink;
pub mod track_info;

pub use buffer::{AudioChunk, BufferQueue};
pub use config::{ReconnectPolicy, StreamConfig};
pub use error::{Result, StreamError};
pub use events::{PlayerEvent, PlayerEventBus};
pub use frame::ControlMarker;
pub use session::{SessionStatus, StreamController, StreamDependencies};
pub use sink::{PlaybackSink, SinkStrategy};
pub use track_info::TrackMetadata;
