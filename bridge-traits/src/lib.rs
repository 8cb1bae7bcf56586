//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host
//! platform embedding the streaming core.
//!
//! ## Overview
//!
//! This crate defines the contract between the streaming engine and
//! platform-specific implementations. Each trait represents a capability the
//! core requires but that differs per platform (desktop, mobile, web view):
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP for metadata polling and
//!   pull-transport requests
//! - [`SocketConnector`](socket::SocketConnector) /
//!   [`StreamSocket`](socket::StreamSocket) - The persistent push transport
//!
//! ### Media
//! - [`MediaBridge`](media::MediaBridge) - Factory + capability probe for
//!   the platform media surface
//! - [`MediaHandle`](media::MediaHandle) - Disposable playback element, one
//!   per connection attempt
//! - [`AppendBuffer`](media::AppendBuffer) - Streaming-buffer API
//! - [`ChunkScheduler`](media::ChunkScheduler) - Decode-and-schedule API
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Platform
//! implementations should convert their native errors into the closest
//! variant and keep messages actionable; the core maps quota, autoplay, and
//! decode failures onto distinct recovery paths.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so adapters can be shared across
//! async tasks. Hosts whose media objects are single-threaded are expected
//! to marshal calls onto their main thread internally.

pub mod error;
pub mod http;
pub mod media;
pub mod socket;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use media::{
    AppendBuffer, ChunkScheduler, DecodedUnit, MediaBridge, MediaCapabilities, MediaHandle,
};
pub use socket::{SocketConnector, SocketFrame, StreamSocket};
