//! # Desktop Bridge Implementations
//!
//! Default implementations of the networking bridge traits for desktop
//! platforms (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready adapters using desktop-appropriate
//! libraries:
//! - `HttpClient` using `reqwest`
//! - `SocketConnector` / `StreamSocket` using `tokio-tungstenite`
//!
//! The media surface ([`MediaBridge`](bridge_traits::media::MediaBridge) and
//! friends) is intentionally not implemented here: it wraps whatever audio
//! element the embedding host exposes (a web view, a native media framework)
//! and therefore ships with the host application.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TungsteniteConnector};
//! use std::sync::Arc;
//!
//! let http_client = Arc::new(ReqwestHttpClient::new());
//! let connector = Arc::new(TungsteniteConnector::new());
//! // Hand both to the stream controller's dependency bundle.
//! ```

mod http;
mod socket;

pub use http::ReqwestHttpClient;
pub use socket::{TungsteniteConnector, TungsteniteSocket};
