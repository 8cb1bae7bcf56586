//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the
//! individual workspace crates (`core-stream`, `bridge-desktop`). Host
//! applications can depend on `radio-stream-workspace` and enable the
//! documented features without wiring each crate individually:
//!
//! - `desktop-shims` (default): the engine plus the reqwest/tungstenite
//!   networking adapters for desktop hosts.
//! - `engine-only`: just the engine; the host supplies every bridge.
