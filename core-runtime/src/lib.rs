//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the streaming core:
//! - Logging and tracing infrastructure
//! - Event bus system for UI collaborators
//!
//! ## Overview
//!
//! This crate contains the runtime utilities other modules depend on. It
//! establishes the logging conventions and event broadcasting mechanisms
//! used throughout the system; domain crates define their own event enums
//! and publish them through [`events::EventBus`].

pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
