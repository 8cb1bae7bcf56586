//! # Health Monitor
//!
//! Periodic watchdog over the live session. Each tick evaluates an ordered
//! list of independent conditions; the first failing condition wins and
//! short-circuits the tick. Timed conditions use a latched start-timestamp:
//! the first bad observation records when the condition began, the condition
//! fires only once the grace period has elapsed, and any good observation
//! resets the latch. A single noisy sample never reconnects the session.
//!
//! The monitor is a pure state machine; the controller owns the tick timer
//! and feeds it snapshots, which keeps every condition testable without a
//! live transport.

use crate::config::StreamConfig;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Why a reconnect was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// No data arrived within the timeout and the buffer is empty.
    NoData,
    /// The sink paused while the session should be playing.
    UnexpectedPause,
    /// Buffer-ahead stayed below minimum past the grace period.
    LowBuffer,
    /// Position frozen while the sink reports ready and unpaused.
    Stalled,
}

impl fmt::Display for ReconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectReason::NoData => write!(f, "no data received"),
            ReconnectReason::UnexpectedPause => write!(f, "unexpected pause"),
            ReconnectReason::LowBuffer => write!(f, "persistent low buffer"),
            ReconnectReason::Stalled => write!(f, "stalled despite buffered data"),
        }
    }
}

/// Action requested by one watchdog tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    /// Metadata is stale; refresh it. Not a reconnect.
    RefreshMetadata,
    /// Transport silent but buffer healthy; probe liveness and wait.
    SendPing,
    /// Tear down and rebuild the connection.
    Reconnect(ReconnectReason),
}

/// One observation of session state, assembled by the controller each tick.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    /// The user wants playback running.
    pub desired_playing: bool,
    /// A reconnect is already scheduled or in progress; all conditions are
    /// suppressed so one failure episode produces exactly one reconnect.
    pub reconnect_pending: bool,
    pub last_chunk_at: Option<Instant>,
    pub last_metadata_at: Option<Instant>,
    pub last_error_at: Option<Instant>,
    /// Seconds of not-yet-played audio held by the sink, when known. The
    /// progressive sink manages its own buffer and reports `None`.
    pub buffer_ahead: Option<Duration>,
    pub queue_depth: usize,
    pub queue_over_soft_limit: bool,
    pub position: Duration,
    pub paused: bool,
    pub ready: bool,
}

/// Latched-timestamp watchdog state.
pub struct HealthMonitor {
    no_data_timeout: Duration,
    min_buffer_ahead: Duration,
    low_buffer_grace: Duration,
    stall_grace: Duration,
    pause_debounce: Duration,
    metadata_refresh_interval: Duration,

    low_buffer_since: Option<Instant>,
    stall_since: Option<Instant>,
    last_position: Option<Duration>,
}

impl HealthMonitor {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            no_data_timeout: config.no_data_timeout,
            min_buffer_ahead: config.min_buffer_ahead,
            low_buffer_grace: config.low_buffer_grace,
            stall_grace: config.stall_grace,
            pause_debounce: config.pause_debounce,
            metadata_refresh_interval: config.metadata_refresh_interval,
            low_buffer_since: None,
            stall_since: None,
            last_position: None,
        }
    }

    /// Clear all latches. Called after teardown or a completed reconnect so
    /// stale observations never carry into the next connection.
    pub fn reset(&mut self) {
        self.low_buffer_since = None;
        self.stall_since = None;
        self.last_position = None;
    }

    /// Evaluate one tick. Conditions are checked in order; the first that
    /// fires wins.
    pub fn evaluate(&mut self, snap: &HealthSnapshot, now: Instant) -> Option<HealthAction> {
        if !snap.desired_playing || snap.reconnect_pending {
            self.reset();
            return None;
        }

        if snap.queue_over_soft_limit {
            warn!(
                depth = snap.queue_depth,
                "Buffer queue growing past soft limit; consumer appears starved"
            );
        }

        // 1. Metadata staleness: refresh, never reconnect.
        if let Some(at) = snap.last_metadata_at {
            if now.duration_since(at) >= self.metadata_refresh_interval {
                return Some(HealthAction::RefreshMetadata);
            }
        }

        // 2. No-data timeout. An empty buffer makes this a starvation
        // reconnect; otherwise probe the transport and wait a tick.
        if let Some(at) = snap.last_chunk_at {
            if now.duration_since(at) >= self.no_data_timeout {
                let starved = snap
                    .buffer_ahead
                    .map(|ahead| ahead < self.min_buffer_ahead)
                    .unwrap_or(false);
                if starved {
                    return Some(HealthAction::Reconnect(ReconnectReason::NoData));
                }
                return Some(HealthAction::SendPing);
            }
        }

        // 3. Unexpected pause. A pause right after a reported error is the
        // error's symptom and is handled by that error's path.
        if snap.paused {
            let error_recent = snap
                .last_error_at
                .map(|at| now.duration_since(at) < self.pause_debounce)
                .unwrap_or(false);
            if !error_recent {
                return Some(HealthAction::Reconnect(ReconnectReason::UnexpectedPause));
            }
        }

        // 4. Persistent low buffer (latched).
        if let Some(ahead) = snap.buffer_ahead {
            if ahead < self.min_buffer_ahead {
                let since = *self.low_buffer_since.get_or_insert(now);
                if now.duration_since(since) >= self.low_buffer_grace {
                    return Some(HealthAction::Reconnect(ReconnectReason::LowBuffer));
                }
                debug!(ahead_ms = ahead.as_millis() as u64, "Buffer ahead below minimum");
            } else {
                self.low_buffer_since = None;
            }
        }

        // 5. Stalled despite buffer (latched): position frozen between
        // ticks while the sink claims it is ready and unpaused.
        let frozen = self.last_position == Some(snap.position);
        self.last_position = Some(snap.position);
        if frozen && snap.ready && !snap.paused {
            let since = *self.stall_since.get_or_insert(now);
            if now.duration_since(since) >= self.stall_grace {
                return Some(HealthAction::Reconnect(ReconnectReason::Stalled));
            }
        } else {
            self.stall_since = None;
        }

        None
    }
}
