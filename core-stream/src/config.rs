//! # Engine Configuration
//!
//! Tuning knobs for buffering, health monitoring, reconnection, and the
//! stream endpoints. All thresholds referenced by the engine live here so a
//! host can reshape behavior without touching component code.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection backoff policy.
///
/// Immutable configuration, not session state; the scheduler holds the
/// mutable attempt counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    #[serde(default = "default_base_delay")]
    pub base_delay: Duration,

    /// Multiplier applied per attempt. Must be >= 1.0.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Upper bound on the exponential part of the delay.
    #[serde(default = "default_max_delay")]
    pub max_delay: Duration,

    /// Uniform random jitter added on top of the bounded delay.
    #[serde(default = "default_jitter")]
    pub jitter: Duration,

    /// Attempts before the session fails terminally.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Attempt count at which push strategies downgrade to the progressive
    /// strategy. Set equal to `max_attempts` to disable downgrading.
    #[serde(default = "default_downgrade_after")]
    pub downgrade_after: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            backoff_factor: default_backoff_factor(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
            max_attempts: default_max_attempts(),
            downgrade_after: default_downgrade_after(),
        }
    }
}

impl ReconnectPolicy {
    /// Validate policy values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be > 0".to_string());
        }
        if self.backoff_factor < 1.0 {
            return Err("backoff_factor must be >= 1.0".to_string());
        }
        if self.base_delay.is_zero() {
            return Err("base_delay must be > 0".to_string());
        }
        if self.max_delay < self.base_delay {
            return Err("max_delay cannot be below base_delay".to_string());
        }
        if self.downgrade_after == 0 {
            return Err("downgrade_after must be > 0".to_string());
        }
        Ok(())
    }
}

/// Streaming engine configuration.
///
/// Controls endpoints, buffer thresholds, watchdog periods, and reconnection
/// behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Base URL of the radio server (scheme + authority).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Platform tag reported on pull-transport requests when the media
    /// bridge does not supply one.
    #[serde(default = "default_platform_tag")]
    pub platform_tag: String,

    // ========================================================================
    // Buffering
    // ========================================================================
    /// Nominal stream rate used to estimate chunk durations before decode.
    #[serde(default = "default_bytes_per_second")]
    pub bytes_per_second: u64,

    /// Queue depth past which the watchdog logs a warning. The queue itself
    /// never drops data.
    #[serde(default = "default_queue_soft_limit")]
    pub queue_soft_limit: usize,

    /// Chunks that must accumulate before deferred playback start.
    #[serde(default = "default_min_start_chunks")]
    pub min_start_chunks: usize,

    /// Buffered duration that also satisfies the deferred-start condition.
    #[serde(default = "default_min_start_duration")]
    pub min_start_duration: Duration,

    /// Maximum span kept in the platform append buffer before trimming.
    #[serde(default = "default_max_buffered_duration")]
    pub max_buffered_duration: Duration,

    /// Already-played span kept behind the play position by periodic trims.
    #[serde(default = "default_trim_keep_behind")]
    pub trim_keep_behind: Duration,

    /// Margin left behind the play position by quota remediation. Smaller
    /// than `trim_keep_behind`: remediation frees as much as it safely can.
    #[serde(default = "default_quota_trim_margin")]
    pub quota_trim_margin: Duration,

    /// Most recent unconsumed chunks replayed into a rebuilt sink.
    /// 0 disables carry-over entirely.
    #[serde(default = "default_carry_over_chunks")]
    pub carry_over_chunks: usize,

    // ========================================================================
    // Connection
    // ========================================================================
    /// Window after transport open within which the first chunk must arrive.
    #[serde(default = "default_initial_data_timeout")]
    pub initial_data_timeout: Duration,

    /// Fixed delay before reacting to a transport close, so a flapping link
    /// does not trigger a reconnect storm.
    #[serde(default = "default_close_reconnect_delay")]
    pub close_reconnect_delay: Duration,

    // ========================================================================
    // Health monitoring
    // ========================================================================
    /// Watchdog tick period.
    #[serde(default = "default_health_tick_period")]
    pub health_tick_period: Duration,

    /// Silence on the push transport after which liveness is questioned.
    #[serde(default = "default_no_data_timeout")]
    pub no_data_timeout: Duration,

    /// Buffer-ahead below which the stream counts as starving.
    #[serde(default = "default_min_buffer_ahead")]
    pub min_buffer_ahead: Duration,

    /// How long buffer-ahead may stay below minimum before reconnecting.
    #[serde(default = "default_low_buffer_grace")]
    pub low_buffer_grace: Duration,

    /// How long the position may stay frozen (while ready and unpaused)
    /// before reconnecting.
    #[serde(default = "default_stall_grace")]
    pub stall_grace: Duration,

    /// Window after a reported error during which an unexpected pause is
    /// attributed to that error rather than treated independently.
    #[serde(default = "default_pause_debounce")]
    pub pause_debounce: Duration,

    // ========================================================================
    // Metadata
    // ========================================================================
    /// Poll interval for now-playing metadata; doubles as the staleness
    /// threshold for push-delivered metadata.
    #[serde(default = "default_metadata_refresh_interval")]
    pub metadata_refresh_interval: Duration,

    /// Minimum stable playback before a track change may reset the sink.
    #[serde(default = "default_track_change_debounce")]
    pub track_change_debounce: Duration,

    // ========================================================================
    // Reconnection
    // ========================================================================
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            platform_tag: default_platform_tag(),
            bytes_per_second: default_bytes_per_second(),
            queue_soft_limit: default_queue_soft_limit(),
            min_start_chunks: default_min_start_chunks(),
            min_start_duration: default_min_start_duration(),
            max_buffered_duration: default_max_buffered_duration(),
            trim_keep_behind: default_trim_keep_behind(),
            quota_trim_margin: default_quota_trim_margin(),
            carry_over_chunks: default_carry_over_chunks(),
            initial_data_timeout: default_initial_data_timeout(),
            close_reconnect_delay: default_close_reconnect_delay(),
            health_tick_period: default_health_tick_period(),
            no_data_timeout: default_no_data_timeout(),
            min_buffer_ahead: default_min_buffer_ahead(),
            low_buffer_grace: default_low_buffer_grace(),
            stall_grace: default_stall_grace(),
            pause_debounce: default_pause_debounce(),
            metadata_refresh_interval: default_metadata_refresh_interval(),
            track_change_debounce: default_track_change_debounce(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl StreamConfig {
    /// Configuration tuned for unstable links: bigger start buffer, longer
    /// graces, more retry attempts.
    pub fn resilient() -> Self {
        Self {
            min_start_chunks: 16,
            min_start_duration: Duration::from_secs(4),
            low_buffer_grace: Duration::from_secs(8),
            no_data_timeout: Duration::from_secs(20),
            reconnect: ReconnectPolicy {
                max_attempts: 12,
                max_delay: Duration::from_secs(60),
                ..ReconnectPolicy::default()
            },
            ..Self::default()
        }
    }

    /// Configuration tuned for fast start on good links.
    pub fn low_latency() -> Self {
        Self {
            min_start_chunks: 3,
            min_start_duration: Duration::from_millis(750),
            health_tick_period: Duration::from_secs(2),
            ..Self::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("base_url must not be empty".to_string());
        }
        if self.bytes_per_second == 0 {
            return Err("bytes_per_second must be > 0".to_string());
        }
        if self.min_start_chunks == 0 {
            return Err("min_start_chunks must be > 0".to_string());
        }
        if self.min_start_duration > self.max_buffered_duration {
            return Err("min_start_duration cannot exceed max_buffered_duration".to_string());
        }
        if self.quota_trim_margin > self.trim_keep_behind {
            return Err("quota_trim_margin cannot exceed trim_keep_behind".to_string());
        }
        if self.health_tick_period.is_zero() {
            return Err("health_tick_period must be > 0".to_string());
        }
        if self.no_data_timeout < self.health_tick_period {
            return Err("no_data_timeout cannot be below health_tick_period".to_string());
        }
        self.reconnect.validate()
    }

    /// URL of the now-playing metadata endpoint.
    pub fn now_playing_url(&self) -> String {
        format!("{}/api/now-playing", self.base_url.trim_end_matches('/'))
    }

    /// URL of the push transport, with the scheme switched to its WebSocket
    /// equivalent.
    pub fn stream_socket_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/stream", ws_base)
    }

    /// URL of the pull transport for the given resume position.
    ///
    /// `nonce` busts intermediary caches; every (re)connection must use a
    /// fresh one.
    pub fn direct_stream_url(&self, position_seconds: u64, platform: &str, nonce: u32) -> String {
        format!(
            "{}/direct-stream?position={}&platform={}&nocache={}",
            self.base_url.trim_end_matches('/'),
            position_seconds,
            platform,
            nonce
        )
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_platform_tag() -> String {
    "native".to_string()
}

fn default_bytes_per_second() -> u64 {
    17_000 // ~136 kbps stream
}

fn default_queue_soft_limit() -> usize {
    500
}

fn default_min_start_chunks() -> usize {
    8
}

fn default_min_start_duration() -> Duration {
    Duration::from_secs(2)
}

fn default_max_buffered_duration() -> Duration {
    Duration::from_secs(60)
}

fn default_trim_keep_behind() -> Duration {
    Duration::from_secs(10)
}

fn default_quota_trim_margin() -> Duration {
    Duration::from_secs(2)
}

fn default_carry_over_chunks() -> usize {
    50
}

fn default_initial_data_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_close_reconnect_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_health_tick_period() -> Duration {
    Duration::from_secs(5)
}

fn default_no_data_timeout() -> Duration {
    Duration::from_secs(12)
}

fn default_min_buffer_ahead() -> Duration {
    Duration::from_secs(1)
}

fn default_low_buffer_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_stall_grace() -> Duration {
    Duration::from_secs(3)
}

fn default_pause_debounce() -> Duration {
    Duration::from_secs(10)
}

fn default_metadata_refresh_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_track_change_debounce() -> Duration {
    Duration::from_secs(30)
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter() -> Duration {
    Duration::from_millis(500)
}

fn default_max_attempts() -> u32 {
    8
}

fn default_downgrade_after() -> u32 {
    4
}
