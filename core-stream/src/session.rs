//! # Stream Session Controller
//!
//! Owns the single live playback attempt. User intent (connect/disconnect)
//! enters here; the transport, sink, watchdog, metadata sync, and
//! reconnection ladder are driven by one session task per generation.
//!
//! ## Generations
//!
//! Starting a session bumps a generation counter and hands the new task a
//! fresh `CancellationToken`. Teardown cancels the token; every loop in the
//! task re-checks that its generation is still current before mutating
//! state, so a stale backoff sleep or a stale completion from a torn-down
//! session can never touch a newer one. The session driver is the only code
//! path that replaces the transport or the sink.

use crate::buffer::{AudioChunk, BufferQueue};
use crate::config::StreamConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, FlowTracker};
use crate::error::{Result, StreamError};
use crate::events::{PlayerEvent, PlayerEventBus};
use crate::health::{HealthAction, HealthMonitor, HealthSnapshot, ReconnectReason};
use crate::reconnect::{ReconnectDecision, ReconnectionScheduler};
use crate::sink::{
    buffered::BufferedAppendSink, decoded::DecodeScheduleSink, progressive::ProgressiveSink,
    select_strategy, PlaybackSink, SinkProbe, SinkStrategy,
};
use crate::track_info::{fetch_now_playing, TrackChange, TrackInfoSync, TrackMetadata};
use bridge_traits::http::HttpClient;
use bridge_traits::media::MediaBridge;
use bridge_traits::socket::SocketConnector;
use core_runtime::events::Receiver;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Escalation window for repeated sink rebuilds: a second rebuild requested
/// this soon after the previous one becomes a full reconnect instead.
const SINK_REBUILD_ESCALATION_WINDOW: Duration = Duration::from_secs(10);

// ============================================================================
// Session Status
// ============================================================================

/// Lifecycle of the single live session.
///
/// Transitions run strictly forward except `Reconnecting → Connecting` (the
/// retry loop), any state `→ Failed` (terminal until a new connect intent),
/// and any state `→ Idle` (explicit disconnect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Buffering,
    Playing,
    Reconnecting,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Buffering => write!(f, "buffering"),
            SessionStatus::Playing => write!(f, "playing"),
            SessionStatus::Reconnecting => write!(f, "reconnecting"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// Dependencies
// ============================================================================

/// Bridge handles the controller needs from the host.
pub struct StreamDependencies {
    pub http: Arc<dyn HttpClient>,
    pub connector: Arc<dyn SocketConnector>,
    pub media: Arc<dyn MediaBridge>,
}

impl StreamDependencies {
    pub fn new(
        http: Arc<dyn HttpClient>,
        connector: Arc<dyn SocketConnector>,
        media: Arc<dyn MediaBridge>,
    ) -> Self {
        Self {
            http,
            connector,
            media,
        }
    }
}

// ============================================================================
// Session State
// ============================================================================

struct SessionState {
    status: SessionStatus,
    strategy: SinkStrategy,
    desired_playing: bool,
    reconnect_pending: bool,
    last_metadata_at: Option<Instant>,
    last_error_at: Option<Instant>,
    last_sink_rebuild_at: Option<Instant>,
    queue: Arc<BufferQueue>,
    flow: Arc<FlowTracker>,
    sink: Option<Arc<dyn PlaybackSink>>,
    connection: Option<Arc<ConnectionManager>>,
    scheduler: ReconnectionScheduler,
    monitor: HealthMonitor,
    track_sync: TrackInfoSync,
    /// Chunks drained from the previous sink, waiting to seed the next one.
    pending_carry: Vec<AudioChunk>,
    cancel: CancellationToken,
}

impl SessionState {
    fn fresh(config: &StreamConfig) -> Self {
        Self {
            status: SessionStatus::Idle,
            strategy: SinkStrategy::Buffered,
            desired_playing: false,
            reconnect_pending: false,
            last_metadata_at: None,
            last_error_at: None,
            last_sink_rebuild_at: None,
            queue: Arc::new(BufferQueue::new(
                config.bytes_per_second,
                config.queue_soft_limit,
            )),
            flow: Arc::new(FlowTracker::default()),
            sink: None,
            connection: None,
            scheduler: ReconnectionScheduler::new(config.reconnect.clone()),
            monitor: HealthMonitor::new(config),
            track_sync: TrackInfoSync::new(config.track_change_debounce),
            pending_carry: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Why the per-connection drive loop returned.
enum DriveOutcome {
    /// Cancelled or superseded; the session task ends.
    Stopped,
    /// The connection or sink failed; run the backoff ladder.
    Failure(String),
    /// A debounced track change asked for a clean sink/session reset.
    TrackReset,
}

struct Established {
    events: mpsc::Receiver<ConnectionEvent>,
    conn_cancel: CancellationToken,
    /// Keeps the event channel open for strategies without a receive loop.
    _events_tx: Option<mpsc::Sender<ConnectionEvent>>,
}

// ============================================================================
// Controller
// ============================================================================

struct Inner {
    deps: StreamDependencies,
    config: StreamConfig,
    events: PlayerEventBus,
    generation: AtomicU64,
    state: Mutex<SessionState>,
}

/// The playback controller owning the one live [`SessionStatus`] session.
#[derive(Clone)]
pub struct StreamController {
    inner: Arc<Inner>,
}

impl StreamController {
    /// Create a controller.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`] when the configuration is invalid.
    pub fn new(deps: StreamDependencies, config: StreamConfig) -> Result<Self> {
        config.validate().map_err(StreamError::Config)?;
        let state = SessionState::fresh(&config);
        Ok(Self {
            inner: Arc::new(Inner {
                deps,
                config,
                events: PlayerEventBus::with_default_capacity(),
                generation: AtomicU64::new(0),
                state: Mutex::new(state),
            }),
        })
    }

    /// Subscribe to player events (status display, track rendering).
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().status
    }

    pub fn strategy(&self) -> SinkStrategy {
        self.inner.state.lock().strategy
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().scheduler.attempts()
    }

    pub fn current_track(&self) -> Option<TrackMetadata> {
        self.inner.state.lock().track_sync.current().cloned()
    }

    /// Connect intent: start a new session, tearing down any previous one.
    /// No two sessions ever hold the transport concurrently.
    pub async fn connect(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let st = self.inner.state.lock();
            st.cancel.cancel();
        }
        Inner::teardown_handles(&self.inner).await;

        {
            let mut st = self.inner.state.lock();
            *st = SessionState::fresh(&self.inner.config);
            st.desired_playing = true;
            st.strategy = select_strategy(&self.inner.deps.media.capabilities());
            info!(strategy = %st.strategy, generation, "Starting stream session");
        }
        Inner::set_status(
            &self.inner,
            SessionStatus::Connecting,
            Some(("Connecting to stream...", false, false)),
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            Inner::run_session(inner, generation).await;
        });
    }

    /// Disconnect intent: stop the session and release every handle.
    pub async fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut st = self.inner.state.lock();
            st.desired_playing = false;
            st.cancel.cancel();
            st.track_sync.mark_stopped();
        }
        Inner::teardown_handles(&self.inner).await;
        {
            let st = self.inner.state.lock();
            st.queue.clear();
            st.flow.reset();
        }
        Inner::set_status(
            &self.inner,
            SessionStatus::Idle,
            Some(("Disconnected", false, true)),
        );
        info!("Stream session stopped");
    }
}

impl Inner {
    fn is_current(inner: &Arc<Inner>, generation: u64) -> bool {
        inner.generation.load(Ordering::SeqCst) == generation
    }

    fn set_status(
        inner: &Arc<Inner>,
        status: SessionStatus,
        message: Option<(&str, bool, bool)>,
    ) {
        {
            let mut st = inner.state.lock();
            if st.status == status && message.is_none() {
                return;
            }
            st.status = status;
        }
        inner
            .events
            .emit(PlayerEvent::SessionStatusChanged(status))
            .ok();
        if let Some((text, is_error, auto_hide)) = message {
            inner
                .events
                .emit(PlayerEvent::StatusChanged {
                    message: text.to_string(),
                    is_error,
                    auto_hide,
                })
                .ok();
        }
    }

    fn note_error(inner: &Arc<Inner>) {
        inner.state.lock().last_error_at = Some(Instant::now());
    }

    /// Stop and drop the current sink and connection, outside the lock.
    async fn teardown_handles(inner: &Arc<Inner>) {
        let (sink, connection) = {
            let mut st = inner.state.lock();
            (st.sink.take(), st.connection.take())
        };
        if let Some(sink) = sink {
            sink.stop().await;
        }
        if let Some(connection) = connection {
            connection.close().await;
        }
    }

    // ------------------------------------------------------------------
    // Session driver
    // ------------------------------------------------------------------

    async fn run_session(inner: Arc<Inner>, generation: u64) {
        loop {
            if !Self::is_current(&inner, generation) {
                return;
            }

            match Self::establish(&inner, generation).await {
                Ok(established) => {
                    let outcome = Self::drive(&inner, generation, established).await;
                    match outcome {
                        DriveOutcome::Stopped => return,
                        DriveOutcome::Failure(reason) => {
                            if !Self::backoff_or_fail(&inner, generation, &reason).await {
                                return;
                            }
                        }
                        DriveOutcome::TrackReset => {
                            if !Self::prepare_track_reset(&inner, generation).await {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to establish stream session");
                    Self::note_error(&inner);
                    if !Self::backoff_or_fail(&inner, generation, &e.to_string()).await {
                        return;
                    }
                }
            }
        }
    }

    /// Build the sink (and, for push strategies, the connection) for one
    /// attempt. The sink always comes first and is always brand new; media
    /// handles are never reused across attempts.
    async fn establish(inner: &Arc<Inner>, generation: u64) -> Result<Established> {
        let (strategy, queue, flow, cancel, carry) = {
            let mut st = inner.state.lock();
            (
                st.strategy,
                st.queue.clone(),
                st.flow.clone(),
                st.cancel.clone(),
                std::mem::take(&mut st.pending_carry),
            )
        };

        let sink = Self::build_sink(inner, strategy, carry).await?;

        if strategy.uses_push_transport() {
            let connection = match ConnectionManager::open(
                inner.deps.connector.as_ref(),
                &inner.config.stream_socket_url(),
            )
            .await
            {
                Ok(connection) => Arc::new(connection),
                Err(e) => {
                    // The sink owns a fresh media handle; release it before
                    // surfacing the transport failure.
                    sink.stop().await;
                    return Err(e);
                }
            };

            if !Self::is_current(inner, generation) {
                sink.stop().await;
                connection.close().await;
                return Err(StreamError::Transport("session superseded".into()));
            }

            let (tx, rx) = mpsc::channel(32);
            let conn_cancel = cancel.child_token();
            {
                let mut st = inner.state.lock();
                st.sink = Some(sink);
                st.connection = Some(connection.clone());
            }

            let run_cancel = conn_cancel.clone();
            let timeout = inner.config.initial_data_timeout;
            tokio::spawn(async move {
                connection.run(queue, flow, tx, timeout, run_cancel).await;
            });

            Ok(Established {
                events: rx,
                conn_cancel,
                _events_tx: None,
            })
        } else {
            if !Self::is_current(inner, generation) {
                sink.stop().await;
                return Err(StreamError::Transport("session superseded".into()));
            }

            {
                let mut st = inner.state.lock();
                st.sink = Some(sink);
                st.connection = None;
            }

            // No receive loop; the channel exists so drive() has a uniform
            // shape, and the kept sender stops it from closing immediately.
            let (tx, rx) = mpsc::channel(1);
            Ok(Established {
                events: rx,
                conn_cancel: cancel.child_token(),
                _events_tx: Some(tx),
            })
        }
    }

    async fn build_sink(
        inner: &Arc<Inner>,
        strategy: SinkStrategy,
        carry: Vec<AudioChunk>,
    ) -> Result<Arc<dyn PlaybackSink>> {
        let queue = inner.state.lock().queue.clone();
        let media = &inner.deps.media;

        let sink: Arc<dyn PlaybackSink> = match strategy {
            SinkStrategy::Buffered => {
                let handle = media.create_handle().await.map_err(StreamError::from)?;
                let buffer = media
                    .create_append_buffer(&handle)
                    .await
                    .map_err(StreamError::from)?;
                Arc::new(BufferedAppendSink::new(
                    queue,
                    handle,
                    buffer,
                    &inner.config,
                ))
            }
            SinkStrategy::Decoded => {
                let scheduler = media.create_scheduler().await.map_err(StreamError::from)?;
                DecodeScheduleSink::new(queue, scheduler)
            }
            SinkStrategy::Progressive => {
                let caps = media.capabilities();
                let platform = if caps.platform_tag.is_empty() {
                    inner.config.platform_tag.clone()
                } else {
                    caps.platform_tag
                };
                let resume = inner.state.lock().track_sync.resume_position_seconds();
                let nonce: u32 = rand::rng().random();
                let url = inner.config.direct_stream_url(resume, &platform, nonce);
                let handle = media.create_handle().await.map_err(StreamError::from)?;
                Arc::new(ProgressiveSink::new(handle, url))
            }
        };

        sink.start(carry).await?;
        Ok(sink)
    }

    /// Per-connection event loop: connection events, watchdog ticks, and
    /// the metadata poll. Returns when the connection or session ends.
    async fn drive(
        inner: &Arc<Inner>,
        generation: u64,
        mut established: Established,
    ) -> DriveOutcome {
        let cancel = inner.state.lock().cancel.clone();
        let mut flow_confirmed = false;

        let mut health_tick = tokio::time::interval(inner.config.health_tick_period);
        health_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut metadata_tick = tokio::time::interval(inner.config.metadata_refresh_interval);
        metadata_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let outcome = loop {
            if !Self::is_current(inner, generation) {
                break DriveOutcome::Stopped;
            }

            tokio::select! {
                _ = cancel.cancelled() => break DriveOutcome::Stopped,

                event = established.events.recv() => {
                    let Some(event) = event else {
                        break DriveOutcome::Failure("connection task ended".into());
                    };
                    if let Some(outcome) =
                        Self::handle_connection_event(inner, event, &mut flow_confirmed).await
                    {
                        break outcome;
                    }
                }

                _ = health_tick.tick() => {
                    if let Some(outcome) = Self::handle_health_tick(inner).await {
                        break outcome;
                    }
                }

                _ = metadata_tick.tick() => {
                    if let Some(outcome) = Self::poll_metadata(inner).await {
                        break outcome;
                    }
                }
            }
        };

        established.conn_cancel.cancel();
        outcome
    }

    async fn handle_connection_event(
        inner: &Arc<Inner>,
        event: ConnectionEvent,
        flow_confirmed: &mut bool,
    ) -> Option<DriveOutcome> {
        match event {
            ConnectionEvent::ChunkArrived => {
                if !*flow_confirmed {
                    *flow_confirmed = true;
                    Self::mark_flow_confirmed(inner);
                }
                let sink = inner.state.lock().sink.clone();
                if let Some(sink) = sink {
                    if let Err(e) = sink.feed().await {
                        return Self::handle_sink_error(inner, e).await;
                    }
                }
                None
            }
            ConnectionEvent::Metadata(metadata) => {
                Self::apply_metadata(inner, metadata, Instant::now())
            }
            ConnectionEvent::TrackBoundary(marker) => {
                debug!(?marker, "Track boundary received");
                let connection = inner.state.lock().connection.clone();
                if let Some(connection) = connection {
                    if let Err(e) = connection.request_now_playing().await {
                        debug!(error = %e, "Metadata refresh after boundary failed");
                    }
                }
                None
            }
            ConnectionEvent::InitialSilence => {
                // An opened transport with zero chunks counts as a failed
                // attempt.
                warn!("No data within the initial silence window");
                Self::note_error(inner);
                Some(DriveOutcome::Failure("no data after connect".into()))
            }
            ConnectionEvent::Closed { reason } => {
                let desired = inner.state.lock().desired_playing;
                if !desired {
                    return Some(DriveOutcome::Stopped);
                }
                Self::note_error(inner);
                // Fixed short delay so a flapping link does not become a
                // reconnect storm.
                let cancel = inner.state.lock().cancel.clone();
                let delay = inner.config.close_reconnect_delay;
                tokio::select! {
                    _ = cancel.cancelled() => return Some(DriveOutcome::Stopped),
                    _ = tokio::time::sleep(delay) => {}
                }
                Some(DriveOutcome::Failure(
                    reason.unwrap_or_else(|| "transport closed".into()),
                ))
            }
        }
    }

    /// First chunk of a connection: the only event that resets the backoff
    /// ladder.
    fn mark_flow_confirmed(inner: &Arc<Inner>) {
        let status = {
            let mut st = inner.state.lock();
            st.reconnect_pending = false;
            st.scheduler.mark_recovered();
            st.monitor.reset();
            st.status
        };
        if status != SessionStatus::Playing {
            Self::set_status(
                inner,
                SessionStatus::Buffering,
                Some(("Buffering...", false, false)),
            );
        }
    }

    async fn handle_sink_error(
        inner: &Arc<Inner>,
        error: StreamError,
    ) -> Option<DriveOutcome> {
        Self::note_error(inner);
        match error {
            StreamError::SinkRebuildRequired => {
                let escalate = {
                    let mut st = inner.state.lock();
                    let now = Instant::now();
                    let escalate = st
                        .last_sink_rebuild_at
                        .map(|at| now.duration_since(at) < SINK_REBUILD_ESCALATION_WINDOW)
                        .unwrap_or(false);
                    st.last_sink_rebuild_at = Some(now);
                    escalate
                };
                if escalate {
                    warn!("Repeated sink rebuilds; escalating to reconnect");
                    return Some(DriveOutcome::Failure("repeated sink rebuilds".into()));
                }
                match Self::rebuild_sink(inner).await {
                    Ok(()) => None,
                    Err(e) => Some(DriveOutcome::Failure(e.to_string())),
                }
            }
            StreamError::Decode(msg) => {
                // Unit already dropped by the sink; keep playing.
                warn!(error = %msg, "Decode failure");
                None
            }
            other => Some(DriveOutcome::Failure(other.to_string())),
        }
    }

    /// Tear down only the sink and recreate it with a bounded carry-over of
    /// the most recent unconsumed chunks. The transport stays up.
    async fn rebuild_sink(inner: &Arc<Inner>) -> Result<()> {
        let (strategy, queue, old_sink) = {
            let mut st = inner.state.lock();
            (st.strategy, st.queue.clone(), st.sink.take())
        };
        if let Some(sink) = old_sink {
            sink.stop().await;
        }

        let carry = if strategy.benefits_from_carry_over() {
            queue.drain_tail(inner.config.carry_over_chunks)
        } else {
            queue.clear();
            Vec::new()
        };
        info!(
            carried = carry.len(),
            "Rebuilding playback sink with carried-over chunks"
        );

        let sink = Self::build_sink(inner, strategy, carry).await?;
        inner.state.lock().sink = Some(sink);
        Ok(())
    }

    async fn handle_health_tick(inner: &Arc<Inner>) -> Option<DriveOutcome> {
        let now = Instant::now();
        let (sink, connection, strategy) = {
            let st = inner.state.lock();
            (st.sink.clone(), st.connection.clone(), st.strategy)
        };
        let probe = match &sink {
            Some(sink) => sink.probe().await,
            None => SinkProbe::idle(),
        };

        Self::note_progress(inner, &probe, strategy, now);

        let action = {
            let mut st = inner.state.lock();
            let snapshot = HealthSnapshot {
                desired_playing: st.desired_playing,
                reconnect_pending: st.reconnect_pending,
                // The pull transport delivers no frames; chunk-silence
                // detection only applies to push strategies.
                last_chunk_at: if strategy.uses_push_transport() {
                    st.flow.last_chunk_at()
                } else {
                    None
                },
                last_metadata_at: st.last_metadata_at,
                last_error_at: st.last_error_at,
                buffer_ahead: probe.buffered_ahead,
                queue_depth: st.queue.depth(),
                queue_over_soft_limit: st.queue.over_soft_limit(),
                position: probe.position,
                paused: probe.paused,
                ready: probe.ready,
            };
            st.monitor.evaluate(&snapshot, now)
        };

        match action? {
            HealthAction::RefreshMetadata => {
                debug!("Metadata stale; refreshing");
                match connection {
                    Some(connection) => {
                        if let Err(e) = connection.request_now_playing().await {
                            debug!(error = %e, "Metadata refresh over socket failed");
                        }
                        None
                    }
                    None => Self::poll_metadata(inner).await,
                }
            }
            HealthAction::SendPing => {
                if let Some(connection) = connection {
                    if let Err(e) = connection.send_ping().await {
                        Self::note_error(inner);
                        return Some(DriveOutcome::Failure(e.to_string()));
                    }
                }
                None
            }
            HealthAction::Reconnect(reason) => {
                warn!(%reason, "Watchdog requested reconnect");
                Self::note_error(inner);
                let error = match reason {
                    ReconnectReason::NoData | ReconnectReason::LowBuffer => {
                        StreamError::Starvation(reason.to_string())
                    }
                    ReconnectReason::UnexpectedPause | ReconnectReason::Stalled => {
                        StreamError::Media(reason.to_string())
                    }
                };
                Some(DriveOutcome::Failure(error.to_string()))
            }
        }
    }

    /// Status bookkeeping derived from the probe: Buffering → Playing once
    /// the position moves, and progressive-strategy recovery confirmation.
    fn note_progress(
        inner: &Arc<Inner>,
        probe: &SinkProbe,
        strategy: SinkStrategy,
        now: Instant,
    ) {
        let advanced = probe.position > Duration::ZERO;
        let became_playing = {
            let mut st = inner.state.lock();
            if advanced && !strategy.uses_push_transport() && st.reconnect_pending {
                // The pull transport has no frames; an advancing position is
                // its data-flow confirmation.
                st.reconnect_pending = false;
                st.scheduler.mark_recovered();
                st.monitor.reset();
            }
            if st.status == SessionStatus::Buffering && advanced && !probe.paused {
                st.track_sync.mark_playing(now);
                true
            } else if advanced
                && !strategy.uses_push_transport()
                && matches!(
                    st.status,
                    SessionStatus::Connecting | SessionStatus::Reconnecting
                )
            {
                st.track_sync.mark_playing(now);
                true
            } else {
                false
            }
        };
        if became_playing {
            Self::set_status(inner, SessionStatus::Playing, Some(("Playing", false, true)));
        }
    }

    /// Poll the now-playing endpoint. The fixed-interval poll is the
    /// fallback metadata path; push-delivered metadata is opportunistic.
    async fn poll_metadata(inner: &Arc<Inner>) -> Option<DriveOutcome> {
        if !inner.state.lock().desired_playing {
            return None;
        }
        let url = inner.config.now_playing_url();
        match fetch_now_playing(inner.deps.http.as_ref(), &url).await {
            Ok(Some(metadata)) => Self::apply_metadata(inner, metadata, Instant::now()),
            Ok(None) => None,
            Err(e) => {
                // Metadata failures never interrupt audio.
                debug!(error = %e, "Now-playing poll failed");
                None
            }
        }
    }

    /// Single entry point for metadata from both the poll and push paths.
    fn apply_metadata(
        inner: &Arc<Inner>,
        metadata: TrackMetadata,
        now: Instant,
    ) -> Option<DriveOutcome> {
        let change = {
            let mut st = inner.state.lock();
            st.last_metadata_at = Some(now);
            st.track_sync.observe(metadata.clone(), now)
        };
        inner.events.emit(PlayerEvent::TrackChanged(metadata)).ok();

        match change {
            TrackChange::Unchanged | TrackChange::MetadataOnly => None,
            TrackChange::ResetSink => {
                info!("Track changed; resetting sink for a clean start");
                Some(DriveOutcome::TrackReset)
            }
        }
    }

    /// Clean teardown before re-establishing on a confirmed track change.
    /// Not a failure: the backoff ladder is untouched.
    async fn prepare_track_reset(inner: &Arc<Inner>, generation: u64) -> bool {
        Self::teardown_handles(inner).await;
        {
            let mut st = inner.state.lock();
            st.queue.clear();
            st.flow.reset();
            st.monitor.reset();
            st.track_sync.mark_stopped();
            st.pending_carry.clear();
        }
        Self::set_status(
            inner,
            SessionStatus::Connecting,
            Some(("Loading new track...", false, false)),
        );
        Self::is_current(inner, generation)
    }

    /// Run one rung of the backoff ladder. Returns `false` when the session
    /// is over (terminal failure, disconnect, or superseded).
    async fn backoff_or_fail(inner: &Arc<Inner>, generation: u64, reason: &str) -> bool {
        let decision = {
            let mut st = inner.state.lock();
            if !st.desired_playing {
                return false;
            }
            st.reconnect_pending = true;
            st.scheduler.next_attempt()
        };

        match decision {
            ReconnectDecision::GiveUp => {
                let attempts = inner.state.lock().scheduler.max_attempts();
                warn!(attempts, reason, "Reconnect attempts exhausted");
                Self::teardown_handles(inner).await;
                {
                    let mut st = inner.state.lock();
                    st.queue.clear();
                    st.track_sync.mark_stopped();
                }
                Self::set_status(inner, SessionStatus::Failed, None);
                inner
                    .events
                    .emit(PlayerEvent::StatusChanged {
                        message: format!(
                            "Stream failed after {} attempts - press play to retry",
                            attempts
                        ),
                        is_error: true,
                        auto_hide: false,
                    })
                    .ok();
                false
            }
            ReconnectDecision::Retry {
                attempt,
                delay,
                downgrade,
            } => {
                let max = inner.state.lock().scheduler.max_attempts();
                info!(attempt, max, delay_ms = delay.as_millis() as u64, reason,
                    "Scheduling reconnect");
                Self::set_status(inner, SessionStatus::Reconnecting, None);
                inner
                    .events
                    .emit(PlayerEvent::StatusChanged {
                        message: format!("Reconnecting ({}/{})", attempt, max),
                        is_error: false,
                        auto_hide: false,
                    })
                    .ok();

                let cancel = inner.state.lock().cancel.clone();
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep(delay) => {}
                }
                if !Self::is_current(inner, generation) {
                    return false;
                }

                // Close the old transport and sink before building new ones;
                // the old media element is never reused.
                Self::teardown_handles(inner).await;

                {
                    let mut st = inner.state.lock();
                    st.flow.reset();
                    st.monitor.reset();
                    st.track_sync.mark_stopped();

                    if downgrade && st.strategy.uses_push_transport() {
                        info!(from = %st.strategy, "Downgrading to progressive strategy");
                        st.strategy = SinkStrategy::Progressive;
                    }

                    st.pending_carry = if st.strategy.benefits_from_carry_over()
                        && inner.config.carry_over_chunks > 0
                    {
                        st.queue.drain_tail(inner.config.carry_over_chunks)
                    } else {
                        st.queue.clear();
                        Vec::new()
                    };
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_status_display() {
        assert_eq!(SessionStatus::Idle.to_string(), "idle");
        assert_eq!(SessionStatus::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn fresh_state_is_idle() {
        let state = SessionState::fresh(&StreamConfig::default());
        assert_eq!(state.status, SessionStatus::Idle);
        assert!(!state.desired_playing);
        assert!(!state.reconnect_pending);
        assert!(state.sink.is_none());
        assert!(state.connection.is_none());
        assert_eq!(state.scheduler.attempts(), 0);
    }
}
