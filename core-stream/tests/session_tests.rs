//! End-to-end session tests over fake bridges: a scripted socket connector,
//! an in-memory media surface, and a canned now-playing endpoint. Time is
//! paused, so backoff delays and watchdog ticks run in virtual time.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::media::{
    AppendBuffer, ChunkScheduler, DecodedUnit, MediaBridge, MediaCapabilities, MediaHandle,
};
use bridge_traits::socket::{SocketConnector, SocketFrame, StreamSocket};
use bytes::Bytes;
use core_stream::{
    PlayerEvent, ReconnectPolicy, SessionStatus, SinkStrategy, StreamConfig, StreamController,
    StreamDependencies,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Fake HTTP (now-playing endpoint)
// ============================================================================

struct FakeHttp {
    body: Mutex<String>,
    requests: AtomicU32,
}

impl FakeHttp {
    fn new(track_path: &str) -> Self {
        Self {
            body: Mutex::new(format!(
                r#"{{"path":"{}","title":"Test Track","artist":"Test Artist",
                    "duration":240.0,"playback_position":31.5,"active_listeners":2}}"#,
                track_path
            )),
            requests: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: Bytes::from(self.body.lock().clone()),
        })
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        _policy: RetryPolicy,
    ) -> BridgeResult<HttpResponse> {
        self.execute(request).await
    }
}

// ============================================================================
// Fake socket transport
// ============================================================================

struct FakeSocket {
    frames: tokio::sync::Mutex<mpsc::Receiver<SocketFrame>>,
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
}

#[async_trait]
impl StreamSocket for FakeSocket {
    async fn recv(&self) -> BridgeResult<SocketFrame> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(SocketFrame::Closed { reason: None });
        }
        let mut rx = self.frames.lock().await;
        match rx.recv().await {
            Some(frame) => Ok(frame),
            None => Ok(SocketFrame::Closed { reason: None }),
        }
    }

    async fn send_text(&self, payload: &str) -> BridgeResult<()> {
        self.sent.lock().push(payload.to_string());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out channel-fed sockets. Scripted behaviors run first;
/// once the script is exhausted every further connect succeeds.
struct FakeConnector {
    fail_first: AtomicU32,
    connects: AtomicU32,
    feeders: Mutex<Vec<mpsc::Sender<SocketFrame>>>,
}

impl FakeConnector {
    fn new() -> Self {
        Self {
            fail_first: AtomicU32::new(0),
            connects: AtomicU32::new(0),
            feeders: Mutex::new(Vec::new()),
        }
    }

    fn fail_next_connects(&self, n: u32) {
        self.fail_first.store(n, Ordering::SeqCst);
    }

    fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Sender feeding frames into the most recently opened socket.
    fn latest_feeder(&self) -> Option<mpsc::Sender<SocketFrame>> {
        self.feeders.lock().last().cloned()
    }
}

#[async_trait]
impl SocketConnector for FakeConnector {
    async fn connect(&self, _url: &str) -> BridgeResult<Box<dyn StreamSocket>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_first.load(Ordering::SeqCst) > 0 {
            self.fail_first.fetch_sub(1, Ordering::SeqCst);
            return Err(BridgeError::OperationFailed("connection refused".into()));
        }
        let (tx, rx) = mpsc::channel(256);
        self.feeders.lock().push(tx);
        Ok(Box::new(FakeSocket {
            frames: tokio::sync::Mutex::new(rx),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

// ============================================================================
// Fake media surface
// ============================================================================

struct FakeHandle {
    playing: AtomicBool,
    released: AtomicBool,
    position_ms: AtomicU64,
}

impl FakeHandle {
    fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            released: AtomicBool::new(false),
            position_ms: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl MediaHandle for FakeHandle {
    async fn play(&self) -> BridgeResult<()> {
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn pause(&self) -> BridgeResult<()> {
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }
    async fn set_source(&self, _url: &str) -> BridgeResult<()> {
        Ok(())
    }
    async fn position(&self) -> Duration {
        // A playing element progresses a little every observation.
        if self.playing.load(Ordering::SeqCst) {
            let ms = self.position_ms.fetch_add(250, Ordering::SeqCst) + 250;
            Duration::from_millis(ms)
        } else {
            Duration::from_millis(self.position_ms.load(Ordering::SeqCst))
        }
    }
    async fn is_paused(&self) -> bool {
        !self.playing.load(Ordering::SeqCst)
    }
    async fn is_ready(&self) -> bool {
        true
    }
    async fn take_error(&self) -> Option<String> {
        None
    }
    async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

struct FakeBuffer {
    appends: AtomicU64,
}

#[async_trait]
impl AppendBuffer for FakeBuffer {
    async fn append(&self, _data: Bytes) -> BridgeResult<()> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn remove(&self, _from: Duration, _to: Duration) -> BridgeResult<()> {
        Ok(())
    }
    async fn buffered_range(&self) -> Option<(Duration, Duration)> {
        let appends = self.appends.load(Ordering::SeqCst);
        if appends == 0 {
            None
        } else {
            Some((Duration::ZERO, Duration::from_secs(appends)))
        }
    }
}

struct FakeScheduler {
    next_id: AtomicU64,
}

#[async_trait]
impl ChunkScheduler for FakeScheduler {
    async fn decode(&self, _data: Bytes) -> BridgeResult<DecodedUnit> {
        Ok(DecodedUnit {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            duration: Duration::from_millis(500),
        })
    }
    async fn play_through(&self, _unit: DecodedUnit) -> BridgeResult<()> {
        Ok(())
    }
    async fn position(&self) -> Duration {
        Duration::from_millis(self.next_id.load(Ordering::SeqCst) * 500)
    }
    async fn stop(&self) {}
}

struct FakeMedia {
    caps: Mutex<MediaCapabilities>,
    handles: Mutex<Vec<Arc<FakeHandle>>>,
}

impl FakeMedia {
    fn new(caps: MediaCapabilities) -> Self {
        Self {
            caps: Mutex::new(caps),
            handles: Mutex::new(Vec::new()),
        }
    }

    fn handles_created(&self) -> usize {
        self.handles.lock().len()
    }
}

#[async_trait]
impl MediaBridge for FakeMedia {
    fn capabilities(&self) -> MediaCapabilities {
        self.caps.lock().clone()
    }

    async fn create_handle(&self) -> BridgeResult<Arc<dyn MediaHandle>> {
        let handle = Arc::new(FakeHandle::new());
        self.handles.lock().push(handle.clone());
        Ok(handle)
    }

    async fn create_append_buffer(
        &self,
        _handle: &Arc<dyn MediaHandle>,
    ) -> BridgeResult<Arc<dyn AppendBuffer>> {
        Ok(Arc::new(FakeBuffer {
            appends: AtomicU64::new(0),
        }))
    }

    async fn create_scheduler(&self) -> BridgeResult<Arc<dyn ChunkScheduler>> {
        Ok(Arc::new(FakeScheduler {
            next_id: AtomicU64::new(0),
        }))
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    controller: StreamController,
    connector: Arc<FakeConnector>,
    media: Arc<FakeMedia>,
    http: Arc<FakeHttp>,
    events: core_runtime::events::Receiver<PlayerEvent>,
}

fn test_config() -> StreamConfig {
    let mut config = StreamConfig::default();
    config.min_start_chunks = 2;
    // High enough that the chunk-count condition always decides.
    config.min_start_duration = Duration::from_secs(60);
    config.close_reconnect_delay = Duration::from_secs(1);
    config.reconnect = ReconnectPolicy {
        base_delay: Duration::from_millis(200),
        backoff_factor: 2.0,
        max_delay: Duration::from_secs(5),
        jitter: Duration::from_millis(50),
        max_attempts: 3,
        downgrade_after: 3,
    };
    config
}

fn harness(caps: MediaCapabilities, config: StreamConfig) -> Harness {
    let connector = Arc::new(FakeConnector::new());
    let media = Arc::new(FakeMedia::new(caps));
    let http = Arc::new(FakeHttp::new("/music/initial.flac"));

    let deps = StreamDependencies::new(http.clone(), connector.clone(), media.clone());
    let controller = StreamController::new(deps, config).unwrap();
    let events = controller.subscribe();

    Harness {
        controller,
        connector,
        media,
        http,
        events,
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..600 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn feed_audio(connector: &FakeConnector, count: usize) {
    let feeder = connector.latest_feeder().expect("no open socket");
    for _ in 0..count {
        feeder
            .send(SocketFrame::Binary(Bytes::from(vec![0x5A; 800])))
            .await
            .unwrap();
    }
}

fn drain_events(rx: &mut core_runtime::events::Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn session_reaches_playing_over_push_transport() {
    let mut h = harness(MediaCapabilities::full("native"), test_config());

    h.controller.connect().await;
    assert_eq!(h.controller.strategy(), SinkStrategy::Buffered);

    let connector = h.connector.clone();
    wait_for("socket open", || connector.connects() == 1).await;

    feed_audio(&h.connector, 4).await;
    let controller = h.controller.clone();
    wait_for("playing", || controller.status() == SessionStatus::Playing).await;

    // Status walked Connecting -> Buffering -> Playing.
    let events = drain_events(&mut h.events);
    let statuses: Vec<SessionStatus> = events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::SessionStatusChanged(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            SessionStatus::Connecting,
            SessionStatus::Buffering,
            SessionStatus::Playing
        ]
    );

    // The metadata poll rendered the current track.
    assert!(events
        .iter()
        .any(|e| matches!(e, PlayerEvent::TrackChanged(m) if m.id == "/music/initial.flac")));
    assert!(h.http.requests.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(start_paused = true)]
async fn transport_close_triggers_exactly_one_reconnect() {
    let mut h = harness(MediaCapabilities::full("native"), test_config());

    h.controller.connect().await;
    let connector = h.connector.clone();
    wait_for("socket open", || connector.connects() == 1).await;
    feed_audio(&h.connector, 4).await;
    let controller = h.controller.clone();
    wait_for("playing", || controller.status() == SessionStatus::Playing).await;

    // Server closes the transport.
    let feeder = h.connector.latest_feeder().unwrap();
    feeder
        .send(SocketFrame::Closed {
            reason: Some("server restart".into()),
        })
        .await
        .unwrap();

    wait_for("reconnect", || connector.connects() == 2).await;

    // Resume data flow on the new connection: the ladder resets.
    feed_audio(&h.connector, 4).await;
    wait_for("playing again", || {
        controller.status() == SessionStatus::Playing
    })
    .await;
    assert_eq!(h.controller.reconnect_attempts(), 0);

    // A healthy stream stays on one connection: no reconnect storm.
    feed_audio(&h.connector, 2).await;
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(h.connector.connects(), 2);

    let events = drain_events(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        PlayerEvent::StatusChanged { message, .. } if message.starts_with("Reconnecting (1/")
    )));
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_fail_terminally() {
    let config = test_config();
    let h = harness(MediaCapabilities::full("native"), config);
    h.connector.fail_next_connects(u32::MAX);

    h.controller.connect().await;
    let controller = h.controller.clone();
    wait_for("terminal failure", || {
        controller.status() == SessionStatus::Failed
    })
    .await;

    // Initial attempt plus exactly max_attempts retries, then nothing.
    assert_eq!(h.connector.connects(), 4);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.connects(), 4);
}

#[tokio::test(start_paused = true)]
async fn terminal_failure_surfaces_error_status() {
    let mut h = harness(MediaCapabilities::full("native"), test_config());
    h.connector.fail_next_connects(u32::MAX);

    h.controller.connect().await;
    let controller = h.controller.clone();
    wait_for("terminal failure", || {
        controller.status() == SessionStatus::Failed
    })
    .await;

    let events = drain_events(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        PlayerEvent::StatusChanged { message, is_error: true, auto_hide: false }
            if message.contains("failed after 3 attempts")
    )));
}

#[tokio::test(start_paused = true)]
async fn repeated_push_failure_downgrades_to_progressive() {
    let mut config = test_config();
    config.reconnect.max_attempts = 6;
    config.reconnect.downgrade_after = 2;
    let h = harness(MediaCapabilities::full("native"), config);
    h.connector.fail_next_connects(u32::MAX);

    h.controller.connect().await;
    let controller = h.controller.clone();
    wait_for("progressive playback", || {
        controller.status() == SessionStatus::Playing
    })
    .await;

    assert_eq!(h.controller.strategy(), SinkStrategy::Progressive);
    // Push connects stopped once the strategy downgraded.
    assert_eq!(h.connector.connects(), 2);
    // Recovery on the pull path reset the ladder.
    assert_eq!(h.controller.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn restricted_platform_starts_progressive() {
    let mut caps = MediaCapabilities::full("webview");
    caps.autoplay_allowed = false;
    let h = harness(caps, test_config());

    h.controller.connect().await;
    let controller = h.controller.clone();
    wait_for("progressive playback", || {
        controller.status() == SessionStatus::Playing
    })
    .await;

    assert_eq!(h.controller.strategy(), SinkStrategy::Progressive);
    // The push transport was never touched.
    assert_eq!(h.connector.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_releases_everything() {
    let h = harness(MediaCapabilities::full("native"), test_config());

    h.controller.connect().await;
    let connector = h.connector.clone();
    wait_for("socket open", || connector.connects() == 1).await;
    feed_audio(&h.connector, 4).await;
    let controller = h.controller.clone();
    wait_for("playing", || controller.status() == SessionStatus::Playing).await;

    h.controller.disconnect().await;
    assert_eq!(h.controller.status(), SessionStatus::Idle);

    // Every created media handle has been released.
    wait_for("handles released", || {
        h.media
            .handles
            .lock()
            .iter()
            .all(|handle| handle.released.load(Ordering::SeqCst))
    })
    .await;

    // No zombie reconnects after disconnect.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn fresh_media_handle_per_connection_attempt() {
    let h = harness(MediaCapabilities::full("native"), test_config());

    h.controller.connect().await;
    let connector = h.connector.clone();
    wait_for("socket open", || connector.connects() == 1).await;
    feed_audio(&h.connector, 4).await;
    let controller = h.controller.clone();
    wait_for("playing", || controller.status() == SessionStatus::Playing).await;
    let after_first = h.media.handles_created();
    assert_eq!(after_first, 1);

    // Kill the transport; the reconnect must build a brand-new element.
    let feeder = h.connector.latest_feeder().unwrap();
    feeder
        .send(SocketFrame::Closed { reason: None })
        .await
        .unwrap();
    wait_for("reconnect", || connector.connects() == 2).await;
    feed_audio(&h.connector, 4).await;
    wait_for("playing again", || {
        controller.status() == SessionStatus::Playing
    })
    .await;

    assert_eq!(h.media.handles_created(), 2);
    // The first handle was released when its session attempt ended.
    assert!(h.media.handles.lock()[0].released.load(Ordering::SeqCst));
}
