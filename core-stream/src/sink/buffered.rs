//! # Buffered-Append Sink
//!
//! Drains the shared queue into a platform streaming buffer consumed by the
//! media element. Three invariants rule this file:
//!
//! - at most one append is in flight at a time; an append must complete
//!   before the next is issued,
//! - trimming and appending never overlap; a trim gates the next append,
//! - playback start is deferred until enough audio has accumulated, so the
//!   stream does not restarve immediately.
//!
//! Quota failures are remediated by removing a larger trailing window than
//! periodic trimming would and retrying. When remediation fails twice in a
//! row the sink reports [`StreamError::SinkRebuildRequired`] and the session
//! rebuilds it with a bounded carry-over instead of the full queue.

use crate::buffer::{AudioChunk, BufferQueue};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::sink::{PlaybackSink, SinkProbe, SinkStrategy};
use async_trait::async_trait;
use bridge_traits::error::BridgeError;
use bridge_traits::media::{AppendBuffer, MediaHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct BufferedTuning {
    min_start_chunks: usize,
    min_start_duration: Duration,
    max_buffered_duration: Duration,
    trim_keep_behind: Duration,
    quota_trim_margin: Duration,
}

impl BufferedTuning {
    fn from_config(config: &StreamConfig) -> Self {
        Self {
            min_start_chunks: config.min_start_chunks,
            min_start_duration: config.min_start_duration,
            max_buffered_duration: config.max_buffered_duration,
            trim_keep_behind: config.trim_keep_behind,
            quota_trim_margin: config.quota_trim_margin,
        }
    }
}

#[derive(Default)]
struct BufferedState {
    stopped: bool,
    /// Deferred start has fired and the element is playing.
    playing: bool,
    /// An append or trim is in flight; nothing else may touch the buffer.
    busy: bool,
    appends_completed: usize,
    /// Consecutive failed quota remediations.
    quota_failures: u32,
}

/// Buffered-append playback strategy.
pub struct BufferedAppendSink {
    queue: Arc<BufferQueue>,
    handle: Arc<dyn MediaHandle>,
    buffer: Arc<dyn AppendBuffer>,
    tuning: BufferedTuning,
    state: Mutex<BufferedState>,
}

impl BufferedAppendSink {
    pub fn new(
        queue: Arc<BufferQueue>,
        handle: Arc<dyn MediaHandle>,
        buffer: Arc<dyn AppendBuffer>,
        config: &StreamConfig,
    ) -> Self {
        Self {
            queue,
            handle,
            buffer,
            tuning: BufferedTuning::from_config(config),
            state: Mutex::new(BufferedState::default()),
        }
    }

    /// Claim the buffer for one append/trim cycle. Returns `false` when the
    /// sink is stopped or another cycle is already running.
    fn try_acquire(&self) -> bool {
        let mut st = self.state.lock();
        if st.stopped || st.busy {
            return false;
        }
        st.busy = true;
        true
    }

    fn release(&self) {
        self.state.lock().busy = false;
    }

    /// Append one chunk, remediating quota failures, then run periodic
    /// maintenance. Runs entirely inside the `busy` guard.
    async fn pump_one(&self, chunk: AudioChunk) -> Result<()> {
        match self.buffer.append(chunk.data.clone()).await {
            Ok(()) => {
                self.state.lock().quota_failures = 0;
            }
            Err(BridgeError::QuotaExceeded) => {
                warn!("Platform buffer quota hit; trimming trailing window");
                self.remediate_quota().await?;

                match self.buffer.append(chunk.data.clone()).await {
                    Ok(()) => {
                        self.state.lock().quota_failures = 0;
                    }
                    Err(BridgeError::QuotaExceeded) => {
                        // The chunk stays at the queue head so it is not
                        // lost across the retry or the rebuild.
                        self.queue.push_front(chunk);
                        let failures = {
                            let mut st = self.state.lock();
                            st.quota_failures += 1;
                            st.quota_failures
                        };
                        if failures >= 2 {
                            warn!(failures, "Quota remediation failed twice; sink needs rebuild");
                            return Err(StreamError::SinkRebuildRequired);
                        }
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        }

        self.state.lock().appends_completed += 1;
        self.maybe_trim().await?;
        self.maybe_start().await
    }

    /// Free as much played audio as safely possible: everything up to a
    /// small margin behind the play position.
    async fn remediate_quota(&self) -> Result<()> {
        let Some((start, _end)) = self.buffer.buffered_range().await else {
            return Ok(());
        };
        let position = self.handle.position().await;
        let cut = position.saturating_sub(self.tuning.quota_trim_margin);
        if cut > start {
            self.buffer
                .remove(start, cut)
                .await
                .map_err(StreamError::from)?;
        }
        Ok(())
    }

    /// Periodic trim: once the buffered span exceeds the maximum, drop the
    /// oldest portion while keeping `trim_keep_behind` behind the play
    /// position.
    async fn maybe_trim(&self) -> Result<()> {
        let Some((start, end)) = self.buffer.buffered_range().await else {
            return Ok(());
        };
        if end.saturating_sub(start) <= self.tuning.max_buffered_duration {
            return Ok(());
        }

        let position = self.handle.position().await;
        let cut = position.saturating_sub(self.tuning.trim_keep_behind);
        if cut > start {
            debug!(
                from_ms = start.as_millis() as u64,
                to_ms = cut.as_millis() as u64,
                "Trimming platform buffer"
            );
            self.buffer
                .remove(start, cut)
                .await
                .map_err(StreamError::from)?;
        }
        Ok(())
    }

    /// Fire the deferred playback start once enough audio is buffered.
    async fn maybe_start(&self) -> Result<()> {
        {
            let st = self.state.lock();
            if st.playing || st.stopped {
                return Ok(());
            }
        }

        let buffered = match self.buffer.buffered_range().await {
            Some((start, end)) => end.saturating_sub(start),
            None => Duration::ZERO,
        };
        let appended = self.state.lock().appends_completed;
        if appended < self.tuning.min_start_chunks && buffered < self.tuning.min_start_duration {
            return Ok(());
        }

        self.handle.play().await.map_err(StreamError::from)?;
        self.state.lock().playing = true;
        debug!(
            appended,
            buffered_ms = buffered.as_millis() as u64,
            "Initial buffering complete; playback started"
        );
        Ok(())
    }
}

#[async_trait]
impl PlaybackSink for BufferedAppendSink {
    fn strategy(&self) -> SinkStrategy {
        SinkStrategy::Buffered
    }

    async fn start(&self, initial_chunks: Vec<AudioChunk>) -> Result<()> {
        // Carried-over chunks must precede anything already arriving on the
        // new connection.
        for chunk in initial_chunks.into_iter().rev() {
            self.queue.push_front(chunk);
        }
        self.feed().await
    }

    async fn feed(&self) -> Result<()> {
        loop {
            if !self.try_acquire() {
                return Ok(());
            }
            let Some(chunk) = self.queue.pop() else {
                self.release();
                return Ok(());
            };
            let result = self.pump_one(chunk).await;
            self.release();
            result?;
        }
    }

    async fn stop(&self) {
        {
            let mut st = self.state.lock();
            if st.stopped {
                return;
            }
            st.stopped = true;
        }
        let _ = self.handle.pause().await;
        self.handle.release().await;
    }

    async fn probe(&self) -> SinkProbe {
        let (playing, stopped) = {
            let st = self.state.lock();
            (st.playing, st.stopped)
        };
        if stopped {
            return SinkProbe::idle();
        }

        let position = self.handle.position().await;
        let buffered_ahead = match self.buffer.buffered_range().await {
            Some((_start, end)) => end.saturating_sub(position),
            None => Duration::ZERO,
        };

        SinkProbe {
            position,
            // Before the deferred start the element is legitimately paused
            // and not expected to make progress; neither the pause nor the
            // stall condition applies to it.
            paused: playing && self.handle.is_paused().await,
            ready: playing && self.handle.is_ready().await,
            buffered_ahead: Some(buffered_ahead),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

    // ------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct FakeHandle {
        play_calls: AtomicU32,
        released: AtomicBool,
        paused: AtomicBool,
        position_ms: AtomicU64,
    }

    #[async_trait]
    impl MediaHandle for FakeHandle {
        async fn play(&self) -> bridge_traits::error::Result<()> {
            self.play_calls.fetch_add(1, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn pause(&self) -> bridge_traits::error::Result<()> {
            self.paused.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn set_source(&self, _url: &str) -> bridge_traits::error::Result<()> {
            Ok(())
        }
        async fn position(&self) -> Duration {
            Duration::from_millis(self.position_ms.load(Ordering::SeqCst))
        }
        async fn is_paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
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

    /// Append buffer that records appends and can be scripted to fail with
    /// quota errors. Buffered span grows 1 second per appended chunk.
    #[derive(Default)]
    struct FakeAppendBuffer {
        appended: Mutex<Vec<Bytes>>,
        removed: Mutex<Vec<(Duration, Duration)>>,
        quota_failures_remaining: AtomicU32,
        start_ms: AtomicU64,
        in_flight: AtomicU32,
        overlap_seen: AtomicBool,
    }

    impl FakeAppendBuffer {
        fn fail_next_appends(&self, n: u32) {
            self.quota_failures_remaining.store(n, Ordering::SeqCst);
        }

        fn appended_payloads(&self) -> Vec<Bytes> {
            self.appended.lock().clone()
        }
    }

    #[async_trait]
    impl AppendBuffer for FakeAppendBuffer {
        async fn append(&self, data: Bytes) -> bridge_traits::error::Result<()> {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlap_seen.store(true, Ordering::SeqCst);
            }
            tokio::task::yield_now().await;
            let result = if self.quota_failures_remaining.load(Ordering::SeqCst) > 0 {
                self.quota_failures_remaining.fetch_sub(1, Ordering::SeqCst);
                Err(BridgeError::QuotaExceeded)
            } else {
                self.appended.lock().push(data);
                Ok(())
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn remove(&self, from: Duration, to: Duration) -> bridge_traits::error::Result<()> {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlap_seen.store(true, Ordering::SeqCst);
            }
            tokio::task::yield_now().await;
            self.removed.lock().push((from, to));
            self.start_ms.store(to.as_millis() as u64, Ordering::SeqCst);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn buffered_range(&self) -> Option<(Duration, Duration)> {
            let appended = self.appended.lock().len() as u64;
            if appended == 0 {
                return None;
            }
            let start = Duration::from_millis(self.start_ms.load(Ordering::SeqCst));
            Some((start, Duration::from_secs(appended)))
        }
    }

    fn config() -> StreamConfig {
        let mut config = StreamConfig::default();
        config.min_start_chunks = 3;
        config.min_start_duration = Duration::from_secs(600); // chunk count decides
        config
    }

    fn sink_with(
        config: &StreamConfig,
    ) -> (BufferedAppendSink, Arc<FakeHandle>, Arc<FakeAppendBuffer>) {
        let queue = Arc::new(BufferQueue::new(17_000, 500));
        let handle = Arc::new(FakeHandle::default());
        let buffer = Arc::new(FakeAppendBuffer::default());
        let sink = BufferedAppendSink::new(queue, handle.clone(), buffer.clone(), config);
        (sink, handle, buffer)
    }

    fn chunk(tag: u8) -> AudioChunk {
        AudioChunk::new(Bytes::from(vec![tag; 32]))
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn drains_queue_in_arrival_order() {
        let (sink, _handle, buffer) = sink_with(&config());

        for tag in 0..4u8 {
            sink.queue.push(chunk(tag));
        }
        sink.feed().await.unwrap();

        let appended = buffer.appended_payloads();
        assert_eq!(appended.len(), 4);
        for (i, payload) in appended.iter().enumerate() {
            assert_eq!(payload[0], i as u8);
        }
        assert!(sink.queue.is_empty());
        assert!(!buffer.overlap_seen.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn playback_start_is_deferred_until_enough_chunks() {
        let (sink, handle, _buffer) = sink_with(&config());

        sink.queue.push(chunk(0));
        sink.queue.push(chunk(1));
        sink.feed().await.unwrap();
        assert_eq!(handle.play_calls.load(Ordering::SeqCst), 0);

        sink.queue.push(chunk(2));
        sink.feed().await.unwrap();
        assert_eq!(handle.play_calls.load(Ordering::SeqCst), 1);

        // Already playing: no second start.
        sink.queue.push(chunk(3));
        sink.feed().await.unwrap();
        assert_eq!(handle.play_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn carry_over_chunks_precede_new_arrivals() {
        let (sink, _handle, buffer) = sink_with(&config());

        // A chunk from the new connection is already queued when the
        // rebuilt sink starts with carried-over data.
        sink.queue.push(chunk(9));
        sink.start(vec![chunk(1), chunk(2)]).await.unwrap();

        let appended = buffer.appended_payloads();
        assert_eq!(appended.len(), 3);
        assert_eq!(appended[0][0], 1);
        assert_eq!(appended[1][0], 2);
        assert_eq!(appended[2][0], 9);
    }

    #[tokio::test]
    async fn quota_failure_is_remediated_and_retried() {
        let (sink, handle, buffer) = sink_with(&config());
        handle.position_ms.store(30_000, Ordering::SeqCst);

        // Seed some appended audio so there is a range to trim.
        sink.queue.push(chunk(0));
        sink.feed().await.unwrap();

        buffer.fail_next_appends(1);
        sink.queue.push(chunk(1));
        sink.feed().await.unwrap();

        // Remediation removed a trailing window and the retry landed.
        assert_eq!(buffer.removed.lock().len(), 1);
        let appended = buffer.appended_payloads();
        assert_eq!(appended.len(), 2);
        assert_eq!(appended[1][0], 1);
    }

    #[tokio::test]
    async fn second_quota_failure_requests_rebuild() {
        let (sink, handle, buffer) = sink_with(&config());
        handle.position_ms.store(30_000, Ordering::SeqCst);

        sink.queue.push(chunk(0));
        sink.feed().await.unwrap();

        // First round: append + retry both fail -> chunk requeued, Ok.
        buffer.fail_next_appends(2);
        sink.queue.push(chunk(1));
        sink.feed().await.unwrap();
        assert_eq!(sink.queue.depth(), 1);

        // Second round fails again -> rebuild required.
        buffer.fail_next_appends(2);
        let result = sink.feed().await;
        assert!(matches!(result, Err(StreamError::SinkRebuildRequired)));

        // The unconsumed chunk is still at the head for carry-over.
        assert_eq!(sink.queue.depth(), 1);
        assert_eq!(sink.queue.pop().unwrap().data[0], 1);
    }

    #[tokio::test]
    async fn trims_when_span_exceeds_maximum() {
        let mut config = config();
        config.max_buffered_duration = Duration::from_secs(5);
        config.trim_keep_behind = Duration::from_secs(2);
        let (sink, handle, buffer) = sink_with(&config);

        // Fake buffer grows one second per chunk; position deep into it.
        handle.position_ms.store(5_500, Ordering::SeqCst);
        for tag in 0..6u8 {
            sink.queue.push(chunk(tag));
        }
        sink.feed().await.unwrap();

        let removed = buffer.removed.lock().clone();
        assert!(!removed.is_empty());
        let (from, to) = removed[0];
        assert_eq!(from, Duration::ZERO);
        // Cut stays behind the play position.
        assert!(to <= Duration::from_millis(5_500));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_releases_handle() {
        let (sink, handle, _buffer) = sink_with(&config());

        sink.stop().await;
        assert!(handle.released.load(Ordering::SeqCst));
        sink.stop().await;

        // A stopped sink refuses new work.
        sink.queue.push(chunk(0));
        sink.feed().await.unwrap();
        assert_eq!(sink.queue.depth(), 1);
    }

    #[tokio::test]
    async fn concurrent_feeds_never_overlap_appends() {
        let (sink, _handle, buffer) = sink_with(&config());
        let sink = Arc::new(sink);

        for tag in 0..16u8 {
            sink.queue.push(chunk(tag));
        }

        let a = {
            let sink = sink.clone();
            tokio::spawn(async move { sink.feed().await })
        };
        let b = {
            let sink = sink.clone();
            tokio::spawn(async move { sink.feed().await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        // One of the two callers drains everything; the other bows out.
        sink.feed().await.unwrap();

        assert!(!buffer.overlap_seen.load(Ordering::SeqCst));
        assert_eq!(buffer.appended_payloads().len(), 16);
    }

    #[tokio::test]
    async fn probe_reports_buffered_ahead() {
        let (sink, handle, _buffer) = sink_with(&config());

        for tag in 0..4u8 {
            sink.queue.push(chunk(tag));
        }
        sink.feed().await.unwrap();
        handle.position_ms.store(1_000, Ordering::SeqCst);

        let probe = sink.probe().await;
        // Four appended seconds, one second played.
        assert_eq!(probe.buffered_ahead, Some(Duration::from_secs(3)));
        assert_eq!(probe.position, Duration::from_secs(1));
        assert!(!probe.paused);
        assert!(probe.ready);
    }
}
