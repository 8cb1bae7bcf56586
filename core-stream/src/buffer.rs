//! # Buffer Queue
//!
//! Ordered store of received-but-not-yet-rendered audio chunks sitting
//! between the transport and the playback sink. FIFO ordering is mandatory:
//! chunks must reach the sink in arrival order or the stream is audibly
//! corrupted.
//!
//! The queue never caps itself. Back-pressure is the consumer strategy's
//! job; the queue only exposes depth so the watchdog can warn when a starved
//! consumer lets it grow past the soft limit.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One opaque unit of received audio payload, pre-decode.
///
/// Exclusively held by the [`BufferQueue`] until popped by a sink for
/// consumption; never shared.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Raw payload bytes.
    pub data: Bytes,
    /// Arrival timestamp.
    pub arrived_at: Instant,
}

impl AudioChunk {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            arrived_at: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

struct QueueState {
    chunks: VecDeque<AudioChunk>,
    total_bytes: u64,
}

/// FIFO queue of audio chunks with size and duration accounting.
pub struct BufferQueue {
    inner: Mutex<QueueState>,
    bytes_per_second: u64,
    soft_limit: usize,
}

impl BufferQueue {
    /// Create an empty queue.
    ///
    /// `bytes_per_second` is the nominal stream rate used to estimate the
    /// playable duration of queued bytes; payloads are opaque before decode,
    /// so an estimate is the best available.
    pub fn new(bytes_per_second: u64, soft_limit: usize) -> Self {
        Self {
            inner: Mutex::new(QueueState {
                chunks: VecDeque::new(),
                total_bytes: 0,
            }),
            bytes_per_second: bytes_per_second.max(1),
            soft_limit,
        }
    }

    /// Append a chunk at the tail.
    pub fn push(&self, chunk: AudioChunk) {
        let mut state = self.inner.lock();
        state.total_bytes += chunk.len() as u64;
        state.chunks.push_back(chunk);
    }

    /// Return a chunk to the head after a failed hand-off so it is consumed
    /// first on the next drain.
    pub fn push_front(&self, chunk: AudioChunk) {
        let mut state = self.inner.lock();
        state.total_bytes += chunk.len() as u64;
        state.chunks.push_front(chunk);
    }

    /// Remove and return the oldest chunk.
    pub fn pop(&self) -> Option<AudioChunk> {
        let mut state = self.inner.lock();
        let chunk = state.chunks.pop_front()?;
        state.total_bytes -= chunk.len() as u64;
        Some(chunk)
    }

    /// Drop all queued chunks. Used only on session teardown or a confirmed
    /// track transition.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.chunks.clear();
        state.total_bytes = 0;
    }

    /// Drain the queue, keeping only the most recent `keep` chunks, returned
    /// in FIFO order. Everything older is discarded. Supports the bounded
    /// carry-over replay across a sink rebuild.
    pub fn drain_tail(&self, keep: usize) -> Vec<AudioChunk> {
        let mut state = self.inner.lock();
        let len = state.chunks.len();
        let skip = len.saturating_sub(keep);
        let tail: Vec<AudioChunk> = state.chunks.drain(..).skip(skip).collect();
        state.total_bytes = 0;
        tail
    }

    /// Number of queued chunks.
    pub fn depth(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    /// Total queued payload bytes.
    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().total_bytes
    }

    /// Estimated playable duration of the queued bytes at the nominal
    /// stream rate.
    pub fn peek_duration_estimate(&self) -> Duration {
        let bytes = self.total_bytes();
        Duration::from_secs_f64(bytes as f64 / self.bytes_per_second as f64)
    }

    /// Returns `true` once depth exceeds the soft limit. The queue still
    /// accepts pushes; the caller is expected to warn.
    pub fn over_soft_limit(&self) -> bool {
        self.depth() > self.soft_limit
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }
}
