//! # Event Bus System
//!
//! Provides an event-driven architecture for the streaming core using
//! `tokio::sync::broadcast`. The engine publishes typed events; UI
//! collaborators (status display, metadata rendering) subscribe without the
//! core knowing about them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │  Controller  ├──────────────>│           │
//! └──────────────┘               │ EventBus  │     subscribe    ┌────────────┐
//!                                │ (broadcast├─────────────────>│ Subscriber │
//! ┌──────────────┐     emit      │  channel) │                  └────────────┘
//! │ TrackInfoSync├──────────────>│           │     subscribe    ┌────────────┐
//! └──────────────┘               └───────────┘─────────────────>│ Subscriber │
//!                                                               └────────────┘
//! ```
//!
//! The bus is generic over the event type: each crate declares its own event
//! enum and instantiates `EventBus<E>` for it.
//!
//! ## Error Handling
//!
//! `tokio::sync::broadcast` produces two receive errors:
//!
//! - **`RecvError::Lagged(n)`**: the subscriber was too slow and missed `n`
//!   events. Non-fatal; the subscriber keeps receiving new events.
//! - **`RecvError::Closed`**: all senders dropped; treat as shutdown.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::EventBus;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! #[derive(Debug, Clone, PartialEq)]
//! enum UiEvent {
//!     StatusChanged(String),
//! }
//!
//! let bus: EventBus<UiEvent> = EventBus::new(100);
//! let mut subscriber = bus.subscribe();
//!
//! bus.emit(UiEvent::StatusChanged("Connected".into())).ok();
//! assert_eq!(
//!     subscriber.recv().await.unwrap(),
//!     UiEvent::StatusChanged("Connected".into())
//! );
//! # }
//! ```

use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Balances memory usage with the ability to absorb bursts. Subscribers that
/// fall behind by more than this receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Central event bus for publishing and subscribing to typed events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned per subscriber)
/// - Lagging detection for slow subscribers
#[derive(Debug, Clone)]
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error when there are none. Having no subscribers is not unusual (the
    /// engine may run headless); callers typically `ok()` the result.
    pub fn emit(&self, event: E) -> Result<usize, SendError<E>> {
        self.sender.send(event)
    }

    /// Creates a new subscription to the bus.
    ///
    /// The receiver only observes events emitted after this call.
    pub fn subscribe(&self) -> Receiver<E> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestEvent {
        Ping(u32),
    }

    #[tokio::test]
    async fn emit_reaches_all_subscribers() {
        let bus: EventBus<TestEvent> = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let delivered = bus.emit(TestEvent::Ping(1)).unwrap();
        assert_eq!(delivered, 2);

        assert_eq!(a.recv().await.unwrap(), TestEvent::Ping(1));
        assert_eq!(b.recv().await.unwrap(), TestEvent::Ping(1));
    }

    #[tokio::test]
    async fn emit_without_subscribers_errors() {
        let bus: EventBus<TestEvent> = EventBus::new(16);
        assert!(bus.emit(TestEvent::Ping(1)).is_err());
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus: EventBus<TestEvent> = EventBus::new(16);
        let mut early = bus.subscribe();

        bus.emit(TestEvent::Ping(1)).unwrap();
        let mut late = bus.subscribe();
        bus.emit(TestEvent::Ping(2)).unwrap();

        assert_eq!(early.recv().await.unwrap(), TestEvent::Ping(1));
        assert_eq!(early.recv().await.unwrap(), TestEvent::Ping(2));
        assert_eq!(late.recv().await.unwrap(), TestEvent::Ping(2));
    }

    #[tokio::test]
    async fn slow_subscriber_observes_lag() {
        let bus: EventBus<TestEvent> = EventBus::new(1);
        let mut slow = bus.subscribe();

        bus.emit(TestEvent::Ping(1)).unwrap();
        bus.emit(TestEvent::Ping(2)).unwrap();

        match slow.recv().await {
            Err(RecvError::Lagged(missed)) => assert_eq!(missed, 1),
            other => panic!("expected lag, got {:?}", other),
        }
    }
}
