//! Event Bus
//!
//! Typed publish-subscribe router delivering domain events to the
//! application layer. Every subscriber owns its own receiver, so a slow or
//! failing subscriber cannot block delivery to the others.

use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default channel capacity for domain event buses.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// An event that can be routed by its kind.
pub trait BusEvent: Clone + Debug + Send + 'static {
    type Kind: Copy + Eq + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

pub struct EventBus<E: BusEvent> {
    sender: broadcast::Sender<E>,
}

impl<E: BusEvent> EventBus<E> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Dispatch an event to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: E) -> usize {
        debug!(kind = ?event.kind(), "Publishing domain event");
        self.sender.send(event).unwrap_or(0)
    }

    /// Raw receiver over every event on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Invoke `handler` for each event of `kind` on a dedicated task.
    ///
    /// A panicking handler is logged and the listener keeps running.
    pub fn on<F>(&self, kind: E::Kind, handler: F) -> ListenerHandle
    where
        F: Fn(E) + Send + Sync + 'static,
    {
        let mut rx = self.sender.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.kind() == kind => {
                        if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                            warn!(?kind, "Event listener panicked; continuing");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(?kind, skipped, "Event listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        ListenerHandle { task }
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a listener registered by [`EventBus::on`] alive until cancelled.
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Ping {
        A(u32),
        B,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum PingKind {
        A,
        B,
    }

    impl BusEvent for Ping {
        type Kind = PingKind;

        fn kind(&self) -> PingKind {
            match self {
                Ping::A(_) => PingKind::A,
                Ping::B => PingKind::B,
            }
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::<Ping>::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.publish(Ping::A(1)), 2);
        assert_eq!(rx1.recv().await.unwrap(), Ping::A(1));
        assert_eq!(rx2.recv().await.unwrap(), Ping::A(1));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let bus = EventBus::<Ping>::new();
        assert_eq!(bus.publish(Ping::B), 0);
    }

    #[tokio::test]
    async fn listeners_filter_by_kind() {
        let bus = EventBus::<Ping>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _handle = bus.on(PingKind::B, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Ping::A(1));
        bus.publish(Ping::B);
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_affect_others() {
        let bus = EventBus::<Ping>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _bad = bus.on(PingKind::A, |_| panic!("listener failure"));
        let counter = hits.clone();
        let _good = bus.on(PingKind::A, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Ping::A(1));
        bus.publish(Ping::A(2));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_listener_stops() {
        let bus = EventBus::<Ping>::new();
        let handle = bus.on(PingKind::A, |_| {});
        handle.cancel();
        settle().await;
        assert_eq!(bus.subscriber_count(), 0);
    }
}
