//! Synchronous, ordered fan-out of [`SessionEvent`]s.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::{EventKind, SessionEvent};

type Callback = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Handle returned by `subscribe*`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscriber {
    id: SubscriptionId,
    /// `None` receives every kind.
    kind: Option<EventKind>,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// A publish/subscribe hub keyed by [`EventKind`].
///
/// Cheap to clone; clones share subscribers. `publish` calls matching
/// callbacks one after another in subscription order, on the caller's
/// thread. A callback that panics is logged and skipped, and the remaining
/// callbacks still run.
///
/// Callbacks may subscribe or unsubscribe from inside a callback; the change
/// applies from the next `publish`.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl EventDispatcher {
    /// Creates a dispatcher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `callback` for every event of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.insert(Some(kind), Arc::new(callback))
    }

    /// Calls `callback` for every event.
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.insert(None, Arc::new(callback))
    }

    /// Forwards every event into a channel.
    ///
    /// The channel ends once the subscription is removed, including by
    /// [`reset`](Self::reset) when the session closes.
    pub fn subscribe_stream(
        &self,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe_all(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Removes one subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.lock();
        let before = registry.subscribers.len();
        registry.subscribers.retain(|sub| sub.id != id);
        registry.subscribers.len() != before
    }

    /// Delivers `event` to every matching subscriber.
    ///
    /// Returns how many callbacks ran to completion.
    pub fn publish(&self, event: &SessionEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<(SubscriptionId, Callback)> = self
            .lock()
            .subscribers
            .iter()
            .filter(|sub| sub.kind.is_none_or(|k| k == kind))
            .map(|sub| (sub.id, Arc::clone(&sub.callback)))
            .collect();

        let mut delivered = 0;
        for (id, callback) in targets {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::error!(%kind, subscription = %id, "event callback panicked");
                }
            }
        }
        delivered
    }

    /// Drops every subscription.
    pub fn reset(&self) {
        let dropped = std::mem::take(&mut self.lock().subscribers);
        tracing::debug!(subscribers = dropped.len(), "event dispatcher reset");
    }

    /// Returns the number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn insert(&self, kind: Option<EventKind>, callback: Callback) -> SubscriptionId {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry.subscribers.push(Subscriber { id, kind, callback });
        id
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use gamex_protocol::{ErrorCode, PeerId};

    use super::*;

    fn turn(index: usize) -> SessionEvent {
        SessionEvent::NextTurn {
            current_player_index: index,
            current_player_id: PeerId::from("m-1"),
        }
    }

    #[test]
    fn test_publish_calls_subscribers_in_subscription_order() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            dispatcher.subscribe(EventKind::NextTurn, move |_| {
                seen.lock().unwrap().push(tag);
            });
        }

        assert_eq!(dispatcher.publish(&turn(0)), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_publish_filters_by_kind() {
        let dispatcher = EventDispatcher::new();
        let turns = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        {
            let turns = Arc::clone(&turns);
            dispatcher.subscribe(EventKind::NextTurn, move |_| {
                turns.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let errors = Arc::clone(&errors);
            dispatcher.subscribe(EventKind::Error, move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            });
        }

        dispatcher.publish(&turn(1));
        dispatcher.publish(&turn(2));
        dispatcher.publish(&SessionEvent::error(ErrorCode::NotYourTurn, "x"));

        assert_eq!(turns.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_isolates_panicking_callback() {
        let dispatcher = EventDispatcher::new();
        let after = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(EventKind::NextTurn, |_| panic!("ui blew up"));
        {
            let after = Arc::clone(&after);
            dispatcher.subscribe(EventKind::NextTurn, move |_| {
                after.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(dispatcher.publish(&turn(0)), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);

        // The panicking subscriber stays registered and doesn't poison
        // later publishes.
        assert_eq!(dispatcher.publish(&turn(1)), 1);
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = {
            let hits = Arc::clone(&hits);
            dispatcher.subscribe_all(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        dispatcher.publish(&turn(0));
        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));
        dispatcher.publish(&turn(1));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_can_subscribe_without_deadlock() {
        let dispatcher = EventDispatcher::new();
        let inner = dispatcher.clone();
        dispatcher.subscribe(EventKind::NextTurn, move |_| {
            inner.subscribe(EventKind::Error, |_| {});
        });

        dispatcher.publish(&turn(0));
        assert_eq!(dispatcher.subscriber_count(), 2);
    }

    #[test]
    fn test_reset_clears_all_subscriptions() {
        let dispatcher = EventDispatcher::new();
        dispatcher.subscribe(EventKind::NextTurn, |_| {});
        dispatcher.subscribe_all(|_| {});

        dispatcher.reset();

        assert_eq!(dispatcher.subscriber_count(), 0);
        assert_eq!(dispatcher.publish(&turn(0)), 0);
    }

    #[tokio::test]
    async fn test_subscribe_stream_receives_then_ends_on_reset() {
        let dispatcher = EventDispatcher::new();
        let (_, mut events) = dispatcher.subscribe_stream();

        dispatcher.publish(&turn(3));
        dispatcher.reset();

        assert_eq!(events.recv().await, Some(turn(3)));
        assert_eq!(events.recv().await, None);
    }
}
