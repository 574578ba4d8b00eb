//! Fan-out of index events to a dynamic set of subscribers.
//!
//! Each subscriber owns an independent bounded queue. Publishing never waits
//! on a consumer: when a queue is full its oldest progress event is
//! superseded by the newer one. Summaries are never superseded by progress,
//! so a subscriber that stays connected always ends a session on its summary.

use crate::models::{EventEnvelope, IndexEvent, ProgressSnapshot};
use crate::store::IndexStore;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enqueue {
    Delivered,
    Superseded,
    Skipped,
    Disconnected,
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<EventEnvelope>,
    /// Session and `processed` of the last progress handed to this subscriber.
    high_water: Option<(Uuid, usize)>,
    dropped: u64,
    closed: bool,
    receiver_dropped: bool,
}

struct SubscriberQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(&self, envelope: EventEnvelope) -> Enqueue {
        let mut state = self.lock_state();
        if state.receiver_dropped || state.closed {
            return Enqueue::Disconnected;
        }

        let mut high_water = state.high_water;
        match &envelope.event {
            IndexEvent::Progress(snapshot) | IndexEvent::CatchUp(snapshot) => {
                let regressed = match (snapshot.session_id, high_water) {
                    (Some(session_id), Some((seen_session, seen_processed))) => {
                        session_id == seen_session && snapshot.processed < seen_processed
                    }
                    _ => false,
                };
                if regressed {
                    return Enqueue::Skipped;
                }
                high_water = snapshot
                    .session_id
                    .map(|session_id| (session_id, snapshot.processed));
            }
            IndexEvent::Summary(_) => high_water = None,
        }

        let mut outcome = Enqueue::Delivered;
        if state.events.len() >= self.capacity {
            let victim = state
                .events
                .iter()
                .position(|queued| !queued.event.is_summary());
            match victim {
                Some(index) => {
                    let _ = state.events.remove(index);
                }
                // Only a summary may displace a summary.
                None if envelope.event.is_summary() => {
                    let _ = state.events.pop_front();
                }
                None => {
                    state.dropped += 1;
                    return Enqueue::Superseded;
                }
            }
            state.dropped += 1;
            outcome = Enqueue::Superseded;
        }

        state.high_water = high_water;
        state.events.push_back(envelope);
        drop(state);
        self.notify.notify_one();
        outcome
    }

    fn close(&self) {
        self.lock_state().closed = true;
        self.notify.notify_one();
    }
}

/// Receiving side of one subscriber. Dropping it unregisters the subscriber
/// on the next publish.
pub struct Subscription {
    handle: SubscriptionHandle,
    queue: Arc<SubscriberQueue>,
    cursor: u64,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Id of the last event this subscriber received.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Events superseded because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.queue.lock_state().dropped
    }

    /// Waits for the next event. `None` once the subscription was closed and drained.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            {
                let mut state = self.queue.lock_state();
                if let Some(envelope) = state.events.pop_front() {
                    self.cursor = envelope.id;
                    return Some(envelope);
                }
                if state.closed {
                    return None;
                }
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        let envelope = self.queue.lock_state().events.pop_front()?;
        self.cursor = envelope.id;
        Some(envelope)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.lock_state().receiver_dropped = true;
    }
}

#[derive(Default)]
struct Registry {
    last_event_id: u64,
    active_session: Option<Uuid>,
    subscribers: HashMap<SubscriptionHandle, Arc<SubscriberQueue>>,
    closed: bool,
}

pub struct EventBroadcaster {
    store: Arc<IndexStore>,
    capacity: usize,
    next_handle: AtomicU64,
    registry: Mutex<Registry>,
}

impl EventBroadcaster {
    pub fn new(store: Arc<IndexStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            next_handle: AtomicU64::new(1),
            registry: Mutex::new(Registry::default()),
        }
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers a subscriber primed with a catch-up snapshot of the store.
    ///
    /// `after` is the last event id a reconnecting observer saw; when it is
    /// already the latest published id the catch-up is skipped.
    pub fn subscribe(&self, after: Option<u64>) -> Subscription {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let queue = Arc::new(SubscriberQueue::new(self.capacity));
        let mut registry = self.lock_registry();

        let up_to_date = registry.last_event_id > 0 && after == Some(registry.last_event_id);
        if registry.closed {
            queue.close();
        } else {
            if !up_to_date {
                let counters = self.store.snapshot();
                let snapshot =
                    ProgressSnapshot::new(registry.active_session, counters, counters.processed());
                let _ = queue.push(EventEnvelope {
                    id: registry.last_event_id,
                    timestamp: Utc::now(),
                    event: IndexEvent::CatchUp(snapshot),
                });
            }
            registry.subscribers.insert(handle, queue.clone());
        }
        drop(registry);

        debug!(subscriber = handle.id(), catch_up = !up_to_date, "subscriber registered");

        Subscription {
            handle,
            queue,
            cursor: after.unwrap_or(0),
        }
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let removed = self.lock_registry().subscribers.remove(&handle);
        if let Some(queue) = removed {
            queue.close();
            debug!(subscriber = handle.id(), "subscriber removed");
        }
    }

    /// Delivers `event` to every registered subscriber without waiting on any of them.
    pub fn publish(&self, event: IndexEvent) -> EventEnvelope {
        let mut registry = self.lock_registry();
        registry.last_event_id += 1;

        match &event {
            IndexEvent::Progress(snapshot) => registry.active_session = snapshot.session_id,
            IndexEvent::Summary(_) => registry.active_session = None,
            IndexEvent::CatchUp(_) => {}
        }

        let envelope = EventEnvelope {
            id: registry.last_event_id,
            timestamp: Utc::now(),
            event,
        };

        registry
            .subscribers
            .retain(|handle, queue| match queue.push(envelope.clone()) {
                Enqueue::Disconnected => {
                    debug!(subscriber = handle.id(), "subscriber disconnected, removing");
                    false
                }
                Enqueue::Superseded => {
                    debug!(
                        subscriber = handle.id(),
                        event_id = envelope.id,
                        "subscriber queue full, superseded oldest event"
                    );
                    true
                }
                Enqueue::Delivered | Enqueue::Skipped => true,
            });

        envelope
    }

    pub fn last_event_id(&self) -> u64 {
        self.lock_registry().last_event_id
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_registry().subscribers.len()
    }

    /// Ends every stream after it drains. Later subscriptions end immediately.
    pub fn close(&self) {
        let mut registry = self.lock_registry();
        registry.closed = true;
        for queue in registry.subscribers.values() {
            queue.close();
        }
        registry.subscribers.clear();
    }
}
