//! Broadcast scoped publish/subscribe.
//!
//! Delivery is synchronous on the publisher's thread, in subscription
//! order. A failing handler is logged and never stops delivery to the
//! remaining handlers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use relaycast_ipc::FailureKind;
use tracing::{trace, warn};

/// A failure raised inside a state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Failure category.
    pub kind: FailureKind,

    /// Human readable description.
    pub message: String,
}

impl Failure {
    /// Create a failure.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.message)
    }
}

/// Events published on a broadcast's bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Request to start.
    Start,

    /// Request to stop.
    Stop,

    /// Request to show the placeholder and power down.
    Slate,

    /// External health check result for the live feed.
    Health { healthy: bool },

    /// The camera reports after powering on.
    HardwareReady,

    /// The relay forwards the primary feed.
    Ready,

    /// The relay forwards the secondary feed.
    FailedOver,

    /// A transient failure; counts against the retry budget.
    Failed(Failure),

    /// A configuration defect; not retried.
    InvalidConfiguration(String),

    /// Placeholder shown and hardware powered down.
    Slated,

    /// Relay slated and hardware de-powered.
    Stopped,
}

/// Discriminant of an [`Event`], used for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Stop,
    Slate,
    Health,
    HardwareReady,
    Ready,
    FailedOver,
    Failed,
    InvalidConfiguration,
    Slated,
    Stopped,
}

impl Event {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Start => EventKind::Start,
            Self::Stop => EventKind::Stop,
            Self::Slate => EventKind::Slate,
            Self::Health { .. } => EventKind::Health,
            Self::HardwareReady => EventKind::HardwareReady,
            Self::Ready => EventKind::Ready,
            Self::FailedOver => EventKind::FailedOver,
            Self::Failed(_) => EventKind::Failed,
            Self::InvalidConfiguration(_) => EventKind::InvalidConfiguration,
            Self::Slated => EventKind::Slated,
            Self::Stopped => EventKind::Stopped,
        }
    }
}

/// Event handler. Errors are logged by the bus.
pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

struct BusInner {
    label: String,
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

/// In-process event bus for one broadcast. Cloning shares the bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus labelled with the broadcast it serves.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                label: label.into(),
                subscriptions: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribes `handler` to events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.subscriptions.write().push(Subscription {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Subscribes a channel: every event of `kind` is sent to `tx`.
    pub fn forward_to(&self, kind: EventKind, tx: Sender<Event>) -> SubscriptionId {
        self.subscribe(kind, move |event| {
            tx.send(event.clone())
                .map_err(|_| anyhow::anyhow!("receiver for {kind:?} dropped"))
        })
    }

    /// Removes a subscription. Returns false if it was not present.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.inner.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Number of handlers subscribed to `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    /// Delivers `event` to every handler subscribed to its kind at the time
    /// of the call.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        // Handlers run without the lock so they may subscribe or publish.
        let handlers: Vec<Subscription> = self
            .inner
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .cloned()
            .collect();

        trace!(bus = %self.inner.label, ?kind, handlers = handlers.len(), "Publishing event");

        for subscription in handlers {
            if let Err(e) = (subscription.handler)(&event) {
                warn!(bus = %self.inner.label, ?kind, error = %e, "Event handler failed");
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("label", &self.inner.label)
            .field("subscriptions", &self.inner.subscriptions.read().len())
            .finish()
    }
}
