//! Process-wide event bus.
//!
//! The bus is constructed once at boot and handed to every component which needs it. Delivery is
//! synchronous on the publishing task, so handlers must be cheap, typically forwarding the event
//! onto a controller's channel.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;

/// The closed set of event kinds published on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    NodeAdded,
    NodeRemoved,
}

/// An event published on the bus, carrying the name of the node concerned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    NodeAdded(String),
    NodeRemoved(String),
}

impl Event {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::NodeAdded(_) => EventKind::NodeAdded,
            Self::NodeRemoved(_) => EventKind::NodeRemoved,
        }
    }

    /// The name of the node this event concerns.
    pub fn node(&self) -> &str {
        match self {
            Self::NodeAdded(name) | Self::NodeRemoved(name) => name.as_str(),
        }
    }
}

/// The ID of a subscription, used to unsubscribe its handler.
pub type SubscriptionId = u64;

/// An event handler.
pub type Handler = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

type HandlerMap = HashMap<EventKind, Vec<(SubscriptionId, Handler)>>;

/// A publish/subscribe bus over `EventKind`s.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

#[derive(Default)]
struct EventBusInner {
    next_id: AtomicU64,
    handlers: ArcSwap<HandlerMap>,
}

impl EventBus {
    /// Create a new instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for the given kind of event.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: Handler = Arc::new(handler);
        self.inner.handlers.rcu(|orig| {
            let mut updated = HandlerMap::clone(orig);
            updated.entry(kind).or_default().push((id, handler.clone()));
            updated
        });
        tracing::debug!(?kind, id, "event handler subscribed");
        id
    }

    /// Remove the handler with the given ID, returning `true` if it was found.
    ///
    /// Unsubscribing a handler which is not registered is a no-op.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let prev = self.inner.handlers.rcu(|orig| {
            let mut updated = HandlerMap::clone(orig);
            if let Some(handlers) = updated.get_mut(&kind) {
                handlers.retain(|(hid, _)| *hid != id);
                if handlers.is_empty() {
                    updated.remove(&kind);
                }
            }
            updated
        });
        prev.get(&kind).map(|handlers| handlers.iter().any(|(hid, _)| *hid == id)).unwrap_or(false)
    }

    /// Remove all handlers.
    pub fn clear(&self) {
        self.inner.handlers.store(Default::default());
    }

    /// Publish an event to all handlers of its kind, returning the number of handlers which succeeded.
    ///
    /// Handler errors and panics are logged and do not prevent delivery to the remaining handlers.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn publish(&self, event: &Event) -> usize {
        let handlers = self.inner.handlers.load_full();
        let handlers = match handlers.get(&event.kind()) {
            Some(handlers) => handlers,
            None => return 0,
        };
        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => tracing::error!(error = ?err, id, "error from event handler"),
                Err(_) => tracing::error!(id, "event handler panicked"),
            }
        }
        delivered
    }
}
