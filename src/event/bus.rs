//! Priority-ordered event bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::{EventHandler, SayEvent, SAY_EVENT};

/// Priority used by handlers with no particular ordering needs.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// How far an event travelled through its handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every subscribed handler ran.
    Delivered { handlers: usize },
    /// A handler aborted the event after `handlers` handlers had run.
    Aborted { handlers: usize },
}

impl DispatchOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, DispatchOutcome::Aborted { .. })
    }
}

struct Subscription {
    id: SubscriptionId,
    event_type: String,
    priority: i32,
    handler: Arc<dyn EventHandler>,
}

/// Dispatches events to subscribed handlers in ascending priority order.
///
/// Handlers with equal priority run in subscription order.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type` at `priority`.
    pub fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
        priority: i32,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut subscriptions = self.subscriptions.write();
        subscriptions.push(Subscription {
            id,
            event_type: event_type.to_string(),
            priority,
            handler,
        });
        // Stable, so ties keep subscription order.
        subscriptions.sort_by_key(|s| s.priority);

        debug!(event_type = %event_type, priority = priority, "Handler subscribed");
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Number of handlers subscribed to `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.subscriptions
            .read()
            .iter()
            .filter(|s| s.event_type == event_type)
            .count()
    }

    /// Run a say event through its handlers until one aborts it.
    pub async fn dispatch(&self, event: &SayEvent) -> DispatchOutcome {
        // Snapshot so the lock is not held across handler awaits.
        let handlers: Vec<(i32, Arc<dyn EventHandler>)> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.event_type == SAY_EVENT)
            .map(|s| (s.priority, s.handler.clone()))
            .collect();

        let mut ran = 0;
        for (priority, handler) in handlers {
            if event.is_aborted() {
                break;
            }
            trace!(source = %event.source.id, priority = priority, "Invoking handler");
            handler.handle(event).await;
            ran += 1;
        }

        if event.is_aborted() {
            debug!(source = %event.source.id, handlers = ran, "Event aborted");
            DispatchOutcome::Aborted { handlers: ran }
        } else {
            DispatchOutcome::Delivered { handlers: ran }
        }
    }
}
