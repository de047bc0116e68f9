//! In-process event dispatch for say events.
//!
//! Handlers subscribe to an event type at a signed priority. Lower priorities
//! run first, so a handler registered below the default can inspect an event
//! and abort it before any other handler sees it.

mod bus;
mod say;

pub use bus::{DispatchOutcome, EventBus, SubscriptionId, DEFAULT_PRIORITY};
pub use say::{SayEvent, SAY_EVENT};

use async_trait::async_trait;

/// A subscriber to say events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event. Calling [`SayEvent::abort`] stops further dispatch.
    async fn handle(&self, event: &SayEvent);
}
