//! The say event payload.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::agent::{SourceAgent, TargetAgent};

/// Event type name for say events.
pub const SAY_EVENT: &str = "say";

/// A message from a source agent to a target agent.
pub struct SayEvent {
    /// Who is speaking
    pub source: SourceAgent,
    /// Who is being spoken to
    pub target: Arc<dyn TargetAgent>,
    /// What was said
    pub message: String,
    aborted: AtomicBool,
}

impl SayEvent {
    pub fn new(source: SourceAgent, target: Arc<dyn TargetAgent>, message: impl Into<String>) -> Self {
        Self {
            source,
            target,
            message: message.into(),
            aborted: AtomicBool::new(false),
        }
    }

    /// Stop this event from reaching any further handlers. Idempotent.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Whether the speaker owns the agent being spoken to.
    pub fn is_from_owner(&self) -> bool {
        self.source.id == self.target.owner_id()
    }
}

impl fmt::Debug for SayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SayEvent")
            .field("source", &self.source.id)
            .field("target", &self.target.id())
            .field("message", &self.message)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
