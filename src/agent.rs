//! Actors on either side of a say event.

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur when an agent sends a message.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to send message: {0}")]
    SendFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The actor a say event originates from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceAgent {
    pub id: String,
}

impl SourceAgent {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// The actor a say event is addressed to.
///
/// A target knows who owns it and can speak back into the conversation.
#[async_trait]
pub trait TargetAgent: Send + Sync {
    /// Identity of this agent.
    fn id(&self) -> &str;

    /// Identity of the agent's owner.
    fn owner_id(&self) -> &str;

    /// Send `message` from this agent.
    async fn say(&self, message: &str) -> Result<(), AgentError>;
}

/// Agent that keeps every message it says.
#[derive(Debug)]
pub struct RecordingAgent {
    id: String,
    owner_id: String,
    said: Mutex<Vec<String>>,
}

impl RecordingAgent {
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            said: Mutex::new(Vec::new()),
        }
    }

    /// Everything said so far, oldest first.
    pub fn said(&self) -> Vec<String> {
        self.said.lock().clone()
    }
}

#[async_trait]
impl TargetAgent for RecordingAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    async fn say(&self, message: &str) -> Result<(), AgentError> {
        debug!(agent = %self.id, message = %message, "Agent said");
        self.said.lock().push(message.to_string());
        Ok(())
    }
}

/// Agent that prints what it says to standard output.
#[derive(Debug, Clone)]
pub struct ConsoleAgent {
    id: String,
    name: String,
    owner_id: String,
}

impl ConsoleAgent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner_id: owner_id.into(),
        }
    }
}

#[async_trait]
impl TargetAgent for ConsoleAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    async fn say(&self, message: &str) -> Result<(), AgentError> {
        use tokio::io::AsyncWriteExt;

        let line = format!("{}: {}\n", self.name, message);
        let mut stdout = tokio::io::stdout();
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }
}
