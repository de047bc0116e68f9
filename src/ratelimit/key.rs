//! Storage key generation for per-source history.

/// Namespace prefix for message history keys.
pub const HISTORY_KEY_PREFIX: &str = "userMessageTimestamps";

/// The storage key holding one source's message history.
///
/// The prefix is fixed and the source id is appended verbatim, so distinct
/// ids never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey(String);

impl HistoryKey {
    pub fn for_source(source_id: &str) -> Self {
        Self(format!("{}.{}", HISTORY_KEY_PREFIX, source_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The source id this key was built from.
    pub fn source_id(&self) -> &str {
        &self.0[HISTORY_KEY_PREFIX.len() + 1..]
    }
}

impl std::fmt::Display for HistoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
