//! Rate limit rule configuration.
//!
//! A rule is a message quota, a window length and the text sent to a source
//! when it is cut off. Either bound may be "unlimited", which switches
//! limiting off for the rule entirely.

use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::window::SlidingWindow;
use crate::error::{Result, SaylimitError};

/// Default number of messages admitted per window.
pub const DEFAULT_MAX_MESSAGES: u64 = 5;
/// Default window length: one day.
pub const DEFAULT_WINDOW_MILLIS: u64 = 24 * 60 * 60 * 1000;
/// Default text sent to a source that hit its quota.
pub const DEFAULT_BLOCKED_MESSAGE: &str =
    "You are sending messages too quickly. Please wait a moment before sending another message.";

/// A positive bound, or no bound at all.
///
/// Deserializes from a whole number, a float, or a string. Zero, any
/// non-finite number and `"unlimited"` all mean [`Bound::Unlimited`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Limited(NonZeroU64),
    Unlimited,
}

impl Bound {
    /// Build a bound where `0` means unlimited.
    pub fn new(value: u64) -> Self {
        NonZeroU64::new(value).map_or(Bound::Unlimited, Bound::Limited)
    }

    /// Build a bound from a floating point value.
    pub fn from_f64(value: f64) -> Result<Self> {
        if !value.is_finite() || value == 0.0 {
            return Ok(Bound::Unlimited);
        }
        if value < 0.0 {
            return Err(SaylimitError::Config(format!(
                "bound must not be negative, got {}",
                value
            )));
        }
        if value.fract() != 0.0 || value > u64::MAX as f64 {
            return Err(SaylimitError::Config(format!(
                "bound must be a whole number, got {}",
                value
            )));
        }
        Ok(Bound::new(value as u64))
    }

    /// The limit, or `None` when unlimited.
    pub fn get(&self) -> Option<u64> {
        match self {
            Bound::Limited(n) => Some(n.get()),
            Bound::Unlimited => None,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Bound::Unlimited)
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Limited(n) => write!(f, "{}", n),
            Bound::Unlimited => f.write_str("unlimited"),
        }
    }
}

impl Serialize for Bound {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Bound::Limited(n) => serializer.serialize_u64(n.get()),
            Bound::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for Bound {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawBound {
            Whole(u64),
            Negative(i64),
            Float(f64),
            Text(String),
        }

        let bound = match RawBound::deserialize(deserializer)? {
            RawBound::Whole(n) => Ok(Bound::new(n)),
            RawBound::Negative(n) => Bound::from_f64(n as f64),
            RawBound::Float(f) => Bound::from_f64(f),
            RawBound::Text(s) => {
                let s = s.trim();
                if s.eq_ignore_ascii_case("unlimited") {
                    Ok(Bound::Unlimited)
                } else {
                    s.parse::<f64>()
                        .map_err(|_| SaylimitError::Config(format!("invalid bound '{}'", s)))
                        .and_then(Bound::from_f64)
                }
            }
        };
        bound.map_err(serde::de::Error::custom)
    }
}

/// Quota applied to each source speaking to one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Messages admitted per window per source
    #[serde(default = "default_max_messages")]
    pub max_messages: Bound,

    /// Sliding window length in milliseconds
    #[serde(default = "default_window_millis")]
    pub window_millis: Bound,

    /// Text sent once to a source when it goes over its quota
    #[serde(default = "default_blocked_message")]
    pub blocked_message: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            window_millis: default_window_millis(),
            blocked_message: default_blocked_message(),
        }
    }
}

fn default_max_messages() -> Bound {
    Bound::new(DEFAULT_MAX_MESSAGES)
}

fn default_window_millis() -> Bound {
    Bound::new(DEFAULT_WINDOW_MILLIS)
}

fn default_blocked_message() -> String {
    DEFAULT_BLOCKED_MESSAGE.to_string()
}

impl RateLimitConfig {
    /// A rule admitting `max_messages` per `window_millis`. Zero for either
    /// disables limiting.
    pub fn new(max_messages: u64, window_millis: u64) -> Self {
        Self {
            max_messages: Bound::new(max_messages),
            window_millis: Bound::new(window_millis),
            blocked_message: default_blocked_message(),
        }
    }

    pub fn with_blocked_message(mut self, message: impl Into<String>) -> Self {
        self.blocked_message = message.into();
        self
    }

    /// Load a rule from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| SaylimitError::Config(format!("Failed to parse rate limit config: {}", e)))
    }

    /// Limiting applies only when both bounds are set.
    pub fn is_enabled(&self) -> bool {
        self.window().is_some()
    }

    /// The sliding window for this rule, or `None` when limiting is off.
    pub fn window(&self) -> Option<SlidingWindow> {
        match (self.max_messages.get(), self.window_millis.get()) {
            (Some(max), Some(window)) => Some(SlidingWindow::new(max, window)),
            _ => None,
        }
    }

    /// Message for blocked sources. An empty message falls back to the
    /// default text.
    pub fn blocked_message(&self) -> &str {
        if self.blocked_message.is_empty() {
            DEFAULT_BLOCKED_MESSAGE
        } else {
            &self.blocked_message
        }
    }
}
