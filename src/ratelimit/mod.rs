//! Rate limiting logic and state management.

mod key;
mod limiter;
mod rules;
mod window;

pub use key::{HistoryKey, HISTORY_KEY_PREFIX};
pub use limiter::{RateLimiter, Verdict, DEFAULT_PRIORITY_OFFSET};
pub use rules::{
    Bound, RateLimitConfig, DEFAULT_BLOCKED_MESSAGE, DEFAULT_MAX_MESSAGES, DEFAULT_WINDOW_MILLIS,
};
pub use window::{Decision, SlidingWindow, TimestampRecord};
