//! Saylimit - per-source rate limiting for say events
//!
//! This crate guards a message-passing "say" event with a sliding window
//! quota per source. History is persisted through a generic key-value store;
//! over-limit events are aborted before other handlers see them, and each
//! source is told once per streak that it has been cut off.

pub mod agent;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod ratelimit;
pub mod store;
pub mod tasks;
