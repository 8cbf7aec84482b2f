//! Inbound reply matching and intent dispatch.

pub mod matcher;

pub use matcher::{ReplyMatcher, ReplyOutcome};
