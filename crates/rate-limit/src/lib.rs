//! Sliding-window rate limiting for configured endpoints.
//!
//! Each configured endpoint becomes a [`RuleState`] holding three independent
//! identity dimensions (user, IP and rate-limit group), each a
//! [`DashMap`](dashmap::DashMap) of [`SlidingWindowCounter`]s. The
//! [`RateLimitingEngine`] resolves which rules apply to a request (exact,
//! any-method, then wildcard routes) and answers threshold checks.
//!
//! Time is driven externally: a periodic task calls
//! [`RateLimitingEngine::advance_all`] once per bucket duration, which also
//! drops counters that have gone quiet.

pub mod engine;
pub mod rule;
pub mod sliding_window;

pub use engine::{RateLimitQuery, RateLimitStatus, RateLimitingEngine};
pub use rule::{RateLimitRule, RateLimitTrigger, RuleBounds, RuleState};
pub use sliding_window::{advance_windows, SlidingWindowCounter};
