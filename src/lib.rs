//! Admission Guard
//!
//! Admission control for sensitive operations: every guarded request is
//! checked against a per-identity, per-action sliding window before it
//! runs. Exceeding a rule either throttles the caller or blocks it
//! temporarily, and a global velocity sampler blocks the heaviest
//! requesters when aggregate traffic bursts past a threshold.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod utils;

pub use crate::core::{RateLimitStatus, RateLimiter, Rule};
pub use models::Config;
