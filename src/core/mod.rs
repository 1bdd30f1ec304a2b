//! Core functionality for the admission guard.
//!
//! This module contains the core components of the service: the rule
//! store, sliding window tracking, the block registry, DDoS detection,
//! statistics and the admission engine that ties them together.

pub mod analytics;
pub mod block_registry;
pub mod ddos_detector;
pub mod rate_limiter;
pub mod rule_engine;
pub mod window;

pub use analytics::{Analytics, DdosInfo, SecurityStats};
pub use block_registry::{BlockRegistry, BlockedUser};
pub use ddos_detector::{DdosDetectionConfig, DdosDetector};
pub use rate_limiter::{run_sweeper, PurgeReport, RateLimitStatus, RateLimiter, UserLimitState};
pub use rule_engine::{default_rules, load_rules_file, ExceedPolicy, Rule, RuleEngine, RuleEngineError};
pub use window::{RequestWindow, WindowTracker};
