//! Admission decisions for the admission guard.
//!
//! `RateLimiter` is the single shared engine: it owns the rule store, the
//! sliding windows, the block registry, the DDoS detector and the
//! statistics. All mutable state sits behind one mutex, so every
//! check-then-update sequence is serialized.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::analytics::{report_blocked_identities, Analytics, DdosInfo, SecurityStats};
use crate::core::block_registry::{BlockLookup, BlockRegistry, BlockedUser};
use crate::core::ddos_detector::{DdosDetectionConfig, DdosDetector};
use crate::core::rule_engine::{default_rules, ExceedPolicy, Rule, RuleEngine};
use crate::core::window::WindowTracker;
use crate::utils::{duration_to_millis, Clock, SystemClock};

const BLOCKED_REASON: &str = "User is temporarily blocked";

/// Outcome of an admission check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub is_limited: bool,
    /// Requests left in the window, -1 when unbounded
    pub requests_remaining: i64,
    /// Epoch millis at which the limiting condition lifts
    pub reset_time: i64,
    /// Epoch millis of the next admissible request, 0 when not limited
    pub next_available_time: i64,
    pub is_blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

impl RateLimitStatus {
    fn unbounded() -> Self {
        Self {
            is_limited: false,
            requests_remaining: -1,
            reset_time: 0,
            next_available_time: 0,
            is_blocked: false,
            block_reason: None,
        }
    }

    fn bypassed(max_requests: u32) -> Self {
        Self {
            requests_remaining: i64::from(max_requests),
            ..Self::unbounded()
        }
    }

    fn allowed(remaining: i64, reset_time: i64) -> Self {
        Self {
            requests_remaining: remaining,
            reset_time,
            ..Self::unbounded()
        }
    }

    fn throttled(reset_time: i64) -> Self {
        Self {
            is_limited: true,
            requests_remaining: 0,
            reset_time,
            next_available_time: reset_time,
            is_blocked: false,
            block_reason: None,
        }
    }

    fn blocked(block_until: i64, reason: String) -> Self {
        Self {
            is_limited: true,
            requests_remaining: 0,
            reset_time: block_until,
            next_available_time: block_until,
            is_blocked: true,
            block_reason: Some(reason),
        }
    }
}

/// In-window request count for one (identity, action) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserLimitState {
    pub request_count: usize,
    pub reset_time: i64,
}

/// What a sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub expired_blocks: usize,
    pub idle_identities: usize,
}

struct LimiterState {
    windows: WindowTracker,
    blocks: BlockRegistry,
    detector: DdosDetector,
    analytics: Analytics,
}

/// Admission control engine
pub struct RateLimiter {
    rules: RuleEngine,
    state: Mutex<LimiterState>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create an engine with the given rules, reading the system clock
    pub fn new(rules: RuleEngine, ddos: DdosDetectionConfig) -> Self {
        Self::with_clock(rules, ddos, Arc::new(SystemClock))
    }

    pub fn with_clock(rules: RuleEngine, ddos: DdosDetectionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            rules,
            state: Mutex::new(LimiterState {
                windows: WindowTracker::new(),
                blocks: BlockRegistry::new(),
                detector: DdosDetector::new(ddos),
                analytics: Analytics::new(),
            }),
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check whether a request should be rate limited
    ///
    /// Counts toward statistics and may create a block entry, but never
    /// consumes quota; see [`record_request`](Self::record_request).
    ///
    /// # Arguments
    ///
    /// * `identity` - The caller being limited (e.g., a user or wallet reference)
    /// * `action` - The rule name the request falls under
    ///
    /// # Returns
    ///
    /// * `is_limited == false` if the request should be allowed
    /// * `is_limited == true` if a rule is exceeded or the identity is blocked
    /// * `requests_remaining == -1` if no enabled rule covers `action`
    pub fn check_limit(&self, identity: &str, action: &str) -> RateLimitStatus {
        let rule = self.rules.shared(action);
        let now = self.clock.now_millis();
        let mut guard = self.state();
        Self::check_locked(&mut guard, identity, action, rule.as_deref(), now)
    }

    /// Record an accepted request
    ///
    /// Appends the current timestamp to the identity's window for `action`
    /// and samples aggregate velocity. A breach blocks the heaviest
    /// requesters.
    ///
    /// # Arguments
    ///
    /// * `identity` - The caller that made the request
    /// * `action` - The rule name the request falls under; unknown actions
    ///   are still sampled
    pub fn record_request(&self, identity: &str, action: &str) {
        let rule = self.rules.shared(action);
        let now = self.clock.now_millis();
        let mut guard = self.state();
        Self::record_locked(&mut guard, identity, action, rule.as_deref(), now);
    }

    /// Check and, when admitted, record under a single lock.
    ///
    /// # Returns
    ///
    /// The decision `check_limit` would have returned
    pub fn admit(&self, identity: &str, action: &str) -> RateLimitStatus {
        let rule = self.rules.shared(action);
        let now = self.clock.now_millis();
        let mut guard = self.state();
        let status = Self::check_locked(&mut guard, identity, action, rule.as_deref(), now);
        if !status.is_limited {
            Self::record_locked(&mut guard, identity, action, rule.as_deref(), now);
        }
        status
    }

    fn check_locked(
        state: &mut LimiterState,
        identity: &str,
        action: &str,
        rule: Option<&Rule>,
        now: i64,
    ) -> RateLimitStatus {
        state.analytics.record_request();

        match state.blocks.lookup(identity, now) {
            BlockLookup::Active(block_until) => {
                state.analytics.record_blocked(action);
                return RateLimitStatus::blocked(block_until, BLOCKED_REASON.to_string());
            }
            BlockLookup::Expired => debug!("Block on {} expired", identity),
            BlockLookup::NotBlocked => {}
        }

        let Some(rule) = rule.filter(|rule| rule.enabled) else {
            return RateLimitStatus::unbounded();
        };

        if rule.bypasses(identity) {
            return RateLimitStatus::bypassed(rule.max_requests);
        }

        let window = rule.window_millis();
        let cutoff = now.saturating_sub(window);
        let (count, oldest) = match state.windows.get_mut(identity, action) {
            Some(requests) => {
                requests.prune(cutoff);
                (requests.len(), requests.oldest_since(cutoff))
            }
            None => (0, None),
        };

        if count >= rule.max_requests as usize {
            state.analytics.record_blocked(action);
            return match rule.on_limit_exceeded {
                ExceedPolicy::Block => {
                    let block_until = state.blocks.block(identity, now, window);
                    warn!(
                        "Blocking {} until {}: {} requests for {} in {} ms",
                        identity, block_until, count, action, window
                    );
                    RateLimitStatus::blocked(block_until, format!("Rate limit exceeded for {}", action))
                }
                ExceedPolicy::Throttle | ExceedPolicy::Queue => {
                    let reset_time = oldest.unwrap_or(now).saturating_add(window);
                    debug!("Throttling {} on {} until {}", identity, action, reset_time);
                    RateLimitStatus::throttled(reset_time)
                }
            };
        }

        let remaining = i64::from(rule.max_requests) - count as i64 - 1;
        let reset_time = oldest.unwrap_or(now).saturating_add(window);
        RateLimitStatus::allowed(remaining, reset_time)
    }

    fn record_locked(
        state: &mut LimiterState,
        identity: &str,
        action: &str,
        rule: Option<&Rule>,
        now: i64,
    ) {
        let retention = rule
            .map_or(0, Rule::window_millis)
            .max(state.detector.window_ms());
        let requests = state.windows.entry(identity, action);
        requests.prune(now.saturating_sub(retention));
        requests.push(now);

        let Some(detection) = state.detector.sample(&state.windows, now) else {
            return;
        };

        state.analytics.record_ddos_detection(now);
        let duration = state.detector.block_duration_ms();
        warn!(
            "DDoS pattern detected: {} requests in {} ms (threshold {}), blocking {:?} for {} ms",
            detection.observed,
            state.detector.window_ms(),
            state.detector.threshold(),
            detection.offenders,
            duration
        );
        for offender in &detection.offenders {
            state.blocks.block(offender, now, duration);
        }
    }

    /// Evaluate `check_limit` for every registered rule under one lock.
    ///
    /// Rules are evaluated in name order, so a Block rule that trips early
    /// also blocks the identity for the rules after it.
    ///
    /// Like any check this counts toward statistics and applies the Block
    /// policy of an exceeded rule, but it never appends a timestamp, so
    /// polling does not consume quota.
    ///
    /// # Arguments
    ///
    /// * `identity` - The identity to report on
    ///
    /// # Returns
    ///
    /// The decision for each rule, keyed by rule name
    pub fn get_status(&self, identity: &str) -> BTreeMap<String, RateLimitStatus> {
        let mut rules = self.rules.snapshot();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        let now = self.clock.now_millis();
        let mut guard = self.state();

        rules
            .iter()
            .map(|rule| {
                let status =
                    Self::check_locked(&mut guard, identity, &rule.name, Some(rule.as_ref()), now);
                (rule.name.clone(), status)
            })
            .collect()
    }

    /// Live in-window count for one pair
    ///
    /// # Returns
    ///
    /// `None` if the rule is unknown or `identity` has no window for it
    pub fn get_user_limit_state(&self, identity: &str, action: &str) -> Option<UserLimitState> {
        let rule = self.rules.shared(action)?;
        let now = self.clock.now_millis();
        let state = self.state();
        let requests = state.windows.get(identity, action)?;

        let cutoff = now.saturating_sub(rule.window_millis());
        let reset_time = requests
            .oldest_since(cutoff)
            .unwrap_or(now)
            .saturating_add(rule.window_millis());
        Some(UserLimitState {
            request_count: requests.count_since(cutoff),
            reset_time,
        })
    }

    pub fn add_rule(&self, rule: Rule) {
        self.rules.add_rule(rule);
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        self.rules.remove_rule(name)
    }

    pub fn get_rule(&self, name: &str) -> Option<Rule> {
        self.rules.get_rule(name)
    }

    pub fn get_all_rules(&self) -> Vec<Rule> {
        self.rules.get_rules()
    }

    /// Clear window and block state for one identity
    pub fn reset_limits(&self, identity: &str) {
        let mut state = self.state();
        state.windows.remove_identity(identity);
        state.blocks.unblock(identity);
        info!("Reset limits for {}", identity);
    }

    /// Block an identity temporarily
    ///
    /// # Arguments
    ///
    /// * `identity` - The identity to block
    /// * `duration` - How long the block lasts; overwrites any existing block
    pub fn block_user(&self, identity: &str, duration: Duration) {
        let now = self.clock.now_millis();
        let block_until = self
            .state()
            .blocks
            .block(identity, now, duration_to_millis(duration));
        info!("Blocked {} until {}", identity, block_until);
    }

    pub fn unblock_user(&self, identity: &str) {
        if self.state().blocks.unblock(identity) {
            info!("Unblocked {}", identity);
        }
    }

    pub fn get_blocked_users(&self) -> Vec<BlockedUser> {
        let now = self.clock.now_millis();
        self.state().blocks.live(now)
    }

    pub fn set_ddos_threshold(&self, threshold: u64) {
        self.state().detector.set_threshold(threshold);
        info!("DDoS threshold set to {}", threshold);
    }

    pub fn get_ddos_info(&self) -> DdosInfo {
        let state = self.state();
        DdosInfo {
            threshold: state.detector.threshold(),
            attempts: state.analytics.ddos_attempts(),
            last_detection: state.analytics.last_ddos_detection(),
        }
    }

    pub fn get_security_stats(&self) -> SecurityStats {
        self.state().analytics.snapshot()
    }

    /// Zero the counters; rules, windows and blocks are untouched
    pub fn reset_statistics(&self) {
        self.state().analytics.reset();
    }

    /// Distinct identities with any tracked window state
    ///
    /// Only `record_request` creates window state, so an identity that has
    /// been checked but never recorded is not counted.
    pub fn get_active_users(&self) -> usize {
        self.state().windows.identities()
    }

    /// Drop all windows, blocks and statistics. Rules are kept.
    pub fn clear(&self) {
        let mut state = self.state();
        state.windows.clear();
        state.blocks.clear();
        state.analytics.reset();
    }

    /// Remove expired blocks and windows whose requests have all aged out.
    pub fn purge_expired(&self) -> PurgeReport {
        let windows: HashMap<String, i64> = self
            .rules
            .snapshot()
            .iter()
            .map(|rule| (rule.name.clone(), rule.window_millis()))
            .collect();
        let now = self.clock.now_millis();
        let mut guard = self.state();
        let state = &mut *guard;

        let ddos_window = state.detector.window_ms();
        let idle_identities = state.windows.retain_live(|action| {
            let retention = windows.get(action).copied().unwrap_or(0).max(ddos_window);
            now.saturating_sub(retention)
        });
        let expired_blocks = state.blocks.purge_expired(now);
        report_blocked_identities(state.blocks.stored());

        PurgeReport {
            expired_blocks,
            idle_identities,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            RuleEngine::with_rules(default_rules()),
            DdosDetectionConfig::default(),
        )
    }
}

/// Periodically purge expired state from `limiter`.
pub async fn run_sweeper(limiter: Arc<RateLimiter>, period: Duration) {
    info!("Starting sweeper every {:?}", period);
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;
        let report = limiter.purge_expired();
        debug!(
            "Sweep removed {} expired blocks and {} idle identities",
            report.expired_blocks, report.idle_identities
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{ManualClock, MockClock};
    use mockall::Sequence;

    fn limiter_with(rules: Vec<Rule>) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let limiter = RateLimiter::with_clock(
            RuleEngine::with_rules(rules),
            DdosDetectionConfig::default(),
            clock.clone(),
        );
        (limiter, clock)
    }

    #[test]
    fn test_block_policy_scenario() {
        let (limiter, _clock) = limiter_with(vec![Rule::new("test", 2, 1_000, ExceedPolicy::Block)]);

        let status = limiter.check_limit("u1", "test");
        assert!(!status.is_limited);
        assert_eq!(status.requests_remaining, 1);
        limiter.record_request("u1", "test");

        let status = limiter.check_limit("u1", "test");
        assert!(!status.is_limited);
        assert_eq!(status.requests_remaining, 0);
        limiter.record_request("u1", "test");

        let status = limiter.check_limit("u1", "test");
        assert!(status.is_limited);
        assert!(status.is_blocked);
        assert_eq!(status.block_reason.as_deref(), Some("Rate limit exceeded for test"));
    }

    #[test]
    fn test_check_does_not_consume_quota() {
        let (limiter, _clock) = limiter_with(vec![Rule::new("test", 1, 1_000, ExceedPolicy::Block)]);

        for _ in 0..10 {
            let status = limiter.check_limit("poller", "test");
            assert!(!status.is_limited);
            assert_eq!(status.requests_remaining, 0);
        }
        assert_eq!(limiter.get_active_users(), 0);
    }

    #[test]
    fn test_throttle_reports_oldest_expiry() {
        let (limiter, clock) = limiter_with(vec![Rule::new("t", 2, 1_000, ExceedPolicy::Throttle)]);
        let start = clock.now_millis();

        limiter.record_request("u", "t");
        clock.advance(Duration::from_millis(300));
        limiter.record_request("u", "t");

        let status = limiter.check_limit("u", "t");
        assert!(status.is_limited);
        assert!(!status.is_blocked);
        assert_eq!(status.reset_time, start + 1_000);
        assert_eq!(status.next_available_time, start + 1_000);
        assert!(limiter.get_blocked_users().is_empty());

        // First request ages out, second still counts
        clock.set(start + 1_000);
        let status = limiter.check_limit("u", "t");
        assert!(!status.is_limited);
        assert_eq!(status.requests_remaining, 0);
        assert_eq!(status.reset_time, start + 1_300);
    }

    #[test]
    fn test_queue_behaves_like_throttle() {
        let (limiter, _clock) = limiter_with(vec![Rule::new("q", 1, 1_000, ExceedPolicy::Queue)]);
        limiter.record_request("u", "q");

        let status = limiter.check_limit("u", "q");
        assert!(status.is_limited);
        assert!(!status.is_blocked);
    }

    #[test]
    fn test_unknown_and_disabled_fail_open() {
        let (limiter, _clock) = limiter_with(vec![Rule::new("off", 0, 1_000, ExceedPolicy::Block).disabled()]);

        let status = limiter.check_limit("u", "nope");
        assert!(!status.is_limited);
        assert_eq!(status.requests_remaining, -1);

        let status = limiter.check_limit("u", "off");
        assert!(!status.is_limited);
        assert_eq!(status.requests_remaining, -1);
    }

    #[test]
    fn test_zero_max_always_limited() {
        let (limiter, _clock) = limiter_with(vec![Rule::new("deny", 0, 1_000, ExceedPolicy::Throttle)]);
        assert!(limiter.check_limit("anyone", "deny").is_limited);
        assert_eq!(limiter.get_security_stats().blocked_requests, 1);
    }

    #[test]
    fn test_bypass() {
        let (limiter, _clock) =
            limiter_with(vec![Rule::new("b", 1, 1_000, ExceedPolicy::Block).with_bypass("admin")]);
        for _ in 0..5 {
            limiter.record_request("admin", "b");
        }

        let status = limiter.check_limit("admin", "b");
        assert!(!status.is_limited);
        assert_eq!(status.requests_remaining, 1);
    }

    #[test]
    fn test_admit_records_only_when_allowed() {
        let (limiter, _clock) = limiter_with(vec![Rule::new("a", 2, 1_000, ExceedPolicy::Throttle)]);

        assert!(!limiter.admit("u", "a").is_limited);
        assert!(!limiter.admit("u", "a").is_limited);
        assert!(limiter.admit("u", "a").is_limited);

        let state = limiter.get_user_limit_state("u", "a").unwrap();
        assert_eq!(state.request_count, 2);
    }

    #[test]
    fn test_get_status_matches_check_limit() {
        let rules = || {
            vec![
                Rule::new("block", 1, 1_000, ExceedPolicy::Block),
                Rule::new("throttle", 5, 1_000, ExceedPolicy::Throttle),
            ]
        };
        let (polled, polled_clock) = limiter_with(rules());
        let (checked, checked_clock) = limiter_with(rules());
        for (limiter, clock) in [(&polled, &polled_clock), (&checked, &checked_clock)] {
            limiter.record_request("u", "block");
            clock.advance(Duration::from_millis(400));
        }

        let status = polled.get_status("u");
        assert_eq!(status.len(), 2);
        assert_eq!(status["block"], checked.check_limit("u", "block"));
        assert!(status["block"].is_blocked);
        assert_eq!(status["block"].reset_time, polled_clock.now_millis() + 1_000);
        assert_eq!(
            status["block"].block_reason.as_deref(),
            Some("Rate limit exceeded for block")
        );
        assert!(status["throttle"].is_blocked);
        assert_eq!(polled.get_user_limit_state("u", "block").unwrap().request_count, 1);
        assert_eq!(polled.get_blocked_users().len(), 1);
    }

    #[test]
    fn test_get_status_does_not_consume_quota() {
        let (limiter, _clock) = limiter_with(vec![Rule::new("t", 3, 1_000, ExceedPolicy::Throttle)]);
        limiter.record_request("u", "t");

        for _ in 0..10 {
            assert_eq!(limiter.get_status("u")["t"].requests_remaining, 1);
        }
        assert_eq!(limiter.get_user_limit_state("u", "t").unwrap().request_count, 1);
        assert_eq!(limiter.get_security_stats().total_requests, 10);
    }

    #[test]
    fn test_get_status_disabled_rule_fails_open() {
        let (limiter, _clock) =
            limiter_with(vec![Rule::new("off", 0, 1_000, ExceedPolicy::Block).disabled()]);
        let status = limiter.get_status("u");
        assert!(!status["off"].is_limited);
        assert_eq!(status["off"].requests_remaining, -1);
    }

    #[test]
    fn test_user_limit_state() {
        let (limiter, clock) = limiter_with(default_rules());
        assert!(limiter.get_user_limit_state("u", "api_calls").is_none());

        limiter.record_request("u", "api_calls");
        let state = limiter.get_user_limit_state("u", "api_calls").unwrap();
        assert_eq!(state.request_count, 1);
        assert_eq!(state.reset_time, clock.now_millis() + 60_000);

        limiter.record_request("u", "unregistered");
        assert!(limiter.get_user_limit_state("u", "unregistered").is_none());
    }

    #[test]
    fn test_reset_limits() {
        let (limiter, _clock) = limiter_with(vec![Rule::new("r", 1, 1_000, ExceedPolicy::Block)]);
        limiter.record_request("u", "r");
        assert!(limiter.check_limit("u", "r").is_blocked);

        limiter.reset_limits("u");
        assert_eq!(limiter.get_active_users(), 0);
        assert!(!limiter.check_limit("u", "r").is_limited);
    }

    #[test]
    fn test_ddos_blocks_top_offenders() {
        let (limiter, _clock) = limiter_with(default_rules());
        limiter.set_ddos_threshold(20);

        for i in 0..15 {
            let identity = format!("bot-{:02}", i);
            for _ in 0..=i {
                limiter.record_request(&identity, "api_calls");
            }
        }

        let info = limiter.get_ddos_info();
        assert_eq!(info.threshold, 20);
        assert!(info.attempts >= 1);
        assert!(info.last_detection > 0);

        let blocked: Vec<String> = limiter
            .get_blocked_users()
            .into_iter()
            .map(|b| b.user_id)
            .collect();
        for heavy in 5..15 {
            assert!(blocked.contains(&format!("bot-{:02}", heavy)));
        }
    }

    #[test]
    fn test_purge_expired() {
        let (limiter, clock) = limiter_with(vec![Rule::new("r", 10, 1_000, ExceedPolicy::Throttle)]);
        limiter.record_request("old", "r");
        limiter.block_user("old", Duration::from_millis(500));
        clock.advance(Duration::from_millis(900));
        limiter.record_request("fresh", "r");
        clock.advance(Duration::from_millis(200));

        let report = limiter.purge_expired();
        assert_eq!(
            report,
            PurgeReport {
                expired_blocks: 1,
                idle_identities: 1
            }
        );
        assert_eq!(limiter.get_active_users(), 1);
    }

    #[test]
    fn test_reads_clock_once_per_operation() {
        let mut clock = MockClock::new();
        let mut seq = Sequence::new();
        for now in [10_000_i64, 10_000, 10_100, 10_600] {
            clock
                .expect_now_millis()
                .times(1)
                .in_sequence(&mut seq)
                .return_const(now);
        }

        let limiter = RateLimiter::with_clock(
            RuleEngine::with_rules(vec![Rule::new("r", 1, 500, ExceedPolicy::Block)]),
            DdosDetectionConfig::default(),
            Arc::new(clock),
        );

        limiter.record_request("u", "r");
        let blocked = limiter.check_limit("u", "r");
        assert!(blocked.is_blocked);
        assert_eq!(blocked.reset_time, 10_500);

        assert!(limiter.check_limit("u", "r").is_blocked);
        // Block and window both lapsed
        assert!(!limiter.check_limit("u", "r").is_limited);
    }
}
