//! Security statistics for the admission guard.
//!
//! Counters are updated as a side effect of admission checks and DDoS
//! sampling, and mirrored to the `metrics` facade so a Prometheus exporter
//! can pick them up.

use metrics::{gauge, increment_counter};
use serde::{Deserialize, Serialize};

/// Point-in-time view of the counters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStats {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub ddos_attempts: u64,
    /// Percentage of checks that were limited, in [0, 100]
    pub block_rate: f64,
    /// Epoch millis of the last detection, 0 if none
    pub last_ddos_detection: i64,
}

/// DDoS sampler state as reported to operators
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DdosInfo {
    pub threshold: u64,
    pub attempts: u64,
    pub last_detection: i64,
}

/// Process-wide counters
#[derive(Debug, Default, Clone)]
pub struct Analytics {
    total_requests: u64,
    blocked_requests: u64,
    ddos_attempts: u64,
    last_ddos_detection: i64,
}

impl Analytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&mut self) {
        self.total_requests += 1;
        increment_counter!("guard_requests_total");
    }

    pub fn record_blocked(&mut self, action: &str) {
        self.blocked_requests += 1;
        increment_counter!("guard_blocked_requests_total", "action" => action.to_string());
    }

    pub fn record_ddos_detection(&mut self, now: i64) {
        self.ddos_attempts += 1;
        self.last_ddos_detection = now;
        increment_counter!("guard_ddos_detections_total");
    }

    pub fn ddos_attempts(&self) -> u64 {
        self.ddos_attempts
    }

    pub fn last_ddos_detection(&self) -> i64 {
        self.last_ddos_detection
    }

    pub fn snapshot(&self) -> SecurityStats {
        let block_rate = if self.total_requests == 0 {
            0.0
        } else {
            (self.blocked_requests as f64 / self.total_requests as f64) * 100.0
        };

        SecurityStats {
            total_requests: self.total_requests,
            blocked_requests: self.blocked_requests,
            ddos_attempts: self.ddos_attempts,
            block_rate,
            last_ddos_detection: self.last_ddos_detection,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Publish the number of stored block entries.
pub fn report_blocked_identities(count: usize) {
    gauge!("guard_blocked_identities", count as f64);
}
