//! DDoS burst detection for the admission guard.
//!
//! The detector samples aggregate request velocity across every tracked
//! identity. When the count inside the sampling window exceeds the
//! threshold, the heaviest requesters are picked out for blocking.

use serde::{Deserialize, Serialize};

use crate::core::window::WindowTracker;

/// DDoS detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DdosDetectionConfig {
    /// Aggregate requests per sampling window that trigger detection
    pub threshold: u64,
    /// Sampling window (milliseconds)
    pub window_ms: u64,
    /// How long offenders are blocked (milliseconds)
    pub block_duration_ms: u64,
    /// How many of the heaviest requesters are blocked per detection
    pub top_offenders: usize,
}

impl Default for DdosDetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 1000,
            window_ms: 1000,
            block_duration_ms: 60_000,
            top_offenders: 10,
        }
    }
}

/// A threshold breach and the identities it singled out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdosDetection {
    /// Requests inside the sampling window
    pub observed: usize,
    /// Heaviest requesters, heaviest first
    pub offenders: Vec<String>,
}

/// DDoS detector implementation
#[derive(Debug, Clone)]
pub struct DdosDetector {
    config: DdosDetectionConfig,
}

impl DdosDetector {
    /// Create a new DDoS detector instance
    pub fn new(config: DdosDetectionConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> u64 {
        self.config.threshold
    }

    pub fn set_threshold(&mut self, threshold: u64) {
        self.config.threshold = threshold;
    }

    pub fn window_ms(&self) -> i64 {
        crate::utils::millis_to_offset(self.config.window_ms)
    }

    pub fn block_duration_ms(&self) -> i64 {
        crate::utils::millis_to_offset(self.config.block_duration_ms)
    }

    /// Sample aggregate velocity at `now`.
    ///
    /// Recomputes the full aggregate on every call. Ties in the offender
    /// ranking are broken by identity so the outcome is deterministic.
    pub fn sample(&self, windows: &WindowTracker, now: i64) -> Option<DdosDetection> {
        let cutoff = now.saturating_sub(self.window_ms());
        let mut counts = windows.counts_since(cutoff);
        let observed: usize = counts.iter().map(|(_, count)| count).sum();

        if (observed as u64) <= self.config.threshold {
            return None;
        }

        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let offenders = counts
            .into_iter()
            .take(self.config.top_offenders)
            .map(|(identity, _)| identity.to_string())
            .collect();

        Some(DdosDetection {
            observed,
            offenders,
        })
    }
}
