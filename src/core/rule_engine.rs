//! Rule store for the admission guard.
//!
//! This module holds the named rate limit rules that map an action to a
//! limiting policy, plus helpers for the default rule set and for loading
//! rules from a JSON file.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::millis_to_offset;

/// Errors that can occur while loading rules
#[derive(Error, Debug)]
pub enum RuleEngineError {
    #[error("Failed to read rules file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Rule parsing error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// What happens once a rule's request ceiling is reached
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExceedPolicy {
    /// Temporary full denial through the block registry
    Block,
    /// Report limited, no registry block
    Throttle,
    /// Reserved. Enforced the same way as `Throttle`.
    Queue,
}

/// Rate limit rule definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Rule name, also the action it applies to
    pub name: String,
    /// Requests allowed per window. Zero always limits.
    pub max_requests: u32,
    /// Sliding window length in milliseconds
    pub time_window: u64,
    /// Identities exempt from this rule
    #[serde(default)]
    pub bypass_for: HashSet<String>,
    /// Enforcement once the ceiling is reached
    pub on_limit_exceeded: ExceedPolicy,
    /// Disabled rules never limit
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        max_requests: u32,
        time_window: u64,
        on_limit_exceeded: ExceedPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            max_requests,
            time_window,
            bypass_for: HashSet::new(),
            on_limit_exceeded,
            enabled: true,
        }
    }

    pub fn with_bypass(mut self, identity: impl Into<String>) -> Self {
        self.bypass_for.insert(identity.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Window length as a signed millisecond offset.
    pub fn window_millis(&self) -> i64 {
        millis_to_offset(self.time_window)
    }

    pub fn bypasses(&self, identity: &str) -> bool {
        self.bypass_for.contains(identity)
    }
}

/// The rule set every engine starts with.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new("transaction_submit", 100, 60_000, ExceedPolicy::Block),
        Rule::new("api_calls", 1000, 60_000, ExceedPolicy::Throttle),
        Rule::new("auth_attempts", 10, 60_000, ExceedPolicy::Block),
        Rule::new("data_retrieval", 500, 60_000, ExceedPolicy::Throttle),
    ]
}

/// Load rules from a JSON file containing an array of rules
pub fn load_rules_file(path: impl AsRef<Path>) -> Result<Vec<Rule>, RuleEngineError> {
    let json = std::fs::read_to_string(path)?;
    let rules = serde_json::from_str(&json)?;
    Ok(rules)
}

/// Named rule storage.
///
/// Stored rules are shared as `Arc<Rule>` so the admission path can hold one
/// without keeping the store locked; a rule is only ever replaced whole.
#[derive(Debug, Default)]
pub struct RuleEngine {
    rules: RwLock<HashMap<String, Arc<Rule>>>,
}

impl RuleEngine {
    /// Create an empty rule store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a rule store seeded with the given rules
    pub fn with_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let engine = Self::new();
        for rule in rules {
            engine.add_rule(rule);
        }
        engine
    }

    /// Insert a rule, replacing any rule with the same name
    pub fn add_rule(&self, rule: Rule) {
        info!(
            "Registering rule {} ({} requests / {} ms, {:?}, enabled: {})",
            rule.name, rule.max_requests, rule.time_window, rule.on_limit_exceeded, rule.enabled
        );
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        rules.insert(rule.name.clone(), Arc::new(rule));
    }

    /// Remove a rule, returning whether it existed
    pub fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let removed = rules.remove(name).is_some();
        if removed {
            info!("Removed rule {}", name);
        }
        removed
    }

    /// Get a rule by name
    pub fn get_rule(&self, name: &str) -> Option<Rule> {
        self.shared(name).map(|rule| (*rule).clone())
    }

    /// Get all rules, in no particular order
    pub fn get_rules(&self) -> Vec<Rule> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        rules.values().map(|rule| (**rule).clone()).collect()
    }

    pub(crate) fn shared(&self, name: &str) -> Option<Arc<Rule>> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        rules.get(name).cloned()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Rule>> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        rules.values().cloned().collect()
    }
}
