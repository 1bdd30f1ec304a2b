//! Per-identity, per-action sliding windows of request timestamps.

use std::collections::{HashMap, VecDeque};

/// Request timestamps for one (identity, action) pair, oldest first.
#[derive(Debug, Default, Clone)]
pub struct RequestWindow {
    timestamps: VecDeque<i64>,
}

impl RequestWindow {
    pub fn push(&mut self, now: i64) {
        self.timestamps.push_back(now);
    }

    /// Drop every timestamp at or before `cutoff`.
    pub fn prune(&mut self, cutoff: i64) {
        while self.timestamps.front().is_some_and(|&ts| ts <= cutoff) {
            self.timestamps.pop_front();
        }
    }

    /// Timestamps strictly after `cutoff`, without modifying the window.
    pub fn count_since(&self, cutoff: i64) -> usize {
        self.timestamps
            .iter()
            .rev()
            .take_while(|&&ts| ts > cutoff)
            .count()
    }

    /// Oldest timestamp strictly after `cutoff`.
    pub fn oldest_since(&self, cutoff: i64) -> Option<i64> {
        self.timestamps.iter().copied().find(|&ts| ts > cutoff)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Windows for every tracked identity.
#[derive(Debug, Default)]
pub struct WindowTracker {
    identities: HashMap<String, HashMap<String, RequestWindow>>,
}

impl WindowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &str, action: &str) -> Option<&RequestWindow> {
        self.identities.get(identity)?.get(action)
    }

    pub fn get_mut(&mut self, identity: &str, action: &str) -> Option<&mut RequestWindow> {
        self.identities.get_mut(identity)?.get_mut(action)
    }

    pub fn entry(&mut self, identity: &str, action: &str) -> &mut RequestWindow {
        self.identities
            .entry(identity.to_string())
            .or_default()
            .entry(action.to_string())
            .or_default()
    }

    /// Per-identity request counts strictly after `cutoff`, skipping zeros.
    pub fn counts_since(&self, cutoff: i64) -> Vec<(&str, usize)> {
        self.identities
            .iter()
            .filter_map(|(identity, actions)| {
                let count: usize = actions.values().map(|w| w.count_since(cutoff)).sum();
                (count > 0).then_some((identity.as_str(), count))
            })
            .collect()
    }

    /// Drop windows for which `keep_after` yields a cutoff they have nothing
    /// past, then identities left without windows. Returns identities removed.
    pub fn retain_live(&mut self, mut keep_after: impl FnMut(&str) -> i64) -> usize {
        let before = self.identities.len();
        self.identities.retain(|_, actions| {
            actions.retain(|action, window| {
                window.prune(keep_after(action));
                !window.is_empty()
            });
            !actions.is_empty()
        });
        before - self.identities.len()
    }

    pub fn remove_identity(&mut self, identity: &str) -> bool {
        self.identities.remove(identity).is_some()
    }

    /// Distinct identities with any window state
    pub fn identities(&self) -> usize {
        self.identities.len()
    }

    pub fn clear(&mut self) {
        self.identities.clear();
    }
}
