//! Temporary blocks keyed by identity.
//!
//! An identity is blocked while `block_until > now`. Expired entries are
//! treated as absent and only removed when something looks at them.

use std::collections::HashMap;

use serde::Serialize;

/// A live block, as reported to operators
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockedUser {
    pub user_id: String,
    pub block_until: i64,
}

/// Outcome of looking an identity up in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLookup {
    /// Blocked until the given timestamp
    Active(i64),
    /// An expired entry was found and removed
    Expired,
    NotBlocked,
}

#[derive(Debug, Default)]
pub struct BlockRegistry {
    entries: HashMap<String, i64>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or overwrite the block for `identity`.
    pub fn block(&mut self, identity: &str, now: i64, duration_ms: i64) -> i64 {
        let block_until = now.saturating_add(duration_ms);
        self.entries.insert(identity.to_string(), block_until);
        block_until
    }

    pub fn unblock(&mut self, identity: &str) -> bool {
        self.entries.remove(identity).is_some()
    }

    /// Check `identity` against `now`, dropping a stale entry on the way.
    pub fn lookup(&mut self, identity: &str, now: i64) -> BlockLookup {
        match self.entries.get(identity) {
            Some(&until) if until > now => BlockLookup::Active(until),
            Some(_) => {
                self.entries.remove(identity);
                BlockLookup::Expired
            }
            None => BlockLookup::NotBlocked,
        }
    }

    /// Read-only variant of [`lookup`](Self::lookup).
    pub fn active_until(&self, identity: &str, now: i64) -> Option<i64> {
        self.entries
            .get(identity)
            .copied()
            .filter(|&until| until > now)
    }

    /// Live entries only; expired entries stay in storage.
    pub fn live(&self, now: i64) -> Vec<BlockedUser> {
        let mut blocked: Vec<BlockedUser> = self
            .entries
            .iter()
            .filter(|(_, &until)| until > now)
            .map(|(user_id, &block_until)| BlockedUser {
                user_id: user_id.clone(),
                block_until,
            })
            .collect();
        blocked.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        blocked
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&mut self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, until| *until > now);
        before - self.entries.len()
    }

    /// Number of stored entries, expired or not
    pub fn stored(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
