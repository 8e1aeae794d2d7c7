use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// What a plain-text message from a user should be read as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputExpectation {
    NoExpectation,
    AwaitingAmount(String),
}

#[derive(Clone, Debug)]
struct PendingEntry {
    mint: String,
    created_at: Instant,
}

/// One outstanding "type your custom amount" slot per user. Last write wins.
#[derive(Debug)]
pub struct PendingStore {
    entries: Mutex<HashMap<String, PendingEntry>>,
    ttl: Duration,
}

impl PendingStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn set(&self, user_id: &str, mint: &str) {
        self.entries.lock().insert(
            user_id.to_string(),
            PendingEntry {
                mint: mint.to_string(),
                created_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, user_id: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let expired = entries
            .get(user_id)
            .map(|entry| entry.created_at.elapsed() >= self.ttl)?;
        if expired {
            entries.remove(user_id);
            return None;
        }
        entries.get(user_id).map(|entry| entry.mint.clone())
    }

    pub fn clear(&self, user_id: &str) {
        self.entries.lock().remove(user_id);
    }

    pub fn expectation(&self, user_id: &str) -> InputExpectation {
        match self.get(user_id) {
            Some(mint) => InputExpectation::AwaitingAmount(mint),
            None => InputExpectation::NoExpectation,
        }
    }

    /// Drops abandoned entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Per-user single-flight token around swap execution.
#[derive(Debug, Default)]
pub struct SellLocks {
    active: Mutex<HashSet<String>>,
}

impl SellLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn try_acquire(self: &Arc<Self>, user_id: &str) -> Option<SellGuard> {
        if !self.active.lock().insert(user_id.to_string()) {
            return None;
        }
        Some(SellGuard {
            locks: Arc::clone(self),
            user_id: user_id.to_string(),
        })
    }

    #[cfg(test)]
    pub fn is_locked(&self, user_id: &str) -> bool {
        self.active.lock().contains(user_id)
    }
}

#[derive(Debug)]
pub struct SellGuard {
    locks: Arc<SellLocks>,
    user_id: String,
}

impl Drop for SellGuard {
    fn drop(&mut self) {
        self.locks.active.lock().remove(&self.user_id);
    }
}
