//! Resolution result cache.
//!
//! Results are keyed by the context fingerprint and never invalidated
//! proactively. Once the cache grows past its limit the oldest half of the
//! entries (by insertion order) is dropped in one step.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::candidate::EntityResolutionCandidate;

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently held.
    pub entries: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// Entries dropped by eviction.
    pub evicted: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Vec<EntityResolutionCandidate>>,
    order: VecDeque<String>,
}

/// Bounded fingerprint → candidates cache.
#[derive(Debug)]
pub struct ResolutionCache {
    state: Mutex<CacheState>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evicted: AtomicU64,
}

impl ResolutionCache {
    /// Creates a cache holding at most `max_entries` results.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries: max_entries.max(2),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Cached candidates for a fingerprint.
    ///
    /// A poisoned lock counts as a miss.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<EntityResolutionCandidate>> {
        let found = match self.state.lock() {
            Ok(state) => state.entries.get(key).cloned(),
            Err(_) => {
                tracing::warn!("resolution cache lock poisoned, bypassing cache");
                None
            }
        };
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Stores candidates under a fingerprint, evicting if over capacity.
    pub fn put(&self, key: String, candidates: Vec<EntityResolutionCandidate>) {
        let Ok(mut state) = self.state.lock() else {
            tracing::warn!("resolution cache lock poisoned, result not cached");
            return;
        };
        if state.entries.insert(key.clone(), candidates).is_none() {
            state.order.push_back(key);
        }
        if state.entries.len() > self.max_entries {
            let excess = state.entries.len() / 2;
            for _ in 0..excess {
                if let Some(oldest) = state.order.pop_front() {
                    state.entries.remove(&oldest);
                }
            }
            self.evicted.fetch_add(excess as u64, Ordering::Relaxed);
            tracing::debug!(evicted = excess, remaining = state.entries.len(), "resolution cache evicted");
        }
    }

    /// Drops every entry. Counters are kept.
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.entries.clear();
            state.order.clear();
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.state.lock().map_or(0, |s| s.entries.len());
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}
