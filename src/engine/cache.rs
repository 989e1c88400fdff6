use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::domain::decision::Decision;

/// Decision cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Entry time-to-live, independent of policy version changes, so a stale
    /// attribute resolution cannot outlive its window.
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            ttl: Duration::from_secs(30),
            capacity: 10_000,
        }
    }
}

impl CacheConfig {
    /// Config with the cache turned off; lookups miss, inserts drop.
    pub fn disabled() -> Self {
        CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        }
    }
}

struct CacheEntry {
    decision: Decision,
    policy_version: String,
    inserted_at: Instant,
}

/// TTL-bounded decision cache keyed on the request fingerprint.
///
/// An entry is only served when its policy version matches the active one,
/// so publishing a new version invalidates every cached decision without a
/// sweep. Cache hits must be observationally identical to recomputation.
pub struct DecisionCache {
    config: CacheConfig,
    entries: RwLock<HashMap<u64, CacheEntry, RandomState>>,
}

impl DecisionCache {
    pub fn new(config: CacheConfig) -> Self {
        DecisionCache {
            config,
            entries: RwLock::new(HashMap::default()),
        }
    }

    pub fn get(&self, fingerprint: u64, policy_version: &str) -> Option<Decision> {
        if !self.config.enabled {
            return None;
        }

        let entries = self.entries.read();
        let entry = entries.get(&fingerprint)?;
        if entry.policy_version != policy_version {
            return None;
        }
        if entry.inserted_at.elapsed() >= self.config.ttl {
            return None;
        }
        Some(entry.decision.clone())
    }

    pub fn insert(&self, fingerprint: u64, policy_version: &str, decision: Decision) {
        if !self.config.enabled {
            return;
        }

        let mut entries = self.entries.write();
        if entries.len() >= self.config.capacity && !entries.contains_key(&fingerprint) {
            let ttl = self.config.ttl;
            entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
            // Still full after dropping expired entries: skip rather than grow
            if entries.len() >= self.config.capacity {
                return;
            }
        }

        entries.insert(
            fingerprint,
            CacheEntry {
                decision,
                policy_version: policy_version.to_string(),
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
