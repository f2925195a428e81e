// Score cache
//
// Comparisons are pure functions of their prepared inputs, so results are
// memoised under a SHA-256 key over (source digest, corpus entry key, entry
// digest, matcher fingerprint). Concurrent misses for the same key may both
// compute; the last write wins.

use crate::scoring::ScoringResult;
use crate::trace::Strace;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Concurrent store of scoring results
pub trait ScoreCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Arc<ScoringResult>>;
    fn insert(&self, key: String, result: Arc<ScoringResult>);
    fn len(&self) -> usize;
    fn clear(&self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process cache behind a read-write lock
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Arc<ScoringResult>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScoreCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Arc<ScoringResult>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn insert(&self, key: String, result: Arc<ScoringResult>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, result);
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Cache that never stores anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl ScoreCache for NoCache {
    fn get(&self, _key: &str) -> Option<Arc<ScoringResult>> {
        None
    }

    fn insert(&self, _key: String, _result: Arc<ScoringResult>) {}

    fn len(&self) -> usize {
        0
    }

    fn clear(&self) {}
}

/// Configurable cache backing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    #[default]
    Memory,
    None,
}

impl CacheKind {
    pub fn build(self) -> Arc<dyn ScoreCache> {
        match self {
            CacheKind::Memory => Arc::new(MemoryCache::new()),
            CacheKind::None => Arc::new(NoCache),
        }
    }
}

/// Hex SHA-256 over length-prefixed parts
pub fn cache_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Content digest of a trace
pub fn trace_digest(trace: &Strace) -> String {
    let bytes = serde_json::to_vec(trace).unwrap_or_else(|_| trace.to_string().into_bytes());
    hex::encode(Sha256::digest(&bytes))
}
