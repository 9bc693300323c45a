//! Transcription result cache.
//!
//! Keyed by audio content fingerprint, backend id and language hint. Each
//! key owns a once-cell: the first request for a key runs the backend and
//! every concurrent request for the same key waits for that run and shares
//! its result. Failures are not cached. Completed entries beyond the
//! capacity are evicted least recently used first.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use super::TranscriptionResult;
use crate::core::CoreResult;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKey {
    pub fingerprint: String,
    pub backend: String,
    pub language: Option<String>,
}

impl CacheKey {
    pub fn new(fingerprint: &str, backend: &str, language: Option<&str>) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            backend: backend.to_string(),
            language: language.map(str::to_string),
        }
    }
}

type Slot = Arc<OnceCell<Arc<TranscriptionResult>>>;

/// Completed transcripts kept by default
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

struct Entry {
    slot: Slot,
    last_used: u64,
}

#[derive(Default)]
struct Entries {
    map: HashMap<CacheKey, Entry>,
    clock: u64,
}

impl Entries {
    /// Drops the least recently used completed entries beyond `capacity`.
    /// In-flight entries are never evicted.
    fn evict(&mut self, capacity: usize) {
        let mut completed: Vec<(u64, CacheKey)> = self
            .map
            .iter()
            .filter(|(_, e)| e.slot.initialized())
            .map(|(k, e)| (e.last_used, k.clone()))
            .collect();
        if completed.len() <= capacity {
            return;
        }
        completed.sort_by_key(|(last_used, _)| *last_used);
        let excess = completed.len() - capacity;
        for (_, key) in completed.into_iter().take(excess) {
            debug!(fingerprint = %key.fingerprint, backend = %key.backend, "Evicting transcription");
            self.map.remove(&key);
        }
    }
}

pub struct TranscriptionCache {
    entries: Mutex<Entries>,
    capacity: usize,
}

impl Default for TranscriptionCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl TranscriptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache holding at most `capacity` completed transcripts (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        let mut entries = self.lock();
        entries.clock += 1;
        let now = entries.clock;
        let entry = entries.map.entry(key.clone()).or_insert_with(|| Entry {
            slot: Slot::default(),
            last_used: now,
        });
        entry.last_used = now;
        Arc::clone(&entry.slot)
    }

    /// Returns the cached result for `key`, computing it at most once
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        compute: F,
    ) -> CoreResult<Arc<TranscriptionResult>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<TranscriptionResult>>,
    {
        let slot = self.slot(key);
        if let Some(hit) = slot.get() {
            debug!(fingerprint = %key.fingerprint, backend = %key.backend, "Transcription cache hit");
            return Ok(Arc::clone(hit));
        }

        let result = slot
            .get_or_try_init(|| async {
                debug!(fingerprint = %key.fingerprint, backend = %key.backend, "Transcription cache miss");
                compute().await.map(Arc::new)
            })
            .await?;
        let result = Arc::clone(result);
        self.lock().evict(self.capacity);
        Ok(result)
    }

    /// Returns a completed entry without computing
    pub fn get(&self, key: &CacheKey) -> Option<Arc<TranscriptionResult>> {
        self.lock()
            .map
            .get(key)
            .and_then(|entry| entry.slot.get().cloned())
    }

    /// Number of completed entries
    pub fn len(&self) -> usize {
        self.lock()
            .map
            .values()
            .filter(|entry| entry.slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().map.clear();
    }
}
