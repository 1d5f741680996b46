//! Conversion cache.
//!
//! Maps `(project id, application id)` to the reference the object was last
//! sent as. A hit lets the builder embed the reference instead of running the
//! converter again. Eviction by the change tracker is the only invalidation;
//! a cold cache costs time, never correctness.
//!
//! Every eviction advances the cache [`Epoch`]. A send captures the epoch
//! before it reads the host and stores its references with
//! [`ConversionCache::store_since`], which skips ids evicted in between.

use conduit_model::ObjectReference;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};

type CacheKey = (String, String);

/// Evictions remembered for [`ConversionCache::evicted_since`].
const EVICTION_HISTORY: usize = 256;

/// Position in the cache's eviction history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

#[derive(Debug, Default)]
struct EvictionLog {
    epoch: Epoch,
    history: VecDeque<(Epoch, BTreeSet<String>)>,
    // Newest epoch dropped from `history`.
    floor: Epoch,
    cleared_at: Epoch,
}

impl EvictionLog {
    fn advance(&mut self) -> Epoch {
        self.epoch = Epoch(self.epoch.0 + 1);
        self.epoch
    }

    fn evicted_since(&self, application_id: &str, since: Epoch) -> bool {
        if self.cleared_at > since || self.floor > since {
            return true;
        }
        self.history
            .iter()
            .rev()
            .take_while(|(epoch, _)| *epoch > since)
            .any(|(_, ids)| ids.contains(application_id))
    }
}

/// Per-project conversion cache.
#[derive(Debug, Default)]
pub struct ConversionCache {
    entries: DashMap<CacheKey, ObjectReference>,
    log: Mutex<EvictionLog>,
}

impl ConversionCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current epoch.
    pub fn epoch(&self) -> Epoch {
        self.log.lock().epoch
    }

    /// Stores references produced by a successful send, overwriting older ones.
    pub fn store(&self, project_id: &str, references: &HashMap<String, ObjectReference>) {
        let since = self.epoch();
        self.store_since(project_id, references, since);
    }

    /// Stores the references whose ids were not evicted after `since`.
    ///
    /// Returns the number of stored references.
    pub fn store_since(
        &self,
        project_id: &str,
        references: &HashMap<String, ObjectReference>,
        since: Epoch,
    ) -> usize {
        let log = self.log.lock();
        let mut stored = 0;
        for (application_id, reference) in references {
            if log.evicted_since(application_id, since) {
                continue;
            }
            self.entries.insert(
                (project_id.to_string(), application_id.clone()),
                reference.clone(),
            );
            stored += 1;
        }
        drop(log);
        let stale = references.len() - stored;
        tracing::debug!(project_id, stored, stale, "conversion cache updated");
        stored
    }

    /// Returns true if `application_id` was evicted after `since`.
    ///
    /// Epochs older than the remembered history always count as evicted.
    pub fn evicted_since(&self, application_id: &str, since: Epoch) -> bool {
        self.log.lock().evicted_since(application_id, since)
    }

    /// Looks up the reference for a host object.
    pub fn lookup(&self, project_id: &str, application_id: &str) -> Option<ObjectReference> {
        self.entries
            .get(&(project_id.to_string(), application_id.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Removes the entries of `application_ids` in every project.
    ///
    /// The ids are remembered even when nothing was cached for them, so an
    /// in-flight send cannot store them afterwards. Returns the number of
    /// removed entries.
    pub fn evict(&self, application_ids: &BTreeSet<String>) -> usize {
        if application_ids.is_empty() {
            return 0;
        }
        let mut log = self.log.lock();
        let epoch = log.advance();
        log.history.push_back((epoch, application_ids.clone()));
        while log.history.len() > EVICTION_HISTORY {
            if let Some((dropped, _)) = log.history.pop_front() {
                log.floor = dropped;
            }
        }
        let before = self.entries.len();
        self.entries
            .retain(|(_, application_id), _| !application_ids.contains(application_id));
        drop(log);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            tracing::debug!(evicted, "conversion cache entries evicted");
        }
        evicted
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut log = self.log.lock();
        let epoch = log.advance();
        log.cleared_at = epoch;
        log.history.clear();
        self.entries.clear();
    }

    /// Number of cached references.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
