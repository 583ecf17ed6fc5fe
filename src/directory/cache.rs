//! Fixed-capacity LRU cache from file name to owning Node slot.
//!
//! Recency is tracked with a monotonically increasing use counter rather
//! than wall-clock time so eviction order is deterministic. Ties (which can
//! only arise from the initial zero state) resolve to the lowest slot index.

use std::sync::Mutex;

pub const CACHE_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
struct CacheEntry {
    name: String,
    slot: usize,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: Vec<CacheEntry>,
    tick: u64,
}

#[derive(Default)]
pub struct LocationCache {
    inner: Mutex<CacheState>,
}

impl LocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        let mut state = self.inner.lock().unwrap();
        state.tick += 1;
        let tick = state.tick;
        for entry in state.entries.iter_mut() {
            if entry.name == name {
                entry.last_used = tick;
                tracing::debug!("Cache HIT for '{}'", name);
                return Some(entry.slot);
            }
        }
        tracing::debug!("Cache MISS for '{}'", name);
        None
    }

    pub fn insert(&self, name: &str, slot: usize) {
        let mut state = self.inner.lock().unwrap();
        state.tick += 1;
        let tick = state.tick;

        if let Some(entry) = state.entries.iter_mut().find(|e| e.name == name) {
            entry.slot = slot;
            entry.last_used = tick;
            return;
        }

        let entry = CacheEntry {
            name: name.to_string(),
            slot,
            last_used: tick,
        };
        if state.entries.len() < CACHE_CAPACITY {
            state.entries.push(entry);
            return;
        }

        // Evict the least recently used entry; `<` keeps the lowest index
        // on a tie.
        let mut victim = 0;
        for (i, candidate) in state.entries.iter().enumerate() {
            if candidate.last_used < state.entries[victim].last_used {
                victim = i;
            }
        }
        tracing::debug!(
            "Evicting '{}' for '{}'",
            state.entries[victim].name,
            entry.name
        );
        state.entries[victim] = entry;
    }

    pub fn invalidate(&self, name: &str) {
        let mut state = self.inner.lock().unwrap();
        state.entries.retain(|e| e.name != name);
    }

    /// Drops every entry pointing at a purged Node slot.
    pub fn invalidate_slot(&self, slot: usize) {
        let mut state = self.inner.lock().unwrap();
        state.entries.retain(|e| e.slot != slot);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .any(|e| e.name == name)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}
