//! Bookkeeping of results retained inside the engine.

use std::collections::BTreeSet;

/// Names of results the engine keeps for warm starts.
///
/// A name is `retained` after a successful call that asked the engine to keep
/// its results. Releasing it moves it to `pending`; pending names are deleted
/// from the engine at the start of the next evaluation.
#[derive(Debug, Default)]
pub struct RestartCache {
    retained: BTreeSet<String>,
    pending: BTreeSet<String>,
}

impl RestartCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str) {
        self.retained.insert(name.to_string());
    }

    pub fn is_retained(&self, name: &str) -> bool {
        self.retained.contains(name)
    }

    /// Mark a retained name for deletion. Returns false if it was not retained.
    pub fn mark_deletable(&mut self, name: &str) -> bool {
        if self.retained.remove(name) {
            self.pending.insert(name.to_string());
            true
        } else {
            false
        }
    }

    /// Names waiting to be deleted in the engine.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Forget a pending name once the engine confirmed its deletion.
    pub fn confirm_deleted(&mut self, name: &str) {
        self.pending.remove(name);
    }

    /// Drop everything; engine state does not survive a process restart.
    pub fn clear(&mut self) {
        self.retained.clear();
        self.pending.clear();
    }

    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut cache = RestartCache::new();
        cache.insert("A");
        assert!(cache.is_retained("A"));
        assert!(!cache.has_pending());

        assert!(cache.mark_deletable("A"));
        assert!(!cache.is_retained("A"));
        assert_eq!(cache.pending().collect::<Vec<_>>(), vec!["A"]);

        cache.confirm_deleted("A");
        assert!(!cache.has_pending());
    }

    #[test]
    fn test_release_unknown_name() {
        let mut cache = RestartCache::new();
        assert!(!cache.mark_deletable("ghost"));
        assert!(!cache.has_pending());
    }

    #[test]
    fn test_clear() {
        let mut cache = RestartCache::new();
        cache.insert("A");
        cache.insert("B");
        cache.mark_deletable("B");
        cache.clear();
        assert_eq!(cache.retained_len(), 0);
        assert!(!cache.has_pending());
    }
}
