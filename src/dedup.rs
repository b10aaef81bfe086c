use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::fingerprint::DedupKey;

/// Dedup keys accepted so far in one run.
///
/// Shared by every source of the run, so a description seen in one file
/// suppresses it in all later files. Check and insert happen under one lock;
/// concurrent sources can never both accept the same key.
#[derive(Debug, Default)]
pub struct SeenKeys {
    keys: Mutex<HashSet<DedupKey>>,
}

impl SeenKeys {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<DedupKey>> {
        // a panic elsewhere cannot leave a HashSet half-inserted
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `key` and return true if it was not seen before in this run.
    pub fn insert_if_new(&self, key: &DedupKey) -> bool {
        let mut keys = self.lock();
        if keys.contains(key) {
            return false;
        }
        keys.insert(key.clone())
    }

    /// Forget `keys` so a later source may claim them again.
    pub fn release(&self, keys: &[DedupKey]) {
        let mut seen = self.lock();
        for key in keys {
            seen.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
