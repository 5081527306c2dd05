//! Active forwarding entries by canonical key.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::domain::ForwardEntry;

/// Mapping from canonical key to its single forwarding entry.
#[derive(Debug, Default)]
pub struct EntryRegistry {
    entries: Mutex<HashMap<String, Arc<ForwardEntry>>>,
}

impl EntryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `entry` under its key, replacing whatever was there.
    pub fn store(&self, entry: Arc<ForwardEntry>) -> Option<Arc<ForwardEntry>> {
        self.entries.lock().insert(entry.key().to_string(), entry)
    }

    pub fn get(&self, key: &str) -> Option<Arc<ForwardEntry>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn delete(&self, key: &str) -> Option<Arc<ForwardEntry>> {
        self.entries.lock().remove(key)
    }

    /// Deletes the entry for `key` only if it is the instance `id`.
    ///
    /// A late release of a superseded entry must not evict its successor.
    pub fn delete_instance(&self, key: &str, id: Uuid) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(current) if current.id() == id => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Returns the live entry for `key`, or stores the one `create` builds.
    ///
    /// The lookup and the insert happen under one lock, so concurrent callers
    /// for the same key get the same entry. A terminated entry still present
    /// under `key` is replaced. The flag is `true` when `create` ran.
    pub fn get_or_try_insert_with<F, E>(
        &self,
        key: &str,
        create: F,
    ) -> Result<(Arc<ForwardEntry>, bool), E>
    where
        F: FnOnce() -> Result<ForwardEntry, E>,
    {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(key) {
            if !existing.is_terminated() {
                return Ok((Arc::clone(existing), false));
            }
        }

        let entry = Arc::new(create()?);
        debug_assert_eq!(entry.key(), key, "entry stored under a foreign key");
        entries.insert(entry.key().to_string(), Arc::clone(&entry));
        Ok((entry, true))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// All entries, sorted by key.
    pub fn entries(&self) -> Vec<Arc<ForwardEntry>> {
        let mut entries: Vec<Arc<ForwardEntry>> = self.entries.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.key().cmp(b.key()));
        entries
    }
}
