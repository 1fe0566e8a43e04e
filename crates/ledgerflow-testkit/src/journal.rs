//! In-memory journal store.

use async_trait::async_trait;
use ledgerflow_client::{JournalError, JournalStore};
use std::collections::HashMap;
use std::sync::Mutex;

/// A [`JournalStore`] over a mutex-guarded map. Optionally fails every
/// write, for exercising journal error paths.
#[derive(Default)]
pub struct MemoryJournal {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: bool,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_writes() -> Self {
        Self { entries: Mutex::default(), fail_writes: true }
    }

    /// Snapshot of everything stored.
    pub fn dump(&self) -> HashMap<String, String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn get_sync(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn put_sync(&self, key: &str, value: &str) {
        self.entries.lock().unwrap().insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl JournalStore for MemoryJournal {
    async fn get(&self, key: &str) -> Result<Option<String>, JournalError> {
        Ok(self.get_sync(key))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), JournalError> {
        if self.fail_writes {
            return Err(JournalError("write refused by test journal".to_string()));
        }
        self.put_sync(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), JournalError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}
