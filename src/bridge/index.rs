//! In-memory `(user, directory) -> session id` index.
//!
//! Entries are created on the first successful exchange, overwritten on
//! every later one, and removed only by [`SessionIndex::forget`].  Nothing
//! is persisted; a restart starts every conversation fresh.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Key under which a user's session for a directory is stored.
pub fn session_key(user_id: i64, working_directory: &Path) -> String {
    format!("{user_id}:{}", working_directory.display())
}

#[derive(Debug, Default)]
pub struct SessionIndex {
    entries: Mutex<HashMap<String, String>>,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    /// Store `session_id` under `key`, replacing any previous id.
    pub fn insert(&self, key: String, session_id: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, session_id);
        }
    }

    /// Remove exactly `key`.  Returns the id that was stored.
    pub fn forget(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
