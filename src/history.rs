//! History Collaborator
//!
//! The core only needs a narrow surface: record a successful top-level
//! command, list entries for the `history` builtin, search for the
//! line editor, and clear for `history -c`. File-backed persistence
//! lives outside the core behind this trait.

use std::sync::Mutex;

use async_trait::async_trait;

#[async_trait]
pub trait History: Send + Sync {
    /// Record a command line. Called after successful top-level
    /// commands only.
    async fn push(&self, entry: &str);
    /// All entries, oldest first.
    fn all(&self) -> Vec<String>;
    /// Entries containing the query, oldest first.
    fn search(&self, query: &str) -> Vec<String>;
    /// Drop everything (`history -c`).
    fn clear(&self);
}

/// Bounded in-memory history, the default when no persistent store is
/// wired in.
pub struct MemoryHistory {
    entries: Mutex<Vec<String>>,
    limit: usize,
}

impl MemoryHistory {
    pub fn new(limit: usize) -> Self {
        Self { entries: Mutex::new(Vec::new()), limit: limit.max(1) }
    }
}

#[async_trait]
impl History for MemoryHistory {
    async fn push(&self, entry: &str) {
        let entry = entry.trim();
        if entry.is_empty() {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        // Skip immediate duplicates.
        if entries.last().map(String::as_str) == Some(entry) {
            return;
        }
        entries.push(entry.to_string());
        if entries.len() > self.limit {
            let excess = entries.len() - self.limit;
            entries.drain(..excess);
        }
    }

    fn all(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    fn search(&self, query: &str) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.contains(query))
            .cloned()
            .collect()
    }

    fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}
