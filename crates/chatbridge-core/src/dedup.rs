//! Deduplication stores.
//!
//! Each context owns its own caches; nothing here is shared across contexts.
//! Keys combine the conversation id with the first 50 characters of the
//! trimmed question text, so minor trailing edits still collide.
//!
//! - permanent caches (`processed`, `not-found`) only shrink on explicit clear
//! - TTL caches (`recently-submitted`) expire passively on lookup or sweep

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::safe_truncate;

const KEY_TEXT_CHARS: usize = 50;

/// Composite dedup key: `conversation:first-50-chars-of-trimmed-text`.
pub fn dedup_key(conversation_id: &str, text: &str) -> String {
    format!("{conversation_id}:{}", safe_truncate(text.trim(), KEY_TEXT_CHARS))
}

/// Timestamped set of handled keys.
#[derive(Debug, Default)]
pub struct DedupCache {
    entries: HashMap<String, Instant>,
    ttl: Option<Duration>,
}

impl DedupCache {
    /// Entries live until [`clear`](Self::clear).
    pub fn permanent() -> Self {
        Self { entries: HashMap::new(), ttl: None }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { entries: HashMap::new(), ttl: Some(ttl) }
    }

    fn is_live(&self, stamped: Instant, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.duration_since(stamped) < ttl,
            None => true,
        }
    }

    /// Record a key. Returns false if it was already present and live.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        let now = Instant::now();
        let key = key.into();
        let fresh = !self.entries.get(&key).is_some_and(|&at| self.is_live(at, now));
        self.entries.insert(key, now);
        fresh
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries.get(key).is_some_and(|&at| self.is_live(at, now))
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        if let Some(ttl) = self.ttl {
            self.entries.retain(|_, at| now.duration_since(*at) < ttl);
        }
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
