//! Activity log — bounded, newest-first record of what the bridge did.
//! Shared across clones and capped at [`MAX_ACTIVITY_ENTRIES`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum entries kept.
pub const MAX_ACTIVITY_ENTRIES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub level: ActivityLevel,
    pub message: String,
}

/// Shared handle; clones see the same log.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: Arc<Mutex<VecDeque<ActivityEntry>>>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, level: ActivityLevel, message: impl Into<String>) {
        let entry = ActivityEntry { timestamp: Utc::now(), level, message: message.into() };
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push_front(entry);
        entries.truncate(MAX_ACTIVITY_ENTRIES);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(ActivityLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.record(ActivityLevel::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.record(ActivityLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(ActivityLevel::Error, message);
    }

    /// Newest first.
    pub fn entries(&self) -> Vec<ActivityEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
