//! # ChatBridge Coordinator
//! The long-lived, process-wide context.
//!
//! - [`RequestCorrelator`]: single-flight gate pairing one answer request with its reply
//! - [`pages`]: locate or open pages and wait for them to load
//! - [`SettingsService`]: user toggles, persisted and pushed to every Scanner
//! - [`Coordinator`]: routes protocol messages and keeps the activity log

pub mod correlator;
pub mod pages;
pub mod service;
pub mod settings;

pub use correlator::{ReplyMatch, RequestCorrelator};
pub use service::Coordinator;
pub use settings::{JsonSettingsStore, MemorySettingsStore, SettingsService};
