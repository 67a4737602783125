//! # ChatBridge Core
//! Shared foundation for every ChatBridge context.
//!
//! ChatBridge relays questions typed into a messaging page to an AI answer page,
//! waits for the generated reply, and delivers it back into the right conversation.
//! Three isolated contexts cooperate and only talk through messages:
//!
//! ```text
//! Scanner (messaging page)            Coordinator (process-wide)          Extractor (answer page)
//!   ├── scan cycle ──getAnswer──────────▶ single-flight gate
//!   │                                    ├── locate/open page, inject ─────▶ askQuestion
//!   │                                    │                                  ├── type + submit
//!   │                                    │◀──────────────chatGPTResponse────┘ extract reply
//!   │◀─────────────────answer────────────┘
//!   └── delivery state machine → conversation
//! ```
//!
//! This crate holds what all of them agree on: config, errors, the message
//! protocol, the in-process message bus, capability traits for the external
//! pages, and the dedup stores.

pub mod activity;
pub mod bus;
pub mod config;
pub mod dedup;
pub mod error;
pub mod protocol;
pub mod traits;
pub mod types;

pub use error::{BridgeError, ErrorKind, Result};
